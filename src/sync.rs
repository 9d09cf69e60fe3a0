// 🔄 Sync Driver - One record at a time, one file at a time
//
// Per record:
//   Resolving → New|Existing → DeltaComputed → NoChange|ReadyToCommit
//             → Committed|DryRunNoop → Done
// Any step may end in Failed (record-fatal, logged, loop continues) or
// Skipped (ambiguous identity). A ClientError aborts the run.
//
// Nothing is shared between records except the frozen lookup tables.

use crate::client::{DocumentStore, KnowledgeBase};
use crate::config::SyncConfig;
use crate::db::{Ledger, RecordProgress};
use crate::delta::DeltaEngine;
use crate::entities::{LookupTables, NameRegistryBuilder};
use crate::error::{ClientError, RecordError, SyncError};
use crate::feed::{parse_features, read_feed_bytes, ObjectType, SourceRecord, KEY_ID, KEY_OPERATOR};
use crate::geoshape::{ArticleNaming, DocumentSync, GeometryProjector, TemplateNaming};
use crate::statement::{EntityId, Statement};
use crate::vocabulary::Vocabulary;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde_json::Value as Json;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const SUMMARY_ENTITY_CREATED: &str = "Created by bot from data supplied by Naturvårdsverket";
pub const SUMMARY_ENTITY_UPDATED: &str = "Bot updated due to delta found compared to local data from Naturvårdsverket";

/// Language of operator labels in the feed
pub const LABEL_LANGUAGE: &str = "sv";

// ============================================================================
// RECORD STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Resolving,
    New,
    Existing,
    DeltaComputed,
    NoChange,
    ReadyToCommit,
    Committed,
    DryRunNoop,
    Done,
    Failed,
    Skipped,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Resolving => "Resolving",
            RecordState::New => "New",
            RecordState::Existing => "Existing",
            RecordState::DeltaComputed => "DeltaComputed",
            RecordState::NoChange => "NoChange",
            RecordState::ReadyToCommit => "ReadyToCommit",
            RecordState::Committed => "Committed",
            RecordState::DryRunNoop => "DryRunNoop",
            RecordState::Done => "Done",
            RecordState::Failed => "Failed",
            RecordState::Skipped => "Skipped",
        }
    }

    /// States the machine may move to from here
    pub fn can_move_to(&self, next: RecordState) -> bool {
        use RecordState::*;
        if matches!(next, Failed) {
            return !matches!(self, Done | Failed | Skipped);
        }
        matches!(
            (self, next),
            (Resolving, New)
                | (Resolving, Existing)
                | (Resolving, Skipped)
                | (New, DeltaComputed)
                | (Existing, DeltaComputed)
                | (DeltaComputed, NoChange)
                | (DeltaComputed, ReadyToCommit)
                | (ReadyToCommit, Committed)
                | (ReadyToCommit, DryRunNoop)
                | (NoChange, Done)
                | (Committed, Done)
                | (DryRunNoop, Done)
        )
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one record's walk through the state machine and what it did
struct Tracker {
    state: RecordState,
    /// Last state before Done, stored in the ledger
    outcome: RecordState,
    progress: RecordProgress,
}

impl Tracker {
    fn new(record_id: &str) -> Self {
        Tracker {
            state: RecordState::Resolving,
            outcome: RecordState::Resolving,
            progress: RecordProgress::started(record_id),
        }
    }

    fn advance(&mut self, next: RecordState) {
        debug_assert!(self.state.can_move_to(next), "{} -> {}", self.state, next);
        debug!("Record {}: {} -> {}", self.progress.record_id, self.state, next);
        if next != RecordState::Done {
            self.outcome = next;
        }
        self.state = next;
    }

    fn fail(mut self, err: &RecordError) -> RecordProgress {
        error!("Record {} failed: {}", self.progress.record_id, err);
        self.advance(RecordState::Failed);
        self.progress.error = Some(err.to_string());
        self.finish()
    }

    fn skip(mut self) -> RecordProgress {
        self.advance(RecordState::Skipped);
        self.progress.skipped = true;
        self.finish()
    }

    fn done(mut self) -> RecordProgress {
        self.advance(RecordState::Done);
        self.finish()
    }

    fn finish(mut self) -> RecordProgress {
        self.progress.state = self.outcome.as_str().to_string();
        self.progress.ended_at = Utc::now();
        self.progress
    }
}

// ============================================================================
// RECORD SYNC
// ============================================================================

/// Drives single records against the remote collaborators
pub struct RecordSync<'a> {
    kb: &'a dyn KnowledgeBase,
    documents: &'a dyn DocumentStore,
    naming: &'a dyn ArticleNaming,
    vocab: &'a Vocabulary,
    tables: &'a LookupTables,
    dry_run: bool,
}

impl<'a> RecordSync<'a> {
    pub fn new(
        kb: &'a dyn KnowledgeBase,
        documents: &'a dyn DocumentStore,
        naming: &'a dyn ArticleNaming,
        vocab: &'a Vocabulary,
        tables: &'a LookupTables,
        dry_run: bool,
    ) -> Self {
        RecordSync {
            kb,
            documents,
            naming,
            vocab,
            tables,
            dry_run,
        }
    }

    /// Process one record. Record-level trouble ends up in the returned
    /// progress; only infrastructure failures are returned as errors.
    pub fn sync_record(&self, object_type: &ObjectType, record: &SourceRecord) -> Result<RecordProgress, ClientError> {
        let mut tracker = Tracker::new(&record.id);
        let engine = DeltaEngine::new(self.vocab, self.tables, object_type);

        // Resolving
        let matches = self
            .kb
            .find_unique_entity_by_property(&object_type.entity, &self.vocab.registry_id, &record.id)?;

        let entity = match matches.as_slice() {
            [] => {
                tracker.advance(RecordState::New);
                engine.bootstrap_entity(record)
            }
            [id] => match self.kb.get_entity(id)? {
                Some(entity) => {
                    tracker.advance(RecordState::Existing);
                    tracker.progress.entity_id = Some(id.to_string());
                    entity
                }
                None => {
                    warn!("Entity {} for record {} vanished between lookup and read; skipping", id, record.id);
                    return Ok(tracker.skip());
                }
            },
            ids => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                warn!(
                    "Record {} matches more than one {} ({}); skipping until resolved manually",
                    record.id,
                    object_type.label,
                    ids.join(", ")
                );
                return Ok(tracker.skip());
            }
        };

        // Delta
        let mut eval = engine.begin(record, &entity);
        if let Err(err) = engine.evaluate_properties(&mut eval) {
            return Ok(tracker.fail(&err));
        }

        match (&record.geometry, &record.geometry_error) {
            (None, Some(err)) => {
                error!("Geometry of record {} is malformed: {}", record.id, err);
                tracker.progress.error = Some(err.to_string());
            }
            (None, None) => warn!("Record {} has no geometry; coordinates and shape left alone", record.id),
            (Some(geometry), _) => {
                let projector = GeometryProjector::new(self.documents, self.naming, object_type, self.dry_run);
                match projector.project(&eval, geometry) {
                    Ok(projection) => {
                        eval.extend(projection.additions);
                        if !self.dry_run {
                            tracker.progress.created_document = projection.document == Some(DocumentSync::Created);
                            tracker.progress.updated_document = projection.document == Some(DocumentSync::Updated);
                        }
                    }
                    Err(SyncError::Record(err)) => {
                        error!("Geometry of record {} failed: {}", record.id, err);
                        tracker.progress.error = Some(err.to_string());
                    }
                    Err(SyncError::Infrastructure(err)) => return Err(err),
                }
            }
        }

        let delta = eval.finish();
        tracker.advance(RecordState::DeltaComputed);

        if delta.is_empty() && !entity.is_pending() {
            debug!("Record {} is up to date", record.id);
            tracker.advance(RecordState::NoChange);
            return Ok(tracker.done());
        }

        tracker.advance(RecordState::ReadyToCommit);
        tracker.progress.created_statements = delta.added_properties();
        tracker.progress.deleted_statements = delta.deleted_ids();

        if self.dry_run {
            if entity.is_pending() {
                info!("[dry run] Would create {} for record {}", object_type.label, record.id);
            }
            info!(
                "[dry run] Record {} would get {} added ({}) and {} deleted",
                record.id,
                delta.to_add.len(),
                delta.added_properties().join(", "),
                delta.to_delete.len()
            );
            tracker.advance(RecordState::DryRunNoop);
            return Ok(tracker.done());
        }

        let id = match entity.id() {
            Some(id) => id.clone(),
            None => self.create_entity(object_type, record, entity.statements(), &mut tracker)?,
        };
        if !delta.is_empty() {
            self.kb
                .update_entity(&id, &delta.to_add, &delta.to_delete, SUMMARY_ENTITY_UPDATED)?;
            info!(
                "Updated {} for record {}: {} added, {} deleted",
                id,
                record.id,
                delta.to_add.len(),
                delta.to_delete.len()
            );
            tracker.progress.updated_entity = true;
        }
        tracker.advance(RecordState::Committed);

        Ok(tracker.done())
    }

    /// Create the entity from its two identifying statements. Only reached
    /// once the record evaluated cleanly, so a failing record never leaves
    /// an empty entity behind.
    fn create_entity(
        &self,
        object_type: &ObjectType,
        record: &SourceRecord,
        bootstrap: &[Statement],
        tracker: &mut Tracker,
    ) -> Result<EntityId, ClientError> {
        let id = self.kb.create_entity(bootstrap, SUMMARY_ENTITY_CREATED)?;
        info!("Created {} {} for record {}", object_type.label, id, record.id);
        tracker.progress.entity_id = Some(id.to_string());
        tracker.progress.created_entity = true;
        Ok(id)
    }
}

// ============================================================================
// LOOKUP TABLES (startup)
// ============================================================================

/// Load the listings, resolve every operator the listings miss by its
/// label, then freeze.
pub fn prepare_tables<'n>(
    config: &SyncConfig,
    kb: &dyn KnowledgeBase,
    operator_names: impl IntoIterator<Item = &'n str>,
) -> Result<LookupTables> {
    let mut operators = NameRegistryBuilder::new("operator");
    let mut municipalities = NameRegistryBuilder::new("municipality");

    if let Some(path) = &config.run.operators {
        operators.load_listing(path)?;
    }
    if let Some(path) = &config.run.municipalities {
        municipalities.load_listing(path)?;
    }

    resolve_operators(kb, &mut operators, &municipalities, operator_names)?;
    Ok(LookupTables::new(operators.build(), municipalities.build()))
}

/// Resolve unknown operator names by unique label. Returns how many were
/// added.
pub fn resolve_operators<'n>(
    kb: &dyn KnowledgeBase,
    operators: &mut NameRegistryBuilder,
    municipalities: &NameRegistryBuilder,
    names: impl IntoIterator<Item = &'n str>,
) -> Result<usize, ClientError> {
    let unknown: BTreeSet<&str> = names
        .into_iter()
        .filter(|name| !operators.contains(name) && !municipalities.contains(name))
        .collect();

    let mut resolved = 0;
    for name in unknown {
        match kb.find_entity_by_label(name, LABEL_LANGUAGE)? {
            Some(id) => {
                warn!("Operator '{}' missing from the listing, resolved by label to {}", name, id);
                operators.register(name, id);
                resolved += 1;
            }
            None => error!("Operator '{}' could not be resolved to any item", name),
        }
    }
    Ok(resolved)
}

// ============================================================================
// RUN
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub records: usize,
    pub committed: usize,
    pub dry_run_noops: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub created_entities: usize,
    pub documents_written: usize,
}

impl RunReport {
    fn tally(&mut self, progress: &RecordProgress) {
        self.records += 1;
        match progress.state.as_str() {
            "Committed" => self.committed += 1,
            "DryRunNoop" => self.dry_run_noops += 1,
            "NoChange" => self.unchanged += 1,
            "Skipped" => self.skipped += 1,
            "Failed" => self.failed += 1,
            _ => {}
        }
        if progress.created_entity {
            self.created_entities += 1;
        }
        if progress.created_document || progress.updated_document {
            self.documents_written += 1;
        }
    }
}

/// Features of one feed file, with the object type they describe
struct LoadedFile<'c> {
    object_type: &'c ObjectType,
    path: PathBuf,
    features: Vec<Json>,
}

/// Run every configured source through the collaborators
pub fn run(
    config: &SyncConfig,
    kb: &dyn KnowledgeBase,
    documents: &dyn DocumentStore,
    ledger: &Ledger,
) -> Result<RunReport> {
    let published = config.run.publication_date;
    let retrieved = config.run.retrieved_date.unwrap_or_else(|| Utc::now().date_naive());

    let mut files = Vec::new();
    for source in &config.sources {
        for path in &source.files {
            let bytes = read_feed_bytes(path)?;
            let features = parse_features(&bytes, path)?;
            let digest = ledger.record_input(path, &bytes, features.len())?;
            info!("Read {} features from {} (sha256 {})", features.len(), path.display(), digest);
            files.push(LoadedFile {
                object_type: &source.object_type,
                path: path.clone(),
                features,
            });
        }
    }

    let operator_names: Vec<String> = files
        .iter()
        .flat_map(|f| f.features.iter())
        .filter_map(|feature| feature.pointer(&format!("/properties/{}", KEY_OPERATOR)))
        .filter_map(Json::as_str)
        .map(String::from)
        .collect();
    let tables = prepare_tables(config, kb, operator_names.iter().map(String::as_str))?;
    info!(
        "Lookup tables ready: {} operators, {} municipalities",
        tables.operators.len(),
        tables.municipalities.len()
    );

    let naming = TemplateNaming::new(config.sandbox_user()?);
    let sync = RecordSync::new(kb, documents, &naming, &config.vocabulary, &tables, config.dry_run);

    let mut report = RunReport::default();
    for file in files {
        info!("Processing {} ({})", file.path.display(), file.object_type.label);
        report_file(&sync, &file, published, retrieved, ledger, &mut report)?;
    }

    ledger.finish()?;
    Ok(report)
}

fn report_file(
    sync: &RecordSync<'_>,
    file: &LoadedFile<'_>,
    published: NaiveDate,
    retrieved: NaiveDate,
    ledger: &Ledger,
    report: &mut RunReport,
) -> Result<()> {
    for (index, feature) in file.features.iter().enumerate() {
        let progress = match SourceRecord::from_feature(feature.clone(), published, retrieved) {
            Ok(record) => sync
                .sync_record(file.object_type, &record)
                .with_context(|| format!("Run aborted at record {} of {}", record.id, file.path.display()))?,
            Err(err) => Tracker::new(&placeholder_id(feature, &file.path, index)).fail(&err),
        };
        ledger.record(&progress)?;
        report.tally(&progress);
    }
    Ok(())
}

/// Ledger key for a feature that never became a record: its id when it is
/// a non-empty string or a number, otherwise its position in the file.
fn placeholder_id(feature: &Json, path: &Path, index: usize) -> String {
    match feature.pointer(&format!("/properties/{}", KEY_ID)) {
        Some(Json::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Json::Number(n)) => n.to_string(),
        _ => format!("{}#{}", path.display(), index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryDocuments, InMemoryKnowledgeBase};
    use crate::fixtures::{nature_reserve, record_with, square};
    use crate::statement::Value;
    use serde_json::json;

    fn reserve(id: &str) -> SourceRecord {
        record_with(
            json!({
                "NVRID": id,
                "NAMN": "Bjurälven",
                "IKRAFTDAT": "1981/06/30",
                "IUCNKAT": "IV",
                "AREA_HA": 120.5
            }),
            Some(square(14.0, 58.0, 0.02)),
        )
    }

    fn driver<'a>(
        kb: &'a InMemoryKnowledgeBase,
        docs: &'a InMemoryDocuments,
        naming: &'a TemplateNaming,
        vocab: &'a Vocabulary,
        tables: &'a LookupTables,
        dry_run: bool,
    ) -> RecordSync<'a> {
        RecordSync::new(kb, docs, naming, vocab, tables, dry_run)
    }

    #[test]
    fn test_state_transitions() {
        assert!(RecordState::Resolving.can_move_to(RecordState::New));
        assert!(RecordState::ReadyToCommit.can_move_to(RecordState::DryRunNoop));
        assert!(RecordState::DeltaComputed.can_move_to(RecordState::Failed));
        assert!(!RecordState::NoChange.can_move_to(RecordState::Committed));
        assert!(!RecordState::Done.can_move_to(RecordState::Failed));
    }

    #[test]
    fn test_new_record_is_created_then_idempotent() {
        let (kb, docs) = (InMemoryKnowledgeBase::new(), InMemoryDocuments::new());
        let (vocab, tables, naming) = (Vocabulary::wikidata(), LookupTables::empty(), TemplateNaming::default());
        let sync = driver(&kb, &docs, &naming, &vocab, &tables, false);
        let object_type = nature_reserve();

        let first = sync.sync_record(&object_type, &reserve("2001234")).unwrap();
        assert_eq!(first.state, "Committed");
        assert!(first.created_entity);
        assert!(first.updated_entity);
        assert!(first.created_document);
        assert_eq!(kb.entity_count(), 1);

        let second = sync.sync_record(&object_type, &reserve("2001234")).unwrap();
        assert_eq!(second.state, "NoChange");
        assert!(!second.created_entity);
        assert_eq!(second.entity_id, first.entity_id);
        assert_eq!(kb.entity_count(), 1);
        assert_eq!(docs.saves(), 1);

        println!("✅ Create then no-op test PASSED");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (kb, docs) = (InMemoryKnowledgeBase::new(), InMemoryDocuments::new());
        let (vocab, tables, naming) = (Vocabulary::wikidata(), LookupTables::empty(), TemplateNaming::default());
        let sync = driver(&kb, &docs, &naming, &vocab, &tables, true);

        let progress = sync.sync_record(&nature_reserve(), &reserve("2001234")).unwrap();
        assert_eq!(progress.state, "DryRunNoop");
        assert!(!progress.created_entity);
        assert!(progress.created_statements.contains(&"P571".to_string()));
        assert!(!progress.created_document);
        assert!(!progress.updated_document);
        assert_eq!(kb.edits(), 0);
        assert_eq!(docs.saves(), 0);

        let ledger = Ledger::in_memory(true, true, "nature-registry-sync").unwrap();
        ledger.record(&progress).unwrap();
        let events = crate::db::get_events_for_entity(ledger.connection(), "record", "2001234").unwrap();
        assert!(events.is_empty());

        let mut report = RunReport::default();
        report.tally(&progress);
        assert_eq!(report.dry_run_noops, 1);
        assert_eq!(report.documents_written, 0);

        println!("✅ Dry run test PASSED");
    }

    #[test]
    fn test_ambiguous_identity_is_skipped() {
        let (kb, docs) = (InMemoryKnowledgeBase::new(), InMemoryDocuments::new());
        let (vocab, tables, naming) = (Vocabulary::wikidata(), LookupTables::empty(), TemplateNaming::default());
        for id in ["Q1", "Q2"] {
            kb.insert_entity(
                EntityId::new(id),
                vec![
                    Statement::new(&vocab.instance_of, Value::entity(&EntityId::new("Q179049"))),
                    Statement::new(&vocab.registry_id, Value::text("2001234")),
                ],
            );
        }
        let sync = driver(&kb, &docs, &naming, &vocab, &tables, false);

        let progress = sync.sync_record(&nature_reserve(), &reserve("2001234")).unwrap();
        assert!(progress.skipped);
        assert_eq!(progress.state, "Skipped");
        assert_eq!(kb.edits(), 0);
    }

    #[test]
    fn test_missing_inception_fails_only_the_record() {
        let (kb, docs) = (InMemoryKnowledgeBase::new(), InMemoryDocuments::new());
        let (vocab, tables, naming) = (Vocabulary::wikidata(), LookupTables::empty(), TemplateNaming::default());
        let sync = driver(&kb, &docs, &naming, &vocab, &tables, true);
        let record = record_with(json!({"NVRID": "2001235"}), None);

        let progress = sync.sync_record(&nature_reserve(), &record).unwrap();
        assert!(progress.failed());
        assert_eq!(progress.error.as_deref(), Some("no candidates for inception date found"));
    }

    #[test]
    fn test_unsupported_geometry_still_commits_properties() {
        let (kb, docs) = (InMemoryKnowledgeBase::new(), InMemoryDocuments::new());
        let (vocab, tables, naming) = (Vocabulary::wikidata(), LookupTables::empty(), TemplateNaming::default());
        let sync = driver(&kb, &docs, &naming, &vocab, &tables, false);
        let record = record_with(
            json!({"NVRID": "2001236", "IKRAFTDAT": "1990/01/01"}),
            Some(json!({"type": "LineString", "coordinates": [[14.0, 58.0], [14.1, 58.1]]})),
        );

        let progress = sync.sync_record(&nature_reserve(), &record).unwrap();
        assert_eq!(progress.state, "Committed");
        assert!(progress.error.as_deref().is_some_and(|e| e.contains("LineString")));
        assert!(progress.created_statements.contains(&"P571".to_string()));
    }

    #[test]
    fn test_malformed_geometry_still_commits_properties() {
        let (kb, docs) = (InMemoryKnowledgeBase::new(), InMemoryDocuments::new());
        let (vocab, tables, naming) = (Vocabulary::wikidata(), LookupTables::empty(), TemplateNaming::default());
        let sync = driver(&kb, &docs, &naming, &vocab, &tables, false);
        let record = record_with(
            json!({"NVRID": "2001237", "IKRAFTDAT": "1990/01/01"}),
            Some(json!({"type": "Polygon", "coordinates": "broken"})),
        );

        let progress = sync.sync_record(&nature_reserve(), &record).unwrap();
        assert_eq!(progress.state, "Committed");
        assert!(progress.error.is_some());
        assert!(progress.created_statements.contains(&"P571".to_string()));
        assert!(!progress.created_statements.contains(&"P625".to_string()));
        assert_eq!(docs.saves(), 0);
    }

    #[test]
    fn test_placeholder_id_for_unusable_ids() {
        let path = Path::new("reserves.geojson");
        let placeholder = |properties: Json| placeholder_id(&json!({"properties": properties}), path, 7);

        assert_eq!(placeholder(json!({"NVRID": " 2001234 "})), "2001234");
        assert_eq!(placeholder(json!({"NVRID": 2001234})), "2001234");
        assert_eq!(placeholder(json!({"NVRID": null})), "reserves.geojson#7");
        assert_eq!(placeholder(json!({"NVRID": ""})), "reserves.geojson#7");
        assert_eq!(placeholder(json!({"NVRID": ["x"]})), "reserves.geojson#7");
        assert_eq!(placeholder(json!({})), "reserves.geojson#7");
        assert_ne!(
            placeholder_id(&json!({"properties": {"NVRID": null}}), path, 1),
            placeholder_id(&json!({"properties": {"NVRID": null}}), path, 2)
        );
    }

    #[test]
    fn test_operator_resolution_by_label() {
        let kb = InMemoryKnowledgeBase::new();
        kb.insert_label("Skogsstyrelsen", "sv", EntityId::new("Q3118425"));
        let mut operators = NameRegistryBuilder::new("operator");
        let mut municipalities = NameRegistryBuilder::new("municipality");
        municipalities.register("Kiruna kommun", EntityId::new("Q1000"));

        let resolved = resolve_operators(
            &kb,
            &mut operators,
            &municipalities,
            ["Skogsstyrelsen", "Kiruna kommun", "Okänd förvaltare", "Skogsstyrelsen"],
        )
        .unwrap();

        assert_eq!(resolved, 1);
        let tables = LookupTables::new(operators.build(), municipalities.build());
        assert_eq!(tables.operator("Skogsstyrelsen"), Some(&EntityId::new("Q3118425")));
        assert_eq!(tables.operator("Okänd förvaltare"), None);
    }
}
