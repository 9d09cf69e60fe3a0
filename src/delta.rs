// ⚖️ Statement Delta Engine - Compare local facts against the remote entity
//
// Property by property, decide whether the remote side already reflects a
// local fact or needs a new dated assertion.
//
// Append-only: a changed fact produces a NEW statement and the old one
// stays as history. The one exception is a qualifier slot (area applies to
// land/forest/water/total), where the superseded slot statement is
// replaced.
//
// Every statement placed in `to_add` carries the provenance bundle; every
// statement placed in `to_delete` was read from the remote snapshot.

use crate::entities::{CategoryResolution, LookupTables};
use crate::error::RecordError;
use crate::feed::{AreaPart, ObjectType, SourceRecord};
use crate::reference::{cite, provenance_reference};
use crate::statement::{KnowledgeBaseEntity, PropertyId, Reference, Snak, Statement, Value};
use crate::vocabulary::Vocabulary;
use tracing::{debug, warn};

// ============================================================================
// DELTA RESULT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaResult {
    pub to_add: Vec<Statement>,
    pub to_delete: Vec<Statement>,
}

impl DeltaResult {
    pub fn new() -> Self {
        DeltaResult::default()
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_delete.is_empty()
    }

    /// Properties of the statements to add, in order (for the ledger)
    pub fn added_properties(&self) -> Vec<String> {
        self.to_add.iter().map(|s| s.property.to_string()).collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.to_delete.iter().filter_map(|s| s.id.clone()).collect()
    }
}

// ============================================================================
// EQUALITY POLICY
// ============================================================================

/// Exact equality, with area quantities compared in hectares.
///
/// No tolerance here; fuzzy matching is reserved for coordinates.
pub fn exact_equality(vocab: &Vocabulary, remote: &Snak, local: &Snak) -> bool {
    match (remote, local) {
        (
            Snak::Value(Value::Quantity { amount: a, unit: ua }),
            Snak::Value(Value::Quantity { amount: b, unit: ub }),
        ) => match (vocab.to_hectares(*a, ua.as_ref()), vocab.to_hectares(*b, ub.as_ref())) {
            (Some(x), Some(y)) => x == y,
            _ => a == b && ua == ub,
        },
        _ => remote == local,
    }
}

// ============================================================================
// EVALUATION (one record, one pass)
// ============================================================================

/// Working state while one record is compared against one entity snapshot
pub struct Evaluation<'r> {
    vocab: &'r Vocabulary,
    record: &'r SourceRecord,
    entity: &'r KnowledgeBaseEntity,
    reference: Reference,
    result: DeltaResult,
}

impl<'r> Evaluation<'r> {
    pub fn new(
        vocab: &'r Vocabulary,
        object_type: &ObjectType,
        record: &'r SourceRecord,
        entity: &'r KnowledgeBaseEntity,
    ) -> Self {
        Evaluation {
            vocab,
            record,
            entity,
            reference: provenance_reference(record, object_type, vocab),
            result: DeltaResult::new(),
        }
    }

    pub fn vocab(&self) -> &'r Vocabulary {
        self.vocab
    }

    pub fn record(&self) -> &'r SourceRecord {
        self.record
    }

    pub fn entity(&self) -> &'r KnowledgeBaseEntity {
        self.entity
    }

    /// Build a fully referenced statement
    pub fn statement(&self, property: &PropertyId, snak: impl Into<Snak>) -> Statement {
        cite(Statement::new(property, snak), &self.reference)
    }

    /// Queue a statement for addition. It is (re)cited first.
    pub fn add(&mut self, statement: Statement) {
        debug!("Will add {} statement", statement.property);
        self.result.to_add.push(cite(statement, &self.reference));
    }

    /// Queue a remote statement for deletion. Unlinked statements are refused.
    fn delete(&mut self, statement: &Statement) -> bool {
        if !statement.is_linked() {
            return false;
        }
        debug!("Will delete {} statement {:?}", statement.property, statement.id);
        self.result.to_delete.push(statement.clone());
        true
    }

    /// Statements for `property` queued so far in this pass
    pub fn pending_additions<'a>(&'a self, property: &'a PropertyId) -> impl Iterator<Item = &'a Statement> + 'a {
        self.result.to_add.iter().filter(move |s| &s.property == property)
    }

    pub fn extend(&mut self, additions: Vec<Statement>) {
        for statement in additions {
            self.add(statement);
        }
    }

    /// Compare against the most recently published remote statement for
    /// `property`; add `local` when there is none or it differs.
    pub fn evaluate_simple(
        &mut self,
        property: &PropertyId,
        local: Snak,
        equal: impl Fn(&Snak, &Snak) -> bool,
    ) -> bool {
        let unchanged = self
            .entity
            .most_recent_published(property, &self.vocab.publication_date)
            .map(|remote| equal(&remote.snak, &local))
            .unwrap_or(false);

        if unchanged {
            debug!("{} unchanged", property);
            return false;
        }
        let statement = self.statement(property, local);
        self.add(statement);
        true
    }

    /// Like `evaluate_simple`, restricted to the slot `qualifier = slot`
    /// (`None` = statements without that qualifier). A differing remote slot
    /// statement is replaced.
    pub fn evaluate_qualified(
        &mut self,
        property: &PropertyId,
        qualifier: &PropertyId,
        slot: Option<Value>,
        local: Snak,
        equal: impl Fn(&Snak, &Snak) -> bool,
    ) -> bool {
        let (entity, vocab) = (self.entity, self.vocab);
        let remote = entity.most_recent_in_slot(property, qualifier, slot.as_ref(), &vocab.publication_date);

        if let Some(remote) = remote {
            if equal(&remote.snak, &local) {
                debug!("{} unchanged in slot {:?}", property, slot);
                return false;
            }
            self.delete(remote);
        }

        let mut statement = self.statement(property, local);
        if let Some(slot) = slot {
            statement = statement.with_qualifier(qualifier, slot);
        }
        self.add(statement);
        true
    }

    /// Repeatable property: add `local` unless some remote or already queued
    /// statement carries it.
    pub fn evaluate_member(&mut self, property: &PropertyId, local: Value) -> bool {
        let present = self
            .entity
            .remote_statements(property)
            .chain(self.pending_additions(property))
            .any(|s| s.value() == Some(&local));

        if present {
            return false;
        }
        let statement = self.statement(property, local);
        self.add(statement);
        true
    }

    pub fn result(&self) -> &DeltaResult {
        &self.result
    }

    pub fn finish(self) -> DeltaResult {
        self.result
    }
}

// ============================================================================
// DELTA ENGINE
// ============================================================================

/// Evaluates every tracked property of a record. Holds only read-only
/// startup state, so one engine serves every record of a run.
pub struct DeltaEngine<'a> {
    vocab: &'a Vocabulary,
    tables: &'a LookupTables,
    object_type: &'a ObjectType,
}

impl<'a> DeltaEngine<'a> {
    pub fn new(vocab: &'a Vocabulary, tables: &'a LookupTables, object_type: &'a ObjectType) -> Self {
        DeltaEngine {
            vocab,
            tables,
            object_type,
        }
    }

    pub fn object_type(&self) -> &'a ObjectType {
        self.object_type
    }

    /// A not-yet-created entity holding exactly the two identifying
    /// statements: instance of the object type, and the registry id.
    pub fn bootstrap_entity(&self, record: &SourceRecord) -> KnowledgeBaseEntity {
        let reference = provenance_reference(record, self.object_type, self.vocab);
        KnowledgeBaseEntity::Pending {
            statements: vec![
                cite(
                    Statement::new(&self.vocab.instance_of, Value::entity(&self.object_type.entity)),
                    &reference,
                ),
                cite(
                    Statement::new(&self.vocab.registry_id, Value::text(record.id.clone())),
                    &reference,
                ),
            ],
        }
    }

    pub fn begin<'r>(&'r self, record: &'r SourceRecord, entity: &'r KnowledgeBaseEntity) -> Evaluation<'r> {
        Evaluation::new(self.vocab, self.object_type, record, entity)
    }

    /// Evaluate every non-geometry property. Stops at the first record-fatal
    /// condition; anomalies only skip their own property.
    pub fn evaluate_properties(&self, eval: &mut Evaluation<'_>) -> Result<(), RecordError> {
        self.evaluate_inception(eval)?;
        self.evaluate_category(eval);
        self.evaluate_country(eval);
        self.evaluate_operator(eval);
        self.evaluate_municipalities(eval);
        self.evaluate_areas(eval);
        Ok(())
    }

    /// Convenience: begin, evaluate properties, finish
    pub fn evaluate(&self, record: &SourceRecord, entity: &KnowledgeBaseEntity) -> Result<DeltaResult, RecordError> {
        let mut eval = self.begin(record, entity);
        self.evaluate_properties(&mut eval)?;
        Ok(eval.finish())
    }

    fn equality(&self) -> impl Fn(&Snak, &Snak) -> bool + 'a {
        let vocab = self.vocab;
        move |remote: &Snak, local: &Snak| exact_equality(vocab, remote, local)
    }

    fn evaluate_inception(&self, eval: &mut Evaluation<'_>) -> Result<(), RecordError> {
        let inception = eval.record().inception_date()?;
        eval.evaluate_simple(&self.vocab.inception, Value::Time(inception).into(), self.equality());
        Ok(())
    }

    fn evaluate_category(&self, eval: &mut Evaluation<'_>) {
        let raw = eval.record().category_code();
        let local = match self.tables.category(raw.as_deref()) {
            CategoryResolution::Absent => return,
            CategoryResolution::Unrecognized(code) => {
                warn!(
                    "Unsupported IUCN category '{}' in record {}; category statements will not be touched",
                    code,
                    eval.record().id
                );
                return;
            }
            CategoryResolution::NotApplicable => Snak::NoValue,
            CategoryResolution::Category(category) => Value::Entity(category.entity()).into(),
        };
        eval.evaluate_simple(&self.vocab.iucn_category, local, self.equality());
    }

    fn evaluate_country(&self, eval: &mut Evaluation<'_>) {
        eval.evaluate_simple(
            &self.vocab.country,
            Value::entity(&self.vocab.country_item).into(),
            self.equality(),
        );
    }

    fn evaluate_operator(&self, eval: &mut Evaluation<'_>) {
        let Some(name) = eval.record().operator_name() else {
            return;
        };
        match self.tables.operator(&name) {
            Some(operator) => {
                eval.evaluate_simple(&self.vocab.operator, Value::entity(operator).into(), self.equality());
            }
            None => warn!(
                "Unable to look up operator '{}' for record {}; operator statements will not be touched",
                name,
                eval.record().id
            ),
        }
    }

    fn evaluate_municipalities(&self, eval: &mut Evaluation<'_>) {
        for name in eval.record().municipality_names() {
            match self.tables.municipality(&name) {
                Some(municipality) => {
                    eval.evaluate_member(&self.vocab.located_in, Value::entity(municipality));
                }
                None => warn!(
                    "Unable to look up municipality '{}' for record {}",
                    name,
                    eval.record().id
                ),
            }
        }
    }

    fn area_slot(&self, part: AreaPart) -> Option<Value> {
        match part {
            AreaPart::Total => None,
            AreaPart::Land => Some(Value::entity(&self.vocab.land)),
            AreaPart::Forest => Some(Value::entity(&self.vocab.forest)),
            AreaPart::Water => Some(Value::entity(&self.vocab.body_of_water)),
        }
    }

    fn evaluate_areas(&self, eval: &mut Evaluation<'_>) {
        for part in AreaPart::ALL {
            let Some(hectares) = eval.record().area_hectares(part) else {
                debug!("No {} in record {}", part.feed_key(), eval.record().id);
                continue;
            };
            let local = Value::Quantity {
                amount: hectares,
                unit: Some(self.vocab.hectare.clone()),
            };
            eval.evaluate_qualified(
                &self.vocab.area,
                &self.vocab.applies_to_part,
                self.area_slot(part),
                local.into(),
                self.equality(),
            );
        }
    }
}
