// 🌐 Remote collaborators - Knowledge base and document store
//
// The reconciliation core only ever talks to these two traits. Every call
// blocks; a failure comes back as ClientError and is never retried here.

pub mod http;
pub mod mediawiki;
pub mod memory;
pub mod wikibase;

pub use http::ApiClient;
pub use mediawiki::MediaWikiDocuments;
pub use memory::{InMemoryDocuments, InMemoryKnowledgeBase};
pub use wikibase::WikibaseClient;

use crate::error::ClientError;
use crate::statement::{EntityId, KnowledgeBaseEntity, PropertyId, Statement};

// ============================================================================
// KNOWLEDGE BASE
// ============================================================================

pub trait KnowledgeBase {
    /// Snapshot of an entity, None if it does not exist
    fn get_entity(&self, id: &EntityId) -> Result<Option<KnowledgeBaseEntity>, ClientError>;

    /// Entities that are an instance of `object_type` and carry
    /// `property = value`. At most two are returned; the caller only needs
    /// to tell 0, 1 and "more than one" apart.
    fn find_unique_entity_by_property(
        &self,
        object_type: &EntityId,
        property: &PropertyId,
        value: &str,
    ) -> Result<Vec<EntityId>, ClientError>;

    fn create_entity(&self, statements: &[Statement], summary: &str) -> Result<EntityId, ClientError>;

    fn update_entity(
        &self,
        id: &EntityId,
        to_add: &[Statement],
        to_delete: &[Statement],
        summary: &str,
    ) -> Result<(), ClientError>;

    /// The single entity whose label in `language` is exactly `label`
    fn find_entity_by_label(&self, label: &str, language: &str) -> Result<Option<EntityId>, ClientError>;
}

// ============================================================================
// DOCUMENT STORE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteDocument {
    pub exists: bool,
    pub text: Option<String>,
    pub revision_id: Option<u64>,
}

impl RemoteDocument {
    pub fn missing() -> Self {
        RemoteDocument::default()
    }
}

pub trait DocumentStore {
    fn get_document(&self, name: &str) -> Result<RemoteDocument, ClientError>;

    fn save_document(&self, name: &str, text: &str, summary: &str) -> Result<(), ClientError>;
}
