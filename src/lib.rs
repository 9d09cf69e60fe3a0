// Nature Registry Sync - Core Library
// Reconciles the Swedish protected area registry with a Wikibase knowledge
// base and its shape documents. Exposes all modules for the CLI and tests.

pub mod statement;      // Statement model: values, snaks, references, entities
pub mod vocabulary;     // Named properties and items, built once
pub mod reference;      // Provenance bundle on every new statement
pub mod delta;          // Statement Delta Engine
pub mod geometry;       // Closed geometry union, centroid, containment, distance
pub mod geoshape;       // Geometry Projection: point, zoom, shape documents
pub mod entities;       // Read-only lookup tables
pub mod feed;           // GeoJSON features → SourceRecord
pub mod client;         // Knowledge base and document store collaborators
pub mod sync;           // Per-record state machine and run loop
pub mod db;             // SQLite run ledger
pub mod config;         // TOML config + environment credentials
pub mod error;          // Record-fatal vs infrastructure errors

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export commonly used types
pub use statement::{
    EntityId, PropertyId, Value, Snak, Statement, Reference, KnowledgeBaseEntity, GlobeCoordinate,
};
pub use vocabulary::Vocabulary;
pub use delta::{DeltaEngine, DeltaResult, Evaluation, exact_equality};
pub use geometry::{Geometry, Coord, arc_distance_km};
pub use geoshape::{
    GeometryProjector, ShapeDocument, DocumentSync, Projection, ArticleNaming, TemplateNaming,
    representative_point, evaluate_zoom, zoom_for_diagonal_km, documents_equal,
};
pub use entities::{LookupTables, NameRegistry, NameRegistryBuilder, CategoryResolution, IucnCategory};
pub use feed::{ObjectType, SourceRecord, AreaPart};
pub use client::{KnowledgeBase, DocumentStore, RemoteDocument};
pub use sync::{RecordSync, RecordState, RunReport};
pub use db::{Ledger, RecordProgress, RunSummary, Event};
pub use config::SyncConfig;
pub use error::{RecordError, ClientError, SyncError, SyncResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
