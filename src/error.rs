// 🚨 Error Taxonomy - What stops a record vs. what stops the run
//
// Three kinds of trouble:
// 1. Fatal-per-record  → RecordError, caught at the record boundary
// 2. Anomaly           → not an error at all, a warn! and a skipped property
// 3. Infrastructure    → ClientError, aborts the whole run

use thiserror::Error;

// ============================================================================
// RECORD ERRORS (fatal for one record, the run continues)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("record has no unique id")]
    MissingId,

    #[error("no candidates for inception date found")]
    NoInceptionDate,

    #[error("unparseable date '{value}' in property {property}")]
    InvalidDate { property: String, value: String },

    #[error("unable to find a representative point inside of the geometry")]
    NoContainedPoint,

    #[error("unsupported geometry kind: {0}")]
    UnsupportedGeometry(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("delta on multiple coordinate locations is not implemented ({existing} existing)")]
    MultiLocationNotImplemented { existing: usize },

    #[error("shape document could not be serialized: {0}")]
    ShapeDocument(String),
}

// ============================================================================
// CLIENT ERRORS (infrastructure, never retried by the core)
// ============================================================================

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("remote API error {code}: {info}")]
    Api { code: String, info: String },

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

// ============================================================================
// SYNC ERROR (what the driver sees)
// ============================================================================

#[derive(Debug, Error)]
pub enum SyncError {
    /// Logged, record marked failed, next record proceeds
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Aborts the run
    #[error("infrastructure failure: {0}")]
    Infrastructure(#[from] ClientError),
}

impl SyncError {
    pub fn is_record_fatal(&self) -> bool {
        matches!(self, SyncError::Record(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
