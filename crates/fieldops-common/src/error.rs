//! Error types for FieldOps

use thiserror::Error;

/// Document store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Document does not exist
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Create-if-absent found an existing document
    #[error("document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    /// Query needs a composite index the store does not have
    #[error("missing index on {collection}: {fields}")]
    IndexMissing { collection: String, fields: String },

    /// Field path cannot hold the requested value
    #[error("invalid field path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Backend failure (connection, quota, injected fault)
    #[error("store backend error: {0}")]
    Backend(String),

    /// Document (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// FieldOps error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldOpsError {
    /// No principal is attached to the request
    #[error("unauthenticated")]
    Unauthenticated,

    /// Principal resolved but lacks membership in the record's tenant
    #[error("access denied")]
    AccessDenied,

    /// Entity absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Request is missing required context or carries forbidden fields
    #[error("validation error: {0}")]
    Validation(String),

    /// A statistics write failed
    #[error("aggregation failure: {0}")]
    AggregationFailure(String),

    /// An analytics query lacks a backing index
    #[error("index missing: {0}")]
    IndexMissing(String),

    /// Configuration file unreadable or out of range
    #[error("config error: {0}")]
    Config(String),

    /// Store error surfaced as-is
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FieldOpsError {
    /// Message safe to show an end user.
    ///
    /// Denied access renders exactly like a missing record so callers cannot
    /// discover whether another tenant's record exists.
    pub fn public_message(&self) -> String {
        match self {
            Self::AccessDenied | Self::NotFound(_) => "not found".to_string(),
            Self::Store(StoreError::NotFound { .. }) => "not found".to_string(),
            Self::Unauthenticated => "authentication required".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::AggregationFailure(_)
            | Self::IndexMissing(_)
            | Self::Config(_)
            | Self::Store(_) => "internal error".to_string(),
        }
    }

    /// Statistics errors that the triggering boundary swallows.
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::AggregationFailure(_) | Self::IndexMissing(_))
    }
}

/// Result type for FieldOps
pub type FieldOpsResult<T> = Result<T, FieldOpsError>;
