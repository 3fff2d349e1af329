//! Error taxonomy shared by every layer of the engine.

use thiserror::Error;

/// The stable error kind surfaced to callers of the admin facade (spec §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    SchemaViolation,
    ParseError,
    Unsupported,
    Conflict,
    Timeout,
    Cancelled,
    ResourceExhausted,
    StorageFailed,
    Internal,
}

/// Engine-wide error type. One variant per failure mode, each carrying the
/// structured context needed to rebuild the `{kind, message, details}` triple
/// the admin facade returns (spec §6).
#[derive(Error, Debug, Clone)]
pub enum ThemisError {
    #[error("entity '{table}/{pk}' not found")]
    EntityNotFound { table: String, pk: String },

    #[error("index '{kind}' on {table}.{column} not found")]
    IndexNotFound {
        table: String,
        column: String,
        kind: String,
    },

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("index '{kind}' on {table}.{column} already exists with a different configuration")]
    IndexAlreadyExists {
        table: String,
        column: String,
        kind: String,
    },

    #[error("field '{field}' missing from entity in table '{table}'")]
    MissingField { table: String, field: String },

    #[error("vector dimension mismatch on {table}.{column}: expected {expected}, got {got}")]
    VectorDimensionMismatch {
        table: String,
        column: String,
        expected: u32,
        got: u32,
    },

    #[error("value of kind {got} is not valid for {context}, expected {expected}")]
    ValueKindMismatch {
        context: String,
        expected: String,
        got: String,
    },

    #[error("parse error at line {line}, column {column}: {message}")]
    ParseError {
        line: u32,
        column: u32,
        message: String,
        token: Option<String>,
    },

    #[error("unsupported feature: {0}")]
    Unsupported(String),

    #[error("write-write conflict on transaction {tx_id} at key '{key}'")]
    Conflict { tx_id: u64, key: String },

    #[error("{what} timed out after {elapsed_ms}ms")]
    Timeout { what: String, elapsed_ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("storage failure: {0}")]
    StorageFailed(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl ThemisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ThemisError::EntityNotFound { .. }
            | ThemisError::IndexNotFound { .. }
            | ThemisError::TableNotFound(_) => ErrorKind::NotFound,
            ThemisError::IndexAlreadyExists { .. } => ErrorKind::AlreadyExists,
            ThemisError::MissingField { .. }
            | ThemisError::VectorDimensionMismatch { .. }
            | ThemisError::ValueKindMismatch { .. } => ErrorKind::SchemaViolation,
            ThemisError::ParseError { .. } => ErrorKind::ParseError,
            ThemisError::Unsupported(_) => ErrorKind::Unsupported,
            ThemisError::Conflict { .. } => ErrorKind::Conflict,
            ThemisError::Timeout { .. } => ErrorKind::Timeout,
            ThemisError::Cancelled => ErrorKind::Cancelled,
            ThemisError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            ThemisError::StorageFailed(_) => ErrorKind::StorageFailed,
            ThemisError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// `true` for errors that occur before any mutation took place, meaning
    /// the transaction manager does not need to roll back on account of them
    /// (spec §7 propagation rule).
    pub fn precedes_mutation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::ParseError
        )
    }
}

impl From<sled::Error> for ThemisError {
    fn from(e: sled::Error) -> Self {
        ThemisError::StorageFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ThemisError>;
