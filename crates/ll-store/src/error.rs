use thiserror::Error;

/// Store error type.
///
/// Storage failures surface loudly; a cache miss or an audit finding is
/// data, never an error.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A branch, event, entity, or document was required and absent.
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// Branch naming conflict on fork/create.
    #[error("branch already exists: {0}")]
    BranchExists(String),

    /// Two writers raced to advance the same branch head.
    #[error("branch head moved (expected {expected:?}, found {actual:?})")]
    HeadConflict { expected: Option<String>, actual: Option<String> },

    /// A parent pointer cycle or dangling parent in the event chain.
    /// Fatal: history can no longer be replayed.
    #[error("corrupt history: {0}")]
    CorruptHistory(String),

    /// Malformed stored data (bad JSON column, unknown event kind, ...).
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
