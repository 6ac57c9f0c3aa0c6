use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored document body could not be encoded or decoded.
    #[error("Document encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store refused a write.
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Terminal failure of a live subscription.
///
/// Delivered at most once, as the last item of a subscription.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Subscription to {query} failed: {reason}")]
pub struct SubscriptionError {
    pub query: String,
    pub reason: String,
}

impl SubscriptionError {
    pub fn new(query: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self {
            query: query.to_string(),
            reason: reason.into(),
        }
    }
}
