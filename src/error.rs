//! Error types for the document store.

use thiserror::Error;

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, DocStoreError>;

/// Document store error types. One variant group per spec error category.
#[derive(Error, Debug)]
pub enum DocStoreError {
    // Not-found
    #[error("document not found: {0}")]
    DocumentNotFound(u64),

    #[error("collection not found: {0}")]
    CollectionNotFound(u64),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    // Already-exists
    #[error("document already exists: {0}")]
    DocumentAlreadyExists(u64),

    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    // Validation
    #[error("document validation failed: {0}")]
    Validation(String),

    // Storage
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage corruption detected: {0}")]
    Corruption(String),

    #[error("block allocation failed: {0}")]
    BlockAllocation(String),

    #[error("storage error: {0}")]
    Storage(String),

    // Index
    #[error("index error: {0}")]
    Index(String),

    // Query
    #[error("query error: {0}")]
    Query(String),

    // Concurrency
    #[error("lock acquisition failed: {0}")]
    LockAcquisition(String),

    #[error("async update queue is full")]
    QueueFull,

    // Transaction
    #[error("transaction {0} aborted: {1}")]
    TransactionAborted(u64, String),

    #[error("deadlock detected in transaction {0}")]
    Deadlock(u64),

    // Configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for DocStoreError {
    fn from(e: serde_json::Error) -> Self {
        DocStoreError::Corruption(e.to_string())
    }
}

impl DocStoreError {
    /// The spec error category this error belongs to.
    pub fn category(&self) -> &'static str {
        match self {
            DocStoreError::DocumentNotFound(_)
            | DocStoreError::CollectionNotFound(_)
            | DocStoreError::IndexNotFound(_) => "not-found",
            DocStoreError::DocumentAlreadyExists(_)
            | DocStoreError::CollectionAlreadyExists(_)
            | DocStoreError::IndexAlreadyExists(_) => "already-exists",
            DocStoreError::Validation(_) => "validation",
            DocStoreError::Io(_)
            | DocStoreError::Corruption(_)
            | DocStoreError::BlockAllocation(_)
            | DocStoreError::Storage(_) => "storage",
            DocStoreError::Index(_) => "index",
            DocStoreError::Query(_) => "query",
            DocStoreError::LockAcquisition(_) | DocStoreError::QueueFull => "concurrency",
            DocStoreError::TransactionAborted(_, _) | DocStoreError::Deadlock(_) => "transaction",
            DocStoreError::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_match_spec_groups() {
        assert_eq!(DocStoreError::DocumentNotFound(1).category(), "not-found");
        assert_eq!(DocStoreError::Deadlock(1).category(), "transaction");
        assert_eq!(DocStoreError::QueueFull.category(), "concurrency");
    }
}
