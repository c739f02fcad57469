use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A read or update addressed a document that does not exist.
    #[error("Document not found")]
    NotFound,

    /// A document failed validation at the mapping boundary.
    #[error("Malformed document {collection}/{id}: {reason}")]
    Malformed {
        collection: String,
        id: String,
        reason: String,
    },

    /// The query combines a filter and an ordering that need a composite
    /// index which has not been registered.  Callers fall back to an
    /// unordered fetch plus a client-side sort.
    #[error("Query requires a composite index: {0}")]
    MissingIndex(String),

    /// The store could not be reached.  Safe to retry with backoff.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store handle has been shut down.
    #[error("Store connection closed")]
    Closed,
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
