//! Error taxonomy shared by every Tiered Memory Engine component.
//!
//! Kinds, not exception hierarchies: each variant is one of the taxonomy
//! entries from the engine's error-handling design (InvalidInput, NotFound,
//! InvalidTransition, Transient, StorageFailed, Internal).

use thiserror::Error;

/// The engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Fails fast: empty content, wrong embedding dimension, invalid config.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Surfaced to the caller; idempotent deletes swallow this internally.
    #[error("not found: {0}")]
    NotFound(String),

    /// A requested tier transition does not satisfy the target tier's
    /// minimum-importance predicate.
    #[error("invalid tier transition: {0}")]
    InvalidTransition(String),

    /// Retryable failure from a gateway or embedder call (timeout, transient
    /// I/O). The Lifecycle Manager retries these with exponential backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// Non-retryable gateway failure.
    #[error("storage failed: {0}")]
    StorageFailed(String),

    /// A collection name the gateway does not recognize.
    #[error("collection missing: {0}")]
    CollectionMissing(String),

    /// An embedding whose length does not match the configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Programming errors / invariant violations. Logged with context;
    /// never surfaced to callers with internal detail.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the Lifecycle Manager's retry loop should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
