//! Error types for coordination operations.

use thiserror::Error;

use crate::request::RequestId;

/// Errors that can occur while coordinating file access.
#[derive(Error, Debug)]
pub enum CoordError {
    /// The coordinator is not running (never started, or already shut down).
    #[error("coordinator is not running")]
    NotInitialized,

    /// Naming resolution could not produce a usable path.
    #[error("invalid file metadata: {0}")]
    InvalidMetadata(String),

    /// Operation attempted before the grant for this request arrived.
    #[error("grant has not arrived yet")]
    NotReady,

    /// Transaction API misuse: no transaction is active on this handle.
    #[error("no active transaction on this handle")]
    NoActiveTransaction,

    /// Transaction API misuse: a transaction is already active on this
    /// handle. Nested transactions are not supported.
    #[error("a transaction is already active on this handle")]
    TransactionActive,

    /// A release referenced a request id the coordinator does not track.
    ///
    /// Duplicate and late releases are an expected race in an asynchronous
    /// system; the coordinator logs and ignores them instead of failing.
    #[error("unknown request id: {0}")]
    UnknownRequest(RequestId),

    /// Message transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Pass-through I/O error from the file-I/O collaborator.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoordError {
    /// Builds a transport error from a plain message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into().into())
    }
}

/// Result type for coordination operations.
pub type CoordResult<T> = Result<T, CoordError>;
