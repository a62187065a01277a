//! Typed errors returned by adapter code.

use thiserror::Error;

/// Errors an adapter (or its constructor, initializer or operation handler) can report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdapterError {
    /// The zero-argument constructor could not build an instance.
    #[error("Adapter construction failed: {0}")]
    ConstructionFailed(String),

    /// The lifecycle initializer failed.
    #[error("Adapter initialization failed: {0}")]
    InitFailed(String),

    /// Releasing adapter resources failed.
    #[error("Adapter disposal failed: {0}")]
    DisposeFailed(String),

    /// An operation dispatched to the adapter failed.
    #[error("Adapter operation failed: {0}")]
    OperationFailed(String),

    /// No operation handler was supplied to the loader.
    #[error("Adapter operation not supported: no operation handler configured")]
    OperationNotSupported,

    /// An I/O error surfaced inside the adapter.
    #[error("Adapter I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for errors that don't fit the above categories.
    #[error("{0}")]
    Other(String),
}
