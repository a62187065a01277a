//! Loader error types

use std::any::Any;
use std::path::PathBuf;

use tessera_kernel::AdapterError;
use tessera_kernel::config::ConfigError;

/// Errors raised by the adapter loader.
///
/// `Discovery`, `Instantiation`, `LifecycleInit` and `OperationDispatch` are
/// per-item failures: they are logged or reported through loader events and never
/// abort sibling work. The remaining variants come out of loader setup or
/// teardown and are returned to the caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoaderError {
    #[error("Failed to load adapter binary {binary:?}: {reason}")]
    Discovery { binary: PathBuf, reason: String },

    #[error("Failed to instantiate adapter type {type_name}: {source}")]
    Instantiation {
        type_name: String,
        #[source]
        source: AdapterError,
    },

    #[error("Adapter {type_name} failed to initialize: {source}")]
    LifecycleInit {
        type_name: String,
        #[source]
        source: AdapterError,
    },

    #[error("Operation failed on adapter {adapter}: {source}")]
    OperationDispatch {
        adapter: String,
        #[source]
        source: AdapterError,
    },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Adapter loader has been disposed")]
    Disposed,
}

/// Result type for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;

impl LoaderError {
    pub(crate) fn discovery(binary: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Discovery {
            binary: binary.into(),
            reason: reason.to_string(),
        }
    }
}

/// Extract a readable message from a caught panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}
