//! Loader notifications

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::LoaderError;
use crate::handle::AdapterHandle;

/// Description of a candidate type that failed to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateInfo {
    /// Type name as reported by discovery
    pub type_name: String,
    /// Binary the type came from
    pub binary: Option<PathBuf>,
}

/// Events raised to the owning application
#[non_exhaustive]
pub enum LoaderEvent<T: ?Sized> {
    /// Instance constructed, not yet initialized or registered
    AdapterCreated { adapter: AdapterHandle<T> },
    /// Instance registered and visible to the operation queue
    AdapterLoaded { adapter: AdapterHandle<T> },
    /// Instance removed from the registry
    AdapterUnloaded { adapter: AdapterHandle<T> },
    /// Candidate type could not be instantiated or initialized
    AdapterLoadFailed {
        candidate: CandidateInfo,
        error: Arc<LoaderError>,
    },
    /// Operation handler failed for one adapter
    OperationFailed {
        adapter: AdapterHandle<T>,
        error: Arc<LoaderError>,
    },
}

impl<T: ?Sized> LoaderEvent<T> {
    /// Adapter the event refers to, if any
    pub fn adapter(&self) -> Option<&AdapterHandle<T>> {
        match self {
            Self::AdapterCreated { adapter }
            | Self::AdapterLoaded { adapter }
            | Self::AdapterUnloaded { adapter }
            | Self::OperationFailed { adapter, .. } => Some(adapter),
            Self::AdapterLoadFailed { .. } => None,
        }
    }

    /// Short event name, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AdapterCreated { .. } => "adapter_created",
            Self::AdapterLoaded { .. } => "adapter_loaded",
            Self::AdapterUnloaded { .. } => "adapter_unloaded",
            Self::AdapterLoadFailed { .. } => "adapter_load_failed",
            Self::OperationFailed { .. } => "operation_failed",
        }
    }
}

impl<T: ?Sized> Clone for LoaderEvent<T> {
    fn clone(&self) -> Self {
        match self {
            Self::AdapterCreated { adapter } => Self::AdapterCreated {
                adapter: adapter.clone(),
            },
            Self::AdapterLoaded { adapter } => Self::AdapterLoaded {
                adapter: adapter.clone(),
            },
            Self::AdapterUnloaded { adapter } => Self::AdapterUnloaded {
                adapter: adapter.clone(),
            },
            Self::AdapterLoadFailed { candidate, error } => Self::AdapterLoadFailed {
                candidate: candidate.clone(),
                error: Arc::clone(error),
            },
            Self::OperationFailed { adapter, error } => Self::OperationFailed {
                adapter: adapter.clone(),
                error: Arc::clone(error),
            },
        }
    }
}

impl<T: ?Sized> fmt::Debug for LoaderEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterLoadFailed { candidate, error } => f
                .debug_struct("AdapterLoadFailed")
                .field("candidate", candidate)
                .field("error", error)
                .finish(),
            Self::OperationFailed { adapter, error } => f
                .debug_struct("OperationFailed")
                .field("adapter", adapter)
                .field("error", error)
                .finish(),
            other => f
                .debug_struct(other.kind())
                .field("adapter", &other.adapter())
                .finish(),
        }
    }
}

/// Receiving end of a loader event subscription
///
/// Every subscriber gets its own unbounded channel, so a slow reader never
/// loses notifications. The stream ends once the loader is dropped.
pub type EventReceiver<T> = mpsc::UnboundedReceiver<LoaderEvent<T>>;

/// Fan-out of loader events to every live subscriber
pub(crate) struct EventSink<T: ?Sized> {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<LoaderEvent<T>>>>>,
}

impl<T: ?Sized> EventSink<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn subscribe(&self) -> EventReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send an event to every subscriber, forgetting the ones that went away
    pub(crate) fn emit(&self, event: LoaderEvent<T>) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: ?Sized> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}
