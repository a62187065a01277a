//! Adapter registry
//!
//! Ordered collection of live adapters. Every mutation and every compound
//! read-then-act sequence runs under one exclusive lock, and registry events are
//! sent while that lock is held so subscribers see them in mutation order.

use std::ops::Deref;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tessera_kernel::Adapter;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{LoaderError, LoaderResult, panic_message};
use crate::event::{EventSink, LoaderEvent};
use crate::handle::AdapterHandle;

struct RegistryState<T: ?Sized> {
    adapters: Vec<AdapterHandle<T>>,
    /// `None` once notifications are detached
    events: Option<EventSink<T>>,
}

/// Exclusive view of the registry contents
pub struct RegistryGuard<'a, T: ?Sized> {
    guard: MutexGuard<'a, RegistryState<T>>,
}

impl<T: ?Sized> Deref for RegistryGuard<'_, T> {
    type Target = [AdapterHandle<T>];

    fn deref(&self) -> &Self::Target {
        &self.guard.adapters
    }
}

/// Registry of active adapters
pub struct AdapterRegistry<T: ?Sized> {
    state: Mutex<RegistryState<T>>,
}

impl<T: ?Sized + Adapter> AdapterRegistry<T> {
    pub(crate) fn new(events: EventSink<T>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                adapters: Vec::new(),
                events: Some(events),
            }),
        }
    }

    /// Append an adapter and raise `AdapterLoaded`
    pub async fn add(&self, adapter: AdapterHandle<T>) -> LoaderResult<()> {
        let mut state = self.state.lock().await;
        let Some(events) = state.events.clone() else {
            return Err(LoaderError::Disposed);
        };

        if state.adapters.contains(&adapter) {
            debug!("Adapter {} already registered", adapter.type_name());
            return Ok(());
        }

        state.adapters.push(adapter.clone());
        debug!("Registered adapter {} ({})", adapter.type_name(), adapter.id());
        events.emit(LoaderEvent::AdapterLoaded { adapter });
        Ok(())
    }

    /// Raise `AdapterUnloaded` and remove the adapter; returns whether it was present
    pub async fn remove(&self, adapter: &AdapterHandle<T>) -> bool {
        let mut state = self.state.lock().await;
        let Some(index) = state.adapters.iter().position(|a| a == adapter) else {
            return false;
        };

        if let Some(events) = &state.events {
            events.emit(LoaderEvent::AdapterUnloaded {
                adapter: adapter.clone(),
            });
        }
        state.adapters.remove(index);
        true
    }

    /// Consistent copy of the current adapters
    pub async fn snapshot(&self) -> Vec<AdapterHandle<T>> {
        self.state.lock().await.adapters.clone()
    }

    /// Hold the registry exclusively
    pub async fn lock(&self) -> RegistryGuard<'_, T> {
        RegistryGuard {
            guard: self.state.lock().await,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.adapters.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.adapters.is_empty()
    }

    pub async fn contains(&self, adapter: &AdapterHandle<T>) -> bool {
        self.state.lock().await.adapters.contains(adapter)
    }

    /// Dispose, announce and remove every adapter, front to back
    ///
    /// Disposal failures are logged and the drain carries on.
    pub async fn drain_disposing(&self) {
        let mut state = self.state.lock().await;

        while !state.adapters.is_empty() {
            let adapter = state.adapters[0].clone();
            dispose_instance(&adapter).await;

            if let Some(events) = &state.events {
                events.emit(LoaderEvent::AdapterUnloaded {
                    adapter: adapter.clone(),
                });
            }
            state.adapters.remove(0);
        }
    }

    /// Stop all further notifications; later `add` calls fail
    pub async fn detach(&self) {
        self.state.lock().await.events = None;
    }

    pub async fn is_detached(&self) -> bool {
        self.state.lock().await.events.is_none()
    }
}

/// Run the adapter's disposal capability, if it has one
///
/// Errors and panics are logged, never propagated.
pub(crate) async fn dispose_instance<T: ?Sized + Adapter>(adapter: &AdapterHandle<T>) {
    let Some(disposable) = adapter.as_disposable() else {
        return;
    };

    match AssertUnwindSafe(disposable.dispose()).catch_unwind().await {
        Ok(Ok(())) => debug!("Disposed adapter {}", adapter.type_name()),
        Ok(Err(e)) => warn!("Failed to dispose adapter {}: {}", adapter.type_name(), e),
        Err(payload) => warn!(
            "Failed to dispose adapter {}: {}",
            adapter.type_name(),
            panic_message(payload)
        ),
    }
}
