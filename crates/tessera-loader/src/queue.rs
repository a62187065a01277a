//! Operation queue
//!
//! Payloads are consumed by a single task, strictly in submission order. Each
//! payload is handed to every registered adapter while the registry is locked.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use tessera_kernel::{Adapter, AdapterError, AdapterResult};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{LoaderError, LoaderResult, panic_message};
use crate::event::{EventSink, LoaderEvent};
use crate::registry::AdapterRegistry;

/// Adapter-specific operation run for every payload
#[async_trait]
pub trait OperationHandler<T: ?Sized, P>: Send + Sync {
    /// Apply `payload` to one adapter
    async fn execute(&self, adapter: &T, payload: &P) -> AdapterResult<()>;
}

/// Handler used when none was supplied; every dispatch fails
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedOperation;

#[async_trait]
impl<T: ?Sized + Sync, P: Sync> OperationHandler<T, P> for UnsupportedOperation {
    async fn execute(&self, _adapter: &T, _payload: &P) -> AdapterResult<()> {
        error!("No operation handler configured; payload cannot be processed");
        Err(AdapterError::OperationNotSupported)
    }
}

/// Serialized work queue
pub struct OperationQueue<P> {
    tx: Option<mpsc::UnboundedSender<P>>,
    rx: Option<mpsc::UnboundedReceiver<P>>,
    pending: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl<P: Send + Sync + 'static> OperationQueue<P> {
    /// Create an idle queue; payloads submitted now are kept until it starts
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
            pending: Arc::new(AtomicUsize::new(0)),
            shutdown_tx: None,
            task: None,
        }
    }

    /// Enqueue a payload
    pub fn submit(&self, payload: P) -> LoaderResult<()> {
        let tx = self.tx.as_ref().ok_or(LoaderError::Disposed)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(payload).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(LoaderError::Disposed);
        }
        Ok(())
    }

    /// Start the consumer task
    ///
    /// Starting a running queue is a no-op; a stopped queue cannot be restarted.
    pub(crate) fn start<T>(
        &mut self,
        registry: Arc<AdapterRegistry<T>>,
        handler: Arc<dyn OperationHandler<T, P>>,
        events: EventSink<T>,
    ) -> LoaderResult<()>
    where
        T: ?Sized + Adapter + 'static,
    {
        if self.task.is_some() {
            return Ok(());
        }
        let mut rx = self.rx.take().ok_or(LoaderError::Disposed)?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let pending = Arc::clone(&self.pending);

        info!("Starting operation queue");

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    payload = rx.recv() => {
                        let Some(payload) = payload else { break };
                        pending.fetch_sub(1, Ordering::SeqCst);
                        dispatch(&registry, handler.as_ref(), &events, &payload).await;
                    }
                }
            }

            rx.close();
            let mut dropped = 0usize;
            while rx.try_recv().is_ok() {
                dropped += 1;
            }
            pending.store(0, Ordering::SeqCst);
            debug!("Operation queue stopped, dropped {} pending payloads", dropped);
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
        Ok(())
    }

    /// Stop the consumer; the in-flight payload completes, the rest are dropped
    pub async fn stop(&mut self) {
        self.tx = None;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            info!("Stopping operation queue");
            if let Err(e) = task.await {
                error!("Operation queue task failed: {}", e);
            }
        }

        if let Some(mut rx) = self.rx.take() {
            rx.close();
            let mut dropped = 0usize;
            while rx.try_recv().is_ok() {
                dropped += 1;
            }
            self.pending.store(0, Ordering::SeqCst);
            debug!("Operation queue never started, dropped {} pending payloads", dropped);
        }
    }

    /// Payloads submitted but not yet picked up
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_none()
    }
}

impl<P: Send + Sync + 'static> Default for OperationQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand one payload to every registered adapter, in registry order
async fn dispatch<T, P>(
    registry: &AdapterRegistry<T>,
    handler: &dyn OperationHandler<T, P>,
    events: &EventSink<T>,
    payload: &P,
) where
    T: ?Sized + Adapter + 'static,
    P: Sync,
{
    let adapters = registry.lock().await;

    for adapter in adapters.iter() {
        let outcome = AssertUnwindSafe(handler.execute(adapter.adapter(), payload))
            .catch_unwind()
            .await;

        let source = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(payload) => AdapterError::OperationFailed(panic_message(payload)),
        };

        error!(
            "Operation failed on adapter {} ({}): {}",
            adapter.type_name(),
            adapter.id(),
            source
        );
        events.emit(LoaderEvent::OperationFailed {
            adapter: adapter.clone(),
            error: Arc::new(LoaderError::OperationDispatch {
                adapter: adapter.type_name().to_string(),
                source,
            }),
        });
    }
}
