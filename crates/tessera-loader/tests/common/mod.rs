#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tessera_kernel::{Adapter, AdapterError, AdapterResult, Disposable, Lifecycle};
use tessera_loader::{EventReceiver, LoaderConfig, LoaderEvent, OperationHandler};

/// Capability the tests load adapters as
pub trait Publisher: Adapter {
    fn label(&self) -> &str;
}

/// Shared, ordered record of what happened
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.contains(needle))
            .collect()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }
}

/// Adapter that journals its lifecycle
pub struct Recorded {
    label: String,
    journal: Journal,
    fail_init: bool,
}

impl Recorded {
    pub fn new(label: &str, journal: &Journal) -> Self {
        Self {
            label: label.to_string(),
            journal: journal.clone(),
            fail_init: false,
        }
    }

    pub fn failing_init(label: &str, journal: &Journal) -> Self {
        Self {
            fail_init: true,
            ..Self::new(label, journal)
        }
    }
}

impl Adapter for Recorded {
    fn name(&self) -> &str {
        &self.label
    }

    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }

    fn as_disposable(&self) -> Option<&dyn Disposable> {
        Some(self)
    }
}

#[async_trait]
impl Lifecycle for Recorded {
    async fn initialize(&self) -> AdapterResult<()> {
        self.journal.record(format!("init {}", self.label));
        if self.fail_init {
            return Err(AdapterError::InitFailed(format!("{} cannot start", self.label)));
        }
        Ok(())
    }
}

#[async_trait]
impl Disposable for Recorded {
    async fn dispose(&self) -> AdapterResult<()> {
        self.journal.record(format!("dispose {}", self.label));
        Ok(())
    }
}

impl Publisher for Recorded {
    fn label(&self) -> &str {
        &self.label
    }
}

/// Zero-argument constructor for a journaled adapter
pub fn recorded(
    label: &'static str,
    journal: &Journal,
) -> impl Fn() -> AdapterResult<Box<dyn Publisher>> + Send + Sync + 'static {
    let journal = journal.clone();
    move || Ok(Box::new(Recorded::new(label, &journal)) as Box<dyn Publisher>)
}

/// Journals every payload; adapters labelled `faulty*` reject them
pub struct JournalHandler {
    pub journal: Journal,
}

#[async_trait]
impl OperationHandler<dyn Publisher, String> for JournalHandler {
    async fn execute(&self, adapter: &dyn Publisher, payload: &String) -> AdapterResult<()> {
        if adapter.label().starts_with("faulty") {
            return Err(AdapterError::OperationFailed(format!(
                "{} rejected {}",
                adapter.label(),
                payload
            )));
        }
        self.journal.record(format!("{} <- {}", adapter.label(), payload));
        Ok(())
    }
}

/// Create an (empty) adapter binary
pub fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), b"").unwrap();
}

/// Loader configuration for a test directory
pub fn config(dir: &Path, watch: bool) -> LoaderConfig {
    LoaderConfig::new()
        .with_adapter_directory(dir)
        .with_file_extension("so")
        .with_watch(watch)
        .with_debounce(Duration::from_millis(50))
        .with_settle_delay(Duration::from_millis(20))
}

/// Poll `condition` until it holds or five seconds pass
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Events already delivered, without waiting
pub fn drain_events<T: ?Sized>(rx: &mut EventReceiver<T>) -> Vec<LoaderEvent<T>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Kinds of the given events, in order
pub fn kinds<T: ?Sized>(events: &[LoaderEvent<T>]) -> Vec<&'static str> {
    events.iter().map(LoaderEvent::kind).collect()
}

/// Wait for the next `AdapterLoaded` event, skipping everything else
pub async fn next_loaded<T: ?Sized>(rx: &mut EventReceiver<T>) -> Option<String> {
    let wait = async {
        loop {
            match rx.recv().await {
                Some(LoaderEvent::AdapterLoaded { adapter }) => return Some(adapter.type_name().to_string()),
                Some(_) => continue,
                None => return None,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .ok()
        .flatten()
}
