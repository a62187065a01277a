//! Adapter loader
//!
//! Owns discovery, the registry, the operation queue and the directory watcher,
//! and drives adapters through their lifecycle:
//!
//! ```text
//! discovered -> instantiated -> initialized -> registered -> disposed -> unloaded
//! ```

use std::path::{Path, PathBuf};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::FutureExt;
use tessera_kernel::{Adapter, AdapterError, capability_name};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::LoaderConfig;
use crate::discovery::{AdapterCatalog, AdapterType, LibraryCatalog, TypeDiscovery};
use crate::error::{LoaderError, LoaderResult, panic_message};
use crate::event::{CandidateInfo, EventReceiver, EventSink, LoaderEvent};
use crate::handle::AdapterHandle;
use crate::queue::{OperationHandler, OperationQueue, UnsupportedOperation};
use crate::registry::{AdapterRegistry, dispose_instance};
use crate::watcher::AdapterWatcher;

/// Loader state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderState {
    /// Not initialized yet, or the last initialization failed
    Uninitialized,
    /// Initialized and picking up new binaries (or not watching at all)
    Enabled,
    /// Initialized with the watcher paused
    Disabled,
    /// Torn down; terminal
    Disposed,
}

impl std::fmt::Display for LoaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderState::Uninitialized => write!(f, "uninitialized"),
            LoaderState::Enabled => write!(f, "enabled"),
            LoaderState::Disabled => write!(f, "disabled"),
            LoaderState::Disposed => write!(f, "disposed"),
        }
    }
}

/// State shared with the watcher's discovery task
struct LoaderCore<T: ?Sized> {
    registry: Arc<AdapterRegistry<T>>,
    events: EventSink<T>,
}

impl<T: ?Sized + Adapter + 'static> LoaderCore<T> {
    async fn process_adapter(&self, adapter_type: AdapterType<T>) -> Option<AdapterHandle<T>> {
        if self.registry.is_detached().await {
            debug!(
                "Loader disposed, ignoring adapter type {}",
                adapter_type.type_name()
            );
            return None;
        }

        let candidate = adapter_type.candidate();
        let adapter = match adapter_type.instantiate() {
            Ok(adapter) => adapter,
            Err(e) => {
                self.report_load_failure(candidate, e);
                return None;
            }
        };

        self.events.emit(LoaderEvent::AdapterCreated {
            adapter: adapter.clone(),
        });

        if let Some(lifecycle) = adapter.as_lifecycle() {
            let failure = match AssertUnwindSafe(lifecycle.initialize()).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(payload) => Some(AdapterError::InitFailed(panic_message(payload))),
            };

            if let Some(source) = failure {
                dispose_instance(&adapter).await;
                self.report_load_failure(
                    candidate,
                    LoaderError::LifecycleInit {
                        type_name: adapter.type_name().to_string(),
                        source,
                    },
                );
                return None;
            }
        }

        match self.registry.add(adapter.clone()).await {
            Ok(()) => {
                info!("Loaded adapter {} ({})", adapter.type_name(), adapter.id());
                Some(adapter)
            }
            Err(e) => {
                warn!("Discarding adapter {}: {}", adapter.type_name(), e);
                dispose_instance(&adapter).await;
                None
            }
        }
    }

    fn report_load_failure(&self, candidate: CandidateInfo, error: LoaderError) {
        warn!("Failed to load adapter {}: {}", candidate.type_name, error);
        self.events.emit(LoaderEvent::AdapterLoadFailed {
            candidate,
            error: Arc::new(error),
        });
    }
}

/// Generic adapter loader
///
/// `T` is the capability type adapters are loaded as (usually a trait object
/// such as `dyn Publisher`), `P` the payload type of the operation queue.
pub struct AdapterLoader<T: ?Sized, P = ()> {
    config: LoaderConfig,
    catalog: Arc<dyn AdapterCatalog<T>>,
    handler: Arc<dyn OperationHandler<T, P>>,
    core: Arc<LoaderCore<T>>,
    queue: OperationQueue<P>,
    watcher: Option<AdapterWatcher>,
    discovery_task: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
    adapter_directory: Option<PathBuf>,
    initialized: bool,
    disposed: bool,
}

impl<T, P> AdapterLoader<T, P>
where
    T: ?Sized + Adapter + 'static,
    P: Send + Sync + 'static,
{
    /// Create a loader over the given catalog
    ///
    /// Until [`with_handler`](Self::with_handler) is called every payload fails
    /// with [`AdapterError::OperationNotSupported`].
    pub fn new(config: LoaderConfig, catalog: Arc<dyn AdapterCatalog<T>>) -> Self {
        let events = EventSink::new();
        let registry = Arc::new(AdapterRegistry::new(events.clone()));

        Self {
            config,
            catalog,
            handler: Arc::new(UnsupportedOperation),
            core: Arc::new(LoaderCore { registry, events }),
            queue: OperationQueue::new(),
            watcher: None,
            discovery_task: None,
            adapter_directory: None,
            initialized: false,
            disposed: false,
        }
    }

    /// Create a loader reading adapters from dynamic libraries
    pub fn with_library_catalog(config: LoaderConfig) -> Self {
        Self::new(config, Arc::new(LibraryCatalog::<T>::new()))
    }

    /// Set the operation run for every payload
    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: OperationHandler<T, P> + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Subscribe to loader events
    ///
    /// The receiver sees every event raised after this call, however far behind
    /// it is read.
    pub fn subscribe(&self) -> EventReceiver<T> {
        self.core.events.subscribe()
    }

    /// Discover and load every adapter in the adapter directory
    ///
    /// Calling this again once initialized is a no-op.
    pub async fn initialize(&mut self) -> LoaderResult<()> {
        if !self.begin_initialize()? {
            return Ok(());
        }

        let directory = self.prepare()?;
        let discovery = self.discovery();

        info!(
            "Initializing adapter loader for {} in {:?}",
            capability_name::<T>(),
            directory
        );

        for adapter_type in discovery.discover_directory(&directory)? {
            self.core.process_adapter(adapter_type).await;
        }

        self.finish_initialize(directory, discovery).await
    }

    /// Initialize from an explicit set of types instead of scanning the directory
    ///
    /// The watcher, if enabled, still observes the adapter directory.
    pub async fn initialize_with<I>(&mut self, types: I) -> LoaderResult<()>
    where
        I: IntoIterator<Item = AdapterType<T>>,
    {
        if !self.begin_initialize()? {
            return Ok(());
        }

        let directory = self.prepare()?;
        let discovery = self.discovery();

        info!(
            "Initializing adapter loader for {} from supplied types",
            capability_name::<T>()
        );

        for adapter_type in types {
            if !adapter_type.is_constructible() {
                debug!(
                    "Skipping {}: no zero-argument constructor",
                    adapter_type.type_name()
                );
                continue;
            }
            self.core.process_adapter(adapter_type).await;
        }

        self.finish_initialize(directory, discovery).await
    }

    /// Instantiate, initialize and register one adapter type
    ///
    /// Failures are reported as [`LoaderEvent::AdapterLoadFailed`] and yield `None`.
    pub async fn process_adapter(&self, adapter_type: AdapterType<T>) -> Option<AdapterHandle<T>> {
        self.core.process_adapter(adapter_type).await
    }

    /// Resume or pause pickup of new adapter binaries
    ///
    /// Enabling an uninitialized loader initializes it.
    pub async fn set_enabled(&mut self, enabled: bool) -> LoaderResult<()> {
        if self.disposed {
            return Err(LoaderError::Disposed);
        }

        if !self.initialized {
            if enabled {
                return self.initialize().await;
            }
            return Ok(());
        }

        if let Some(watcher) = &self.watcher {
            watcher.set_active(enabled);
            info!(
                "Dynamic adapter loading {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        Ok(())
    }

    /// Whether new binaries are being picked up (or, without watch mode, whether
    /// the loader is initialized)
    pub fn is_enabled(&self) -> bool {
        if self.disposed || !self.initialized {
            return false;
        }
        self.watcher.as_ref().is_none_or(AdapterWatcher::is_active)
    }

    /// Queue a payload for every registered adapter
    ///
    /// Payloads submitted before initialization are processed once the queue starts.
    pub fn submit(&self, payload: P) -> LoaderResult<()> {
        if self.disposed {
            return Err(LoaderError::Disposed);
        }
        self.queue.submit(payload)
    }

    /// Tear everything down; calling this again is a no-op
    ///
    /// Only a failure to persist settings is returned, after teardown completed.
    pub async fn dispose(&mut self) -> LoaderResult<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        info!("Disposing adapter loader");

        self.queue.stop().await;
        self.stop_watching().await;
        self.core.registry.drain_disposing().await;
        self.core.registry.detach().await;

        info!("Adapter loader disposed");
        self.save_settings()
    }

    /// Current adapters, in registration order
    pub async fn adapters(&self) -> Vec<AdapterHandle<T>> {
        self.core.registry.snapshot().await
    }

    pub async fn adapter_count(&self) -> usize {
        self.core.registry.len().await
    }

    pub fn registry(&self) -> &AdapterRegistry<T> {
        &self.core.registry
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Resolved adapter directory, once initialized
    pub fn adapter_directory(&self) -> Option<&Path> {
        self.adapter_directory.as_deref()
    }

    pub fn state(&self) -> LoaderState {
        if self.disposed {
            LoaderState::Disposed
        } else if !self.initialized {
            LoaderState::Uninitialized
        } else if self.is_enabled() {
            LoaderState::Enabled
        } else {
            LoaderState::Disabled
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized && !self.disposed
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Multi-line status report
    pub async fn status(&self) -> String {
        let directory = self
            .adapter_directory
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "<unresolved>".to_string());

        let dynamic_loading = match &self.watcher {
            Some(watcher) if watcher.is_active() => "Enabled",
            _ => "Disabled",
        };

        let queue = if self.queue.is_running() {
            "Running"
        } else {
            "Stopped"
        };

        let adapters = self.core.registry.snapshot().await;

        let mut lines = vec![
            format!("         Loader state: {}", self.state()),
            format!("         Adapter type: {}", capability_name::<T>()),
            format!("    Adapter directory: {}", directory),
            format!("       File extension: {}", self.config.file_extension()),
            format!("      Dynamic loading: {}", dynamic_loading),
            format!(
                "      Operation queue: {}, {} pending",
                queue,
                self.queue.pending()
            ),
            format!("      Loaded adapters: {}", adapters.len()),
        ];

        for (index, adapter) in adapters.iter().enumerate() {
            let detail = adapter.status();
            let mut line = format!("  {:>3}. {} [{}]", index + 1, adapter.name(), adapter.type_name());
            if !detail.is_empty() {
                line.push_str(": ");
                line.push_str(detail.trim());
            }
            lines.push(line);
        }

        lines.join("\n")
    }

    fn begin_initialize(&self) -> LoaderResult<bool> {
        if self.disposed {
            return Err(LoaderError::Disposed);
        }
        if self.initialized {
            debug!("Adapter loader already initialized");
            return Ok(false);
        }
        Ok(true)
    }

    /// Apply persisted settings and resolve the adapter directory
    fn prepare(&mut self) -> LoaderResult<PathBuf> {
        self.load_settings()?;
        Ok(self.config.resolve_adapter_directory()?)
    }

    fn discovery(&self) -> TypeDiscovery<T> {
        TypeDiscovery::new(Arc::clone(&self.catalog), self.config.file_extension())
    }

    async fn finish_initialize(
        &mut self,
        directory: PathBuf,
        discovery: TypeDiscovery<T>,
    ) -> LoaderResult<()> {
        if let Err(e) = self.start_services(&directory, discovery) {
            error!("Adapter loader setup failed: {}", e);
            self.stop_watching().await;
            self.core.registry.drain_disposing().await;
            return Err(e);
        }

        self.adapter_directory = Some(directory);
        self.initialized = true;

        info!(
            "Adapter loader initialized with {} adapters",
            self.core.registry.len().await
        );
        Ok(())
    }

    fn start_services(&mut self, directory: &Path, discovery: TypeDiscovery<T>) -> LoaderResult<()> {
        if self.config.watch_for_adapters {
            let mut watcher = AdapterWatcher::new(directory, self.config.watch_config());
            let paths = watcher.start()?;
            self.watcher = Some(watcher);
            self.discovery_task = Some(spawn_discovery_task(
                Arc::clone(&self.core),
                discovery,
                paths,
                Pickup {
                    poll: self.config.settle_delay(),
                    timeout: self.config.pickup_timeout(),
                },
            ));
        }

        self.queue.start(
            Arc::clone(&self.core.registry),
            Arc::clone(&self.handler),
            self.core.events.clone(),
        )
    }

    async fn stop_watching(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop().await;
        }

        if let Some((shutdown_tx, task)) = self.discovery_task.take() {
            let _ = shutdown_tx.send(());
            if let Err(e) = task.await {
                error!("Adapter discovery task failed: {}", e);
            }
        }
    }

    fn load_settings(&mut self) -> LoaderResult<()> {
        if !self.config.persist_settings {
            return Ok(());
        }
        let Some(path) = self.config.settings_path.clone() else {
            return Ok(());
        };

        if path.exists() {
            self.config = self.config.merged_with(&path)?;
            info!("Loaded adapter loader settings from {:?}", path);
        } else {
            debug!("No saved settings at {:?}", path);
        }
        Ok(())
    }

    fn save_settings(&self) -> LoaderResult<()> {
        if !self.config.persist_settings {
            return Ok(());
        }
        let Some(path) = &self.config.settings_path else {
            return Ok(());
        };

        self.config.save(path)?;
        info!("Saved adapter loader settings to {:?}", path);
        Ok(())
    }
}

impl<T: ?Sized, P> Drop for AdapterLoader<T, P> {
    fn drop(&mut self) {
        if !self.disposed && self.initialized {
            warn!("Adapter loader dropped without dispose; adapters were not disposed");
        }
    }
}

/// Shortest interval between two size/mtime readings of a new binary
const MIN_PICKUP_POLL: Duration = Duration::from_millis(10);

/// Pacing of [`pick_up`]
#[derive(Debug, Clone, Copy)]
struct Pickup {
    poll: Duration,
    timeout: Duration,
}

/// Load adapters from binaries the watcher reports, one path at a time
fn spawn_discovery_task<T>(
    core: Arc<LoaderCore<T>>,
    discovery: TypeDiscovery<T>,
    mut paths: mpsc::UnboundedReceiver<PathBuf>,
    pickup: Pickup,
) -> (oneshot::Sender<()>, JoinHandle<()>)
where
    T: ?Sized + Adapter + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                path = paths.recv() => {
                    let Some(path) = path else { break };

                    let types = tokio::select! {
                        biased;
                        _ = &mut shutdown_rx => break,
                        types = pick_up(&discovery, &path, pickup) => types,
                    };

                    info!("Loading {} adapter types from new binary {:?}", types.len(), path);
                    for adapter_type in types {
                        core.process_adapter(adapter_type).await;
                    }
                }
            }
        }
        debug!("Adapter discovery task finished");
    });

    (shutdown_tx, task)
}

/// Size and modification time of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    async fn read(path: &Path) -> Option<Self> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        Some(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Wait for a new binary to stop changing, then read its adapter types
///
/// The binary is inspected once two readings one poll apart agree. If it
/// fails to load, it is inspected again only after it changes, until the
/// pickup timeout runs out.
async fn pick_up<T: ?Sized>(
    discovery: &TypeDiscovery<T>,
    path: &Path,
    pickup: Pickup,
) -> Vec<AdapterType<T>> {
    let poll = pickup.poll.max(MIN_PICKUP_POLL);
    let deadline = Instant::now().checked_add(pickup.timeout);
    let mut previous: Option<FileStamp> = None;
    let mut rejected: Option<FileStamp> = None;
    let mut last_error = None;

    loop {
        let Some(stamp) = FileStamp::read(path).await else {
            debug!("Adapter binary {:?} disappeared before it was loaded", path);
            return Vec::new();
        };

        if previous == Some(stamp) && rejected != Some(stamp) {
            match discovery.try_discover_file(path) {
                Ok(types) => return types,
                Err(e) => {
                    debug!("Adapter binary {:?} not loadable yet: {}", path, e);
                    rejected = Some(stamp);
                    last_error = Some(e);
                }
            }
        }
        previous = Some(stamp);

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        tokio::time::sleep(poll).await;
    }

    match last_error {
        Some(e) => warn!("Skipping adapter binary {:?}: {}", path, e),
        None => warn!(
            "Skipping adapter binary {:?}: still changing after {:?}",
            path, pickup.timeout
        ),
    }
    Vec::new()
}
