//! Adapter directory watcher
//!
//! Watches the adapter directory for newly created binaries and forwards their
//! paths to the loader for incremental discovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, event::CreateKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Watch configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Debounce duration for repeated events on one path
    pub debounce_duration: Duration,
    /// Adapter file extension, without the leading dot
    pub extension: String,
    /// Ignore patterns (`*suffix`, `prefix*` or exact file names)
    pub ignore_patterns: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
            extension: std::env::consts::DLL_EXTENSION.to_string(),
            ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), "*~".to_string()],
        }
    }
}

impl WatchConfig {
    /// Create a new watch config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set debounce duration
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce_duration = duration;
        self
    }

    /// Set the watched extension
    pub fn with_extension(mut self, ext: &str) -> Self {
        self.extension = ext.trim_start_matches('*').trim_start_matches('.').to_string();
        self
    }

    /// Add ignore pattern
    pub fn with_ignore(mut self, pattern: &str) -> Self {
        self.ignore_patterns.push(pattern.to_string());
        self
    }

    /// Check if a path should be forwarded
    pub fn should_watch(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !ext.eq_ignore_ascii_case(&self.extension) {
            return false;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        !self.ignore_patterns.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix('*') {
                file_name.ends_with(suffix)
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                file_name.starts_with(prefix)
            } else {
                file_name == pattern
            }
        })
    }
}

/// Collapses repeated events for one path inside a time window
#[derive(Debug)]
struct Debouncer {
    window: Duration,
    last_seen: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Whether an event for `path` at `now` should be let through
    ///
    /// Entries older than the window are forgotten on every call, so the map
    /// only holds paths seen within the last window.
    fn admit(&mut self, path: &Path, now: Instant) -> bool {
        let window = self.window;
        self.last_seen
            .retain(|_, last| now.saturating_duration_since(*last) < window);

        if self.last_seen.contains_key(path) {
            return false;
        }
        self.last_seen.insert(path.to_path_buf(), now);
        true
    }

    fn len(&self) -> usize {
        self.last_seen.len()
    }
}

/// Watcher over one adapter directory
pub struct AdapterWatcher {
    directory: PathBuf,
    config: WatchConfig,
    /// Creation events are dropped while this is false
    active: Arc<AtomicBool>,
    watcher: Option<RecommendedWatcher>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AdapterWatcher {
    /// Create a watcher for `directory`; nothing is watched until [`start`](Self::start)
    pub fn new<P: AsRef<Path>>(directory: P, config: WatchConfig) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            config,
            active: Arc::new(AtomicBool::new(true)),
            watcher: None,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Start watching and return the stream of created adapter binaries
    pub fn start(&mut self) -> Result<mpsc::UnboundedReceiver<PathBuf>, notify::Error> {
        info!("Starting adapter watcher on {:?}", self.directory);

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();
        let (path_tx, path_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let watcher_config = Config::default().with_poll_interval(Duration::from_millis(100));
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = raw_tx.send(event);
                }
                Err(e) => warn!("Adapter watcher error: {}", e),
            },
            watcher_config,
        )?;
        watcher.watch(&self.directory, RecursiveMode::NonRecursive)?;

        let config = self.config.clone();
        let active = Arc::clone(&self.active);

        let task = tokio::spawn(async move {
            let mut debouncer = Debouncer::new(config.debounce_duration);

            loop {
                tokio::select! {
                    Some(event) = raw_rx.recv() => {
                        if !matches!(event.kind, EventKind::Create(CreateKind::File | CreateKind::Any)) {
                            continue;
                        }

                        for path in event.paths {
                            if !config.should_watch(&path) {
                                continue;
                            }

                            if !active.load(Ordering::SeqCst) {
                                debug!("Watcher inactive, dropping {:?}", path);
                                continue;
                            }

                            if !debouncer.admit(&path, Instant::now()) {
                                debug!("Debounced event for {:?} ({} paths tracked)", path, debouncer.len());
                                continue;
                            }

                            debug!("New adapter binary: {:?}", path);
                            if path_tx.send(path).is_err() {
                                debug!("Adapter path receiver dropped");
                                return;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Adapter watcher shutting down");
                        return;
                    }
                }
            }
        });

        self.watcher = Some(watcher);
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);

        Ok(path_rx)
    }

    /// Stop watching; pending events are discarded
    pub async fn stop(&mut self) {
        if self.watcher.is_none() && self.task.is_none() {
            return;
        }

        info!("Stopping adapter watcher on {:?}", self.directory);

        // Dropping the notify watcher closes its callback's sender.
        self.watcher = None;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Resume or pause forwarding of creation events
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Whether creation events are currently forwarded
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the underlying watcher is running
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Watched directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Get configuration
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn so_config() -> WatchConfig {
        WatchConfig::new()
            .with_extension("so")
            .with_debounce(Duration::from_millis(50))
    }

    #[test]
    fn test_should_watch() {
        let config = so_config();

        assert!(config.should_watch(Path::new("/adapters/alpha.so")));
        assert!(config.should_watch(Path::new("/adapters/ALPHA.SO")));

        assert!(!config.should_watch(Path::new("/adapters/readme.txt")));
        assert!(!config.should_watch(Path::new("/adapters/noext")));

        let config = config.with_ignore("draft*").with_ignore("pinned.so");
        assert!(!config.should_watch(Path::new("/adapters/draft-alpha.so")));
        assert!(!config.should_watch(Path::new("/adapters/pinned.so")));
        assert!(config.should_watch(Path::new("/adapters/beta.so")));
    }

    #[test]
    fn test_debouncer_collapses_and_forgets() {
        let start = Instant::now();
        let window = Duration::from_millis(100);
        let mut debouncer = Debouncer::new(window);
        let alpha = Path::new("/adapters/alpha.so");

        assert!(debouncer.admit(alpha, start));
        assert!(!debouncer.admit(alpha, start + Duration::from_millis(50)));
        assert!(debouncer.admit(alpha, start + window));

        for i in 0..1000 {
            let path = PathBuf::from(format!("/adapters/bulk{}.so", i));
            assert!(debouncer.admit(&path, start + window));
        }
        assert_eq!(debouncer.len(), 1001);

        // Everything above is older than one window by now
        let later = start + window * 3;
        assert!(debouncer.admit(Path::new("/adapters/beta.so"), later));
        assert_eq!(debouncer.len(), 1);
    }

    #[test]
    fn test_with_extension_normalizes() {
        assert_eq!(WatchConfig::new().with_extension("*.dll").extension, "dll");
        assert_eq!(WatchConfig::new().with_extension(".so").extension, "so");
    }

    #[tokio::test]
    async fn test_forwards_created_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = AdapterWatcher::new(dir.path(), so_config());
        let mut rx = watcher.start().unwrap();
        assert!(watcher.is_running());

        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::write(dir.path().join("alpha.so"), b"binary").unwrap();

        let path = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no watch event")
            .expect("channel closed");
        assert_eq!(path.file_name().unwrap(), "alpha.so");

        watcher.stop().await;
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_inactive_watcher_drops_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = AdapterWatcher::new(dir.path(), so_config());
        let mut rx = watcher.start().unwrap();

        watcher.set_active(false);
        assert!(!watcher.is_active());
        std::fs::write(dir.path().join("paused.so"), b"binary").unwrap();

        let received = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(received.is_err());

        watcher.set_active(true);
        std::fs::write(dir.path().join("resumed.so"), b"binary").unwrap();

        let path = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no watch event")
            .expect("channel closed");
        assert_eq!(path.file_name().unwrap(), "resumed.so");

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_start_on_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = AdapterWatcher::new(dir.path().join("missing"), so_config());
        assert!(watcher.start().is_err());
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = AdapterWatcher::new(dir.path(), so_config());
        let _rx = watcher.start().unwrap();

        watcher.stop().await;
        watcher.stop().await;
        assert!(!watcher.is_running());
    }
}
