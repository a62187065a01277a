//! Loader configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_kernel::config::{self, ConfigResult};

use crate::watcher::WatchConfig;

/// Directory watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Window in which repeated events for the same file are collapsed
    pub debounce_ms: u64,
    /// Interval at which a new file's size and modification time are compared;
    /// the file is inspected once two readings agree
    pub settle_delay_ms: u64,
    /// How long a new file may keep changing, or keep failing to load, before
    /// it is given up on
    pub pickup_timeout_ms: u64,
    /// File name patterns never treated as adapters (`*.tmp`, `prefix*`, exact names)
    pub ignore_patterns: Vec<String>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            settle_delay_ms: 250,
            pickup_timeout_ms: 10_000,
            ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), "*~".to_string()],
        }
    }
}

/// Adapter loader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directory holding adapter binaries; empty means the executable's own directory
    pub adapter_directory: String,
    /// Extension of adapter binaries (`so`, `.so` and `*.so` are all accepted)
    pub adapter_file_extension: String,
    /// Watch the adapter directory for new binaries
    pub watch_for_adapters: bool,
    /// Watcher tuning
    pub watch: WatchSettings,
    /// Merge settings from `settings_path` on initialize and save them on dispose
    pub persist_settings: bool,
    /// Settings file used when `persist_settings` is on
    pub settings_path: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            adapter_directory: String::new(),
            adapter_file_extension: std::env::consts::DLL_EXTENSION.to_string(),
            watch_for_adapters: true,
            watch: WatchSettings::default(),
            persist_settings: false,
            settings_path: None,
        }
    }
}

impl LoaderConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the adapter directory
    pub fn with_adapter_directory<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.adapter_directory = dir.as_ref().to_string_lossy().into_owned();
        self
    }

    /// Set the adapter file extension
    pub fn with_file_extension(mut self, ext: &str) -> Self {
        self.adapter_file_extension = ext.to_string();
        self
    }

    /// Enable/disable watch mode
    pub fn with_watch(mut self, enabled: bool) -> Self {
        self.watch_for_adapters = enabled;
        self
    }

    /// Set the watcher debounce window
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.watch.debounce_ms = millis(duration);
        self
    }

    /// Set the interval used to decide that a new binary is fully written
    pub fn with_settle_delay(mut self, duration: Duration) -> Self {
        self.watch.settle_delay_ms = millis(duration);
        self
    }

    /// Set how long a new binary may take to become loadable
    pub fn with_pickup_timeout(mut self, duration: Duration) -> Self {
        self.watch.pickup_timeout_ms = millis(duration);
        self
    }

    /// Persist settings to the given file
    pub fn with_settings_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.persist_settings = true;
        self.settings_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load a configuration file (YAML, TOML, JSON, INI, RON, JSON5)
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        config::load_config(path)
    }

    /// Return a copy with the keys present in `path` applied on top
    pub fn merged_with<P: AsRef<Path>>(&self, path: P) -> ConfigResult<Self> {
        config::load_over(self, path)
    }

    /// Save this configuration (TOML, JSON or YAML by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        config::save_config(self, path)
    }

    /// Adapter file extension without any `*.` or `.` prefix
    pub fn file_extension(&self) -> &str {
        self.adapter_file_extension
            .trim_start_matches('*')
            .trim_start_matches('.')
    }

    /// Absolute adapter directory
    ///
    /// Empty resolves to the directory of the running executable; relative paths
    /// are taken relative to that directory.
    pub fn resolve_adapter_directory(&self) -> std::io::Result<PathBuf> {
        let configured = Path::new(&self.adapter_directory);
        if configured.is_absolute() {
            return Ok(configured.to_path_buf());
        }

        let exe = std::env::current_exe()?;
        let base = exe.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(base.join(configured))
    }

    /// Watcher configuration derived from these settings
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            debounce_duration: Duration::from_millis(self.watch.debounce_ms),
            extension: self.file_extension().to_string(),
            ignore_patterns: self.watch.ignore_patterns.clone(),
        }
    }

    /// Settle delay as a [`Duration`]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.watch.settle_delay_ms)
    }

    /// Pickup timeout as a [`Duration`]
    pub fn pickup_timeout(&self) -> Duration {
        Duration::from_millis(self.watch.pickup_timeout_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
