//! Tessera adapter loader
//!
//! Discovers adapter types in a directory of binaries, instantiates and
//! initializes them, keeps them in an ordered registry and drives them from a
//! serialized operation queue. New binaries dropped into the directory are
//! picked up at runtime.
//!
//! ```no_run
//! use tessera_loader::{AdapterLoader, LoaderConfig, LoaderEvent};
//! use tessera_kernel::Adapter;
//!
//! # async fn run() -> tessera_loader::LoaderResult<()> {
//! let config = LoaderConfig::new().with_adapter_directory("/opt/app/adapters");
//! let mut loader: AdapterLoader<dyn Adapter> = AdapterLoader::with_library_catalog(config);
//! let mut events = loader.subscribe();
//!
//! loader.initialize().await?;
//! while let Ok(event) = events.try_recv() {
//!     if let LoaderEvent::AdapterLoaded { adapter } = event {
//!         println!("loaded {}", adapter.type_name());
//!     }
//! }
//! loader.dispose().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod handle;
pub mod loader;
pub mod queue;
pub mod registry;
pub mod watcher;

pub use config::{LoaderConfig, WatchSettings};
pub use discovery::{
    AdapterCatalog, AdapterLibrary, AdapterType, Constructor, LibraryCatalog, StaticCatalog,
    TypeDiscovery,
};
pub use error::{LoaderError, LoaderResult};
pub use event::{CandidateInfo, EventReceiver, LoaderEvent};
pub use handle::AdapterHandle;
pub use loader::{AdapterLoader, LoaderState};
pub use queue::{OperationHandler, OperationQueue, UnsupportedOperation};
pub use registry::{AdapterRegistry, RegistryGuard};
pub use watcher::{AdapterWatcher, WatchConfig};

// Used by `declare_adapters!`
pub use tessera_kernel::capability_name;
