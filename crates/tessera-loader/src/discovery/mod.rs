//! Adapter type discovery
//!
//! A [`AdapterCatalog`] turns one binary into the adapter types it provides.
//! [`TypeDiscovery`] applies a catalog to a whole directory or to a single newly
//! created file, keeping only types that can actually be constructed.

mod library;
mod table;

pub use library::{ADAPTER_API_VERSION, AdapterLibrary, LibraryCatalog, RawStr};
pub use table::StaticCatalog;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_kernel::{AdapterError, AdapterResult};
use tracing::{debug, warn};

use crate::error::{LoaderError, LoaderResult, panic_message};
use crate::event::CandidateInfo;
use crate::handle::AdapterHandle;

/// Zero-argument constructor of an adapter type
pub type Constructor<T> = Arc<dyn Fn() -> AdapterResult<Box<T>> + Send + Sync>;

/// A discovered adapter type
pub struct AdapterType<T: ?Sized> {
    type_name: String,
    binary: Option<PathBuf>,
    constructor: Option<Constructor<T>>,
    library: Option<Arc<AdapterLibrary>>,
}

impl<T: ?Sized> AdapterType<T> {
    /// Create a type with a zero-argument constructor
    pub fn new<F>(type_name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> AdapterResult<Box<T>> + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.into(),
            binary: None,
            constructor: Some(Arc::new(constructor)),
            library: None,
        }
    }

    /// Create a type that cannot be constructed without arguments
    pub fn without_constructor(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            binary: None,
            constructor: None,
            library: None,
        }
    }

    /// Record the binary the type was found in
    pub fn with_binary<P: AsRef<Path>>(mut self, binary: P) -> Self {
        self.binary = Some(binary.as_ref().to_path_buf());
        self
    }

    pub(crate) fn with_constructor(mut self, constructor: Constructor<T>) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub(crate) fn with_library(mut self, library: Arc<AdapterLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    /// Whether the type has a zero-argument constructor
    pub fn is_constructible(&self) -> bool {
        self.constructor.is_some()
    }

    /// Candidate description used in failure events
    pub fn candidate(&self) -> CandidateInfo {
        CandidateInfo {
            type_name: self.type_name.clone(),
            binary: self.binary.clone(),
        }
    }

    /// Build one instance
    ///
    /// Constructor errors and panics both come back as
    /// [`LoaderError::Instantiation`].
    pub fn instantiate(&self) -> LoaderResult<AdapterHandle<T>> {
        let constructor = self
            .constructor
            .as_ref()
            .ok_or_else(|| LoaderError::Instantiation {
                type_name: self.type_name.clone(),
                source: AdapterError::ConstructionFailed(
                    "type has no zero-argument constructor".to_string(),
                ),
            })?;

        let instance = match catch_unwind(AssertUnwindSafe(|| constructor())) {
            Ok(Ok(instance)) => instance,
            Ok(Err(source)) => {
                return Err(LoaderError::Instantiation {
                    type_name: self.type_name.clone(),
                    source,
                });
            }
            Err(payload) => {
                return Err(LoaderError::Instantiation {
                    type_name: self.type_name.clone(),
                    source: AdapterError::ConstructionFailed(panic_message(payload)),
                });
            }
        };

        Ok(AdapterHandle::new(
            instance,
            &self.type_name,
            self.binary.clone(),
            self.library.clone(),
        ))
    }
}

impl<T: ?Sized> Clone for AdapterType<T> {
    fn clone(&self) -> Self {
        Self {
            type_name: self.type_name.clone(),
            binary: self.binary.clone(),
            constructor: self.constructor.clone(),
            library: self.library.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for AdapterType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterType")
            .field("type_name", &self.type_name)
            .field("binary", &self.binary)
            .field("constructible", &self.is_constructible())
            .finish()
    }
}

/// Source of adapter types
pub trait AdapterCatalog<T: ?Sized>: Send + Sync {
    /// List the adapter types provided by one binary
    ///
    /// Fails when the binary cannot be loaded; in that case no type from it is
    /// returned.
    fn inspect(&self, binary: &Path) -> LoaderResult<Vec<AdapterType<T>>>;
}

impl<T: ?Sized, C: AdapterCatalog<T> + ?Sized> AdapterCatalog<T> for Arc<C> {
    fn inspect(&self, binary: &Path) -> LoaderResult<Vec<AdapterType<T>>> {
        (**self).inspect(binary)
    }
}

/// Directory and single-file discovery over a catalog
pub struct TypeDiscovery<T: ?Sized> {
    catalog: Arc<dyn AdapterCatalog<T>>,
    extension: String,
}

impl<T: ?Sized> TypeDiscovery<T> {
    /// Discover binaries with the given extension (`so`, `.so` or `*.so`)
    pub fn new(catalog: Arc<dyn AdapterCatalog<T>>, extension: &str) -> Self {
        Self {
            catalog,
            extension: extension
                .trim_start_matches('*')
                .trim_start_matches('.')
                .to_string(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Whether `path` carries the adapter file extension
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension))
    }

    /// Lazily discover every constructible type in `dir`
    ///
    /// Files are visited in file name order. Binaries that fail to load are
    /// logged and skipped.
    pub fn discover_directory<'a>(
        &'a self,
        dir: &Path,
    ) -> std::io::Result<impl Iterator<Item = AdapterType<T>> + Send + use<'a, T>> {
        let mut binaries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.matches_extension(path))
            .collect();
        binaries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        debug!("Found {} candidate binaries in {:?}", binaries.len(), dir);

        Ok(binaries
            .into_iter()
            .flat_map(move |binary| self.inspect_binary(&binary)))
    }

    /// Discover the constructible types in a single binary
    ///
    /// A binary that fails to load is logged and yields no types.
    pub fn discover_file<P: AsRef<Path>>(&self, path: P) -> Vec<AdapterType<T>> {
        let path = path.as_ref();
        self.try_discover_file(path).unwrap_or_else(|e| {
            warn!("Skipping adapter binary {:?}: {}", path, e);
            Vec::new()
        })
    }

    /// Like [`discover_file`](Self::discover_file), but hands load failures back
    pub fn try_discover_file<P: AsRef<Path>>(&self, path: P) -> LoaderResult<Vec<AdapterType<T>>> {
        let path = path.as_ref();
        if !self.matches_extension(path) {
            debug!("Ignoring {:?}: not an adapter binary", path);
            return Ok(Vec::new());
        }
        self.try_inspect(path)
    }

    fn inspect_binary(&self, binary: &Path) -> Vec<AdapterType<T>> {
        self.try_inspect(binary).unwrap_or_else(|e| {
            warn!("Skipping adapter binary {:?}: {}", binary, e);
            Vec::new()
        })
    }

    fn try_inspect(&self, binary: &Path) -> LoaderResult<Vec<AdapterType<T>>> {
        debug!("Inspecting adapter binary {:?}", binary);

        let types = self.catalog.inspect(binary)?;
        Ok(types
            .into_iter()
            .filter(|adapter_type| {
                let keep = adapter_type.is_constructible();
                if !keep {
                    debug!(
                        "Skipping {}: no zero-argument constructor",
                        adapter_type.type_name()
                    );
                }
                keep
            })
            .collect())
    }
}

impl<T: ?Sized> Clone for TypeDiscovery<T> {
    fn clone(&self) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
            extension: self.extension.clone(),
        }
    }
}
