//! Dynamic library adapter catalog
//!
//! Adapter crates built as `cdylib` export a small table describing the adapter
//! types they contain. The [`declare_adapters!`](crate::declare_adapters) macro
//! generates that table; [`LibraryCatalog`] reads it back.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use libloading::{Library, Symbol};
use parking_lot::Mutex;
use tessera_kernel::{AdapterError, capability_name};
use tracing::{debug, info};

use super::{AdapterCatalog, AdapterType, Constructor};
use crate::error::{LoaderError, LoaderResult};

/// Version of the exported adapter table layout
pub const ADAPTER_API_VERSION: u32 = 1;

/// Borrowed UTF-8 string passed across the library boundary
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl RawStr {
    /// Null string, returned for out-of-range indices
    pub const fn null() -> Self {
        Self {
            ptr: std::ptr::null(),
            len: 0,
        }
    }

    pub const fn from_static(s: &'static str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// Copy the string out
    ///
    /// # Safety
    /// `ptr` must be null or point to `len` readable bytes.
    pub unsafe fn to_owned_string(&self) -> Option<String> {
        if self.ptr.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        std::str::from_utf8(bytes).ok().map(str::to_string)
    }
}

type ApiVersionFn = unsafe extern "C" fn() -> u32;
type TypeCountFn = unsafe extern "C" fn() -> usize;
type TypeStrFn = unsafe extern "C" fn(usize) -> RawStr;

/// A loaded adapter library
pub struct AdapterLibrary {
    path: PathBuf,
    library: Library,
    api_version: u32,
    loaded_at: Instant,
}

impl AdapterLibrary {
    /// Get the library path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get API version
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Get when the library was loaded
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// Copy an exported function pointer out of the library
    ///
    /// # Safety
    /// `F` must match the exported symbol's real signature, and the pointer
    /// must not be called after this library is dropped.
    unsafe fn function<F: Copy>(&self, name: &str) -> LoaderResult<F> {
        let symbol: Symbol<F> = unsafe { self.library.get(name.as_bytes()) }
            .map_err(|e| LoaderError::discovery(&self.path, format!("missing symbol {}: {}", name, e)))?;
        Ok(*symbol)
    }
}

impl Drop for AdapterLibrary {
    fn drop(&mut self) {
        debug!("Unloading adapter library: {:?}", self.path);
    }
}

/// Catalog reading adapter types out of dynamic libraries
///
/// Only types whose exported capability name equals `T`'s are returned.
/// Loaded libraries are cached by path and stay mapped for as long as any
/// instance built from them is alive.
pub struct LibraryCatalog<T: ?Sized> {
    libraries: Mutex<HashMap<PathBuf, Arc<AdapterLibrary>>>,
    api_version: u32,
    _capability: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> LibraryCatalog<T> {
    /// Current API version
    pub const CURRENT_API_VERSION: u32 = ADAPTER_API_VERSION;

    pub fn new() -> Self {
        Self {
            libraries: Mutex::new(HashMap::new()),
            api_version: Self::CURRENT_API_VERSION,
            _capability: PhantomData,
        }
    }

    /// Paths of the libraries loaded so far
    pub fn loaded_libraries(&self) -> Vec<PathBuf> {
        self.libraries.lock().keys().cloned().collect()
    }

    fn load_library(&self, path: &Path) -> LoaderResult<Arc<AdapterLibrary>> {
        if let Some(library) = self.libraries.lock().get(path) {
            return Ok(Arc::clone(library));
        }

        debug!("Loading adapter library: {:?}", path);

        let library =
            unsafe { Library::new(path) }.map_err(|e| LoaderError::discovery(path, e))?;

        let mut loaded = AdapterLibrary {
            path: path.to_path_buf(),
            library,
            api_version: 0,
            loaded_at: Instant::now(),
        };

        let version_fn: ApiVersionFn = unsafe { loaded.function("_adapter_api_version")? };
        loaded.api_version = unsafe { version_fn() };

        if loaded.api_version != self.api_version {
            return Err(LoaderError::discovery(
                path,
                format!(
                    "API version mismatch: expected {}, got {}",
                    self.api_version, loaded.api_version
                ),
            ));
        }

        let loaded = Arc::new(loaded);
        self.libraries
            .lock()
            .insert(path.to_path_buf(), Arc::clone(&loaded));

        info!("Loaded adapter library: {:?}", path);
        Ok(loaded)
    }
}

impl<T: ?Sized> Default for LibraryCatalog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> AdapterCatalog<T> for LibraryCatalog<T> {
    fn inspect(&self, binary: &Path) -> LoaderResult<Vec<AdapterType<T>>> {
        let library = self.load_library(binary)?;

        let (count, name_fn, capability_fn, create_fn) = unsafe {
            let count_fn: TypeCountFn = library.function("_adapter_type_count")?;
            let name_fn: TypeStrFn = library.function("_adapter_type_name")?;
            let capability_fn: TypeStrFn = library.function("_adapter_capability")?;
            let create_fn: unsafe extern "C" fn(usize) -> *mut Box<T> =
                library.function("_adapter_create")?;
            (count_fn(), name_fn, capability_fn, create_fn)
        };

        let wanted = capability_name::<T>();
        let mut types = Vec::with_capacity(count);

        for index in 0..count {
            let (name, capability) =
                unsafe { (name_fn(index).to_owned_string(), capability_fn(index).to_owned_string()) };

            let Some(name) = name else {
                return Err(LoaderError::discovery(
                    binary,
                    format!("adapter type {} has no valid name", index),
                ));
            };

            if capability.as_deref() != Some(wanted) {
                debug!(
                    "Skipping {} in {:?}: capability {:?} is not {}",
                    name, binary, capability, wanted
                );
                continue;
            }

            let keep_alive = Arc::clone(&library);
            let constructor: Constructor<T> = Arc::new(move || {
                let _library = &keep_alive;
                let raw = unsafe { create_fn(index) };
                if raw.is_null() {
                    return Err(AdapterError::ConstructionFailed(
                        "library constructor failed or panicked".to_string(),
                    ));
                }
                Ok(*unsafe { Box::from_raw(raw) })
            });

            types.push(
                AdapterType::without_constructor(name)
                    .with_binary(binary)
                    .with_constructor(constructor)
                    .with_library(Arc::clone(&library)),
            );
        }

        Ok(types)
    }
}

/// Export adapter types from a `cdylib` crate
///
/// ```ignore
/// tessera_loader::declare_adapters!(dyn Publisher;
///     UdpPublisher => UdpPublisher::default(),
///     FilePublisher => FilePublisher::new("out.log"),
/// );
/// ```
///
/// Every listed type must coerce into `Box<capability>`. A constructor
/// expression that panics is caught inside the library and reported to the
/// host as an instantiation failure.
#[macro_export]
macro_rules! declare_adapters {
    ($capability:ty; $($adapter:ty => $create:expr),+ $(,)?) => {
        const __TESSERA_ADAPTER_NAMES: &[&str] = &[$(stringify!($adapter)),+];

        #[unsafe(no_mangle)]
        pub extern "C" fn _adapter_api_version() -> u32 {
            $crate::discovery::ADAPTER_API_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _adapter_type_count() -> usize {
            __TESSERA_ADAPTER_NAMES.len()
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _adapter_type_name(index: usize) -> $crate::discovery::RawStr {
            match __TESSERA_ADAPTER_NAMES.get(index) {
                Some(name) => $crate::discovery::RawStr::from_static(name),
                None => $crate::discovery::RawStr::null(),
            }
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _adapter_capability(_index: usize) -> $crate::discovery::RawStr {
            $crate::discovery::RawStr::from_static($crate::capability_name::<$capability>())
        }

        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _adapter_create(index: usize) -> *mut Box<$capability> {
            let constructors: &[fn() -> Box<$capability>] = &[$(
                {
                    fn create() -> Box<$capability> {
                        Box::new($create)
                    }
                    create
                }
            ),+];

            let Some(create) = constructors.get(index) else {
                return ::std::ptr::null_mut();
            };
            // Unwinding out of an `extern "C"` function aborts the host
            match ::std::panic::catch_unwind(*create) {
                Ok(adapter) => Box::into_raw(Box::new(adapter)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
