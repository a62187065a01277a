//! In-process adapter catalog

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tessera_kernel::AdapterResult;

use super::{AdapterCatalog, AdapterType, Constructor};
use crate::error::{LoaderError, LoaderResult};

struct TableEntry<T: ?Sized> {
    type_name: String,
    constructor: Option<Constructor<T>>,
}

/// Catalog of statically linked adapter types
///
/// Types are registered under the file name of the binary that "provides" them,
/// so a directory of marker files drives discovery exactly like a directory of
/// real libraries. Probing a file name with no registrations fails like an
/// unloadable binary.
pub struct StaticCatalog<T: ?Sized> {
    binaries: HashMap<String, Vec<TableEntry<T>>>,
}

impl<T: ?Sized> StaticCatalog<T> {
    pub fn new() -> Self {
        Self {
            binaries: HashMap::new(),
        }
    }

    /// Register a constructible type under `binary`
    pub fn with_type<F>(mut self, binary: &str, type_name: &str, constructor: F) -> Self
    where
        F: Fn() -> AdapterResult<Box<T>> + Send + Sync + 'static,
    {
        self.insert(binary, type_name, Some(Arc::new(constructor)));
        self
    }

    /// Register a type without a zero-argument constructor
    pub fn with_unconstructible_type(mut self, binary: &str, type_name: &str) -> Self {
        self.insert(binary, type_name, None);
        self
    }

    /// Number of binaries with at least one registration
    pub fn binary_count(&self) -> usize {
        self.binaries.len()
    }

    fn insert(&mut self, binary: &str, type_name: &str, constructor: Option<Constructor<T>>) {
        self.binaries
            .entry(binary.to_string())
            .or_default()
            .push(TableEntry {
                type_name: type_name.to_string(),
                constructor,
            });
    }
}

impl<T: ?Sized> Default for StaticCatalog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> AdapterCatalog<T> for StaticCatalog<T> {
    fn inspect(&self, binary: &Path) -> LoaderResult<Vec<AdapterType<T>>> {
        let file_name = binary
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LoaderError::discovery(binary, "invalid file name"))?;

        let entries = self
            .binaries
            .get(file_name)
            .ok_or_else(|| LoaderError::discovery(binary, "no adapter table registered"))?;

        Ok(entries
            .iter()
            .map(|entry| {
                let adapter_type =
                    AdapterType::without_constructor(entry.type_name.clone()).with_binary(binary);
                match &entry.constructor {
                    Some(constructor) => adapter_type.with_constructor(Arc::clone(constructor)),
                    None => adapter_type,
                }
            })
            .collect())
    }
}
