//! Shared handle to a live adapter instance

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::discovery::AdapterLibrary;

struct HandleInner<T: ?Sized> {
    id: Uuid,
    type_name: String,
    binary: Option<PathBuf>,
    created_at: Instant,
    // Declared before `library`: the instance must drop while its code is still mapped.
    adapter: Box<T>,
    library: Option<Arc<AdapterLibrary>>,
}

/// Cheaply clonable handle to one adapter instance.
///
/// Equality is identity: two handles are equal only when they refer to the same
/// instance, whatever the instance's contents.
pub struct AdapterHandle<T: ?Sized> {
    inner: Arc<HandleInner<T>>,
}

impl<T: ?Sized> AdapterHandle<T> {
    pub(crate) fn new(
        adapter: Box<T>,
        type_name: &str,
        binary: Option<PathBuf>,
        library: Option<Arc<AdapterLibrary>>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::now_v7(),
                type_name: type_name.to_string(),
                binary,
                created_at: Instant::now(),
                adapter,
                library,
            }),
        }
    }

    /// Unique instance ID
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Name of the type this instance was built from
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    /// Binary the type was discovered in
    pub fn binary(&self) -> Option<&Path> {
        self.inner.binary.as_deref()
    }

    /// When the instance was constructed
    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// Whether the instance's code lives in a dynamically loaded library
    pub fn is_dynamic(&self) -> bool {
        self.inner.library.is_some()
    }

    /// The adapter instance
    pub fn adapter(&self) -> &T {
        &self.inner.adapter
    }

    /// Whether both handles refer to the same instance
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: ?Sized> Deref for AdapterHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.adapter()
    }
}

impl<T: ?Sized> Clone for AdapterHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> PartialEq for AdapterHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other)
    }
}

impl<T: ?Sized> Eq for AdapterHandle<T> {}

impl<T: ?Sized> fmt::Debug for AdapterHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("id", &self.inner.id)
            .field("type_name", &self.inner.type_name)
            .field("binary", &self.inner.binary)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_kernel::Adapter;

    struct Counter(u32);

    impl Adapter for Counter {}

    #[test]
    fn test_identity_equality() {
        let a: AdapterHandle<dyn Adapter> = AdapterHandle::new(Box::new(Counter(1)), "Counter", None, None);
        let b: AdapterHandle<dyn Adapter> = AdapterHandle::new(Box::new(Counter(1)), "Counter", None, None);

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        assert!(!a.is_dynamic());
    }

    #[test]
    fn test_accessors() {
        let handle = AdapterHandle::new(
            Box::new(Counter(3)),
            "Counter",
            Some(PathBuf::from("/adapters/counter.so")),
            None,
        );

        assert_eq!(handle.type_name(), "Counter");
        assert_eq!(handle.binary(), Some(Path::new("/adapters/counter.so")));
        assert_eq!(handle.adapter().0, 3);
        assert_eq!(handle.0, 3);
    }
}
