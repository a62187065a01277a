//! Adapter capability contracts
//!
//! An adapter is any instance of a caller-chosen capability type. On top of the
//! base [`Adapter`] trait it may expose two optional capabilities, detected at
//! runtime rather than through a shared base type:
//! - [`Lifecycle`]: explicit initialization before the adapter becomes visible
//! - [`Disposable`]: explicit resource release during teardown

use async_trait::async_trait;

pub mod error;
pub use error::AdapterError;

/// Result type for adapter-side operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Lifecycle capability
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Called exactly once, before the adapter is registered.
    async fn initialize(&self) -> AdapterResult<()>;
}

/// Disposal capability
#[async_trait]
pub trait Disposable: Send + Sync {
    /// Called exactly once, during teardown, before the unload notification.
    async fn dispose(&self) -> AdapterResult<()>;
}

/// Base trait for every adapter instance.
///
/// Capability traits chosen by the host application extend this one, e.g.
/// `trait Publisher: Adapter { .. }`, and the loader is then instantiated with
/// `dyn Publisher` as its target type.
pub trait Adapter: Send + Sync {
    /// Display name used in logs and status reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Free-form status text appended to the loader's status report
    fn status(&self) -> String {
        String::new()
    }

    /// Lifecycle capability, if the adapter has one
    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }

    /// Disposal capability, if the adapter has one
    fn as_disposable(&self) -> Option<&dyn Disposable> {
        None
    }
}

/// Stable name of a capability type.
///
/// Dynamic libraries export this string for each adapter type so the loader can
/// check that the type implements the capability it was asked for.
pub fn capability_name<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}
