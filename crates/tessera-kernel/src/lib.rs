//! Tessera kernel
//!
//! Contracts shared between the adapter loader and adapter implementations:
//! - [`Adapter`] base trait plus the optional [`Lifecycle`] and [`Disposable`] capabilities
//! - [`AdapterError`] returned by adapter code
//! - multi-format configuration loading ([`config`])

pub mod adapter;
pub mod config;

pub use adapter::{
    Adapter, AdapterError, AdapterResult, Disposable, Lifecycle, capability_name,
};
