//! Test Adapter Library
//!
//! Built as a `cdylib` and loaded by the `library_adapters` integration
//! tests. `Steady` constructs normally; `Faulty` panics in its constructor.

use tessera_kernel::Adapter;

pub struct Steady;

impl Adapter for Steady {
    fn name(&self) -> &str {
        "steady"
    }

    fn status(&self) -> String {
        "ready".to_string()
    }
}

pub struct Faulty;

impl Adapter for Faulty {}

fn faulty() -> Faulty {
    panic!("faulty adapter refuses to start")
}

tessera_loader::declare_adapters!(dyn Adapter;
    Steady => Steady,
    Faulty => faulty(),
);
