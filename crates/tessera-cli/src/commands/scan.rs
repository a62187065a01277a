//! `tessera scan` command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use tessera_kernel::Adapter;
use tessera_loader::{AdapterCatalog, LibraryCatalog, TypeDiscovery};

/// Execute the `tessera scan` command
pub fn run(dir: &Path, extension: &str) -> anyhow::Result<()> {
    let catalog: Arc<dyn AdapterCatalog<dyn Adapter>> = Arc::new(LibraryCatalog::<dyn Adapter>::new());
    let discovery = TypeDiscovery::new(catalog, extension);

    let types: Vec<_> = discovery
        .discover_directory(dir)
        .with_context(|| format!("failed to read adapter directory {}", dir.display()))?
        .collect();

    if types.is_empty() {
        println!(
            "No adapter types found in {}",
            dir.display().to_string().cyan()
        );
        return Ok(());
    }

    println!();
    println!(
        "  {} adapter types in {}",
        types.len().to_string().yellow(),
        dir.display().to_string().cyan()
    );
    println!();

    for adapter_type in &types {
        let binary = adapter_type
            .binary()
            .and_then(|b| b.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("    {:<32} {}", binary.bold(), adapter_type.type_name());
    }
    println!();

    Ok(())
}
