//! `tessera watch` command implementation

use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use tessera_kernel::Adapter;
use tessera_loader::{AdapterLoader, LoaderConfig, LoaderEvent};
use tracing::info;

/// Execute the `tessera watch` command
pub async fn run(config_path: Option<&Path>, dir: Option<&Path>, status: bool) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => LoaderConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => LoaderConfig::default(),
    };
    if let Some(dir) = dir {
        config = config.with_adapter_directory(dir);
    }
    config.watch_for_adapters = true;

    let mut loader: AdapterLoader<dyn Adapter> = AdapterLoader::with_library_catalog(config);
    let mut events = loader.subscribe();

    loader
        .initialize()
        .await
        .context("failed to initialize adapter loader")?;

    if status {
        println!("{}", loader.status().await);
    }

    println!(
        "Watching {} for new adapters (Ctrl-C to stop)",
        loader
            .adapter_directory()
            .map(|d| d.display().to_string())
            .unwrap_or_default()
            .cyan()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, stopping adapter loader");
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            }
        }
    }

    println!();
    loader.dispose().await.context("failed to dispose adapter loader")?;
    println!("{}", "Adapter loader stopped".green());
    Ok(())
}

fn print_event(event: &LoaderEvent<dyn Adapter>) {
    match event {
        LoaderEvent::AdapterCreated { adapter } => {
            println!("  {} {}", "created ".dimmed(), adapter.type_name());
        }
        LoaderEvent::AdapterLoaded { adapter } => {
            println!(
                "  {} {} {}",
                "loaded  ".green(),
                adapter.type_name().bold(),
                adapter
                    .binary()
                    .map(|b| b.display().to_string())
                    .unwrap_or_default()
                    .dimmed()
            );
        }
        LoaderEvent::AdapterUnloaded { adapter } => {
            println!("  {} {}", "unloaded".yellow(), adapter.type_name());
        }
        LoaderEvent::AdapterLoadFailed { candidate, error } => {
            println!("  {} {}: {}", "failed  ".red(), candidate.type_name.bold(), error);
        }
        LoaderEvent::OperationFailed { adapter, error } => {
            println!("  {} {}: {}", "op error".red(), adapter.type_name().bold(), error);
        }
        other => println!("  {}", other.kind()),
    }
}
