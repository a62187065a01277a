//! Tessera CLI - inspect adapter directories and run a watching adapter loader

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command_async(cli))
}

async fn run_command_async(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Scan { dir, extension } => {
            commands::scan::run(&dir, &extension)?;
        }

        Commands::Watch {
            config,
            dir,
            status,
        } => {
            commands::watch::run(config.as_deref(), dir.as_deref(), status).await?;
        }

        Commands::Config { output } => {
            commands::config_cmd::run(output.as_deref())?;
        }
    }

    Ok(())
}
