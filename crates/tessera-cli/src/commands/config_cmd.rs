//! `tessera config` command implementation

use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use tessera_loader::LoaderConfig;

/// Execute the `tessera config` command
pub fn run(output: Option<&Path>) -> anyhow::Result<()> {
    let config = LoaderConfig::default();

    match output {
        Some(path) => {
            config
                .save(path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{} {}",
                "Wrote default configuration to".green(),
                path.display()
            );
        }
        None => {
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{}", rendered);
        }
    }

    Ok(())
}
