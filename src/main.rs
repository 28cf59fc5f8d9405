//! Registry maintenance CLI for the resident-model cache.
//!
//! The cache itself is embedded by the generation pipeline; this binary
//! only edits and inspects the model registry document.

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use sd_model_cache::config::{Cli, Command};
use sd_model_cache::registry::{ModelFormat, ModelRegistry, RegistryEntry};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "sd_model_cache=debug"
    } else {
        "sd_model_cache=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(false)
        .init();

    let mut registry = ModelRegistry::load(&cli.registry)
        .with_context(|| format!("failed to load registry {}", cli.registry.display()))?;

    match cli.command {
        Command::List => {
            for name in registry.names() {
                let entry = match registry.get(name) {
                    Some(entry) => entry,
                    None => continue,
                };
                let marker = if entry.default { "*" } else { " " };
                let format = entry.format.to_string();
                let description = entry.description.as_deref().unwrap_or("<no description>");
                println!("{marker} {name:25} {format:>10}  {description}");
            }
        }

        Command::Add {
            name,
            format,
            description,
            weights,
            config,
            width,
            height,
            path,
            repo_id,
            clobber,
        } => {
            let format = match format.as_str() {
                "ckpt" => ModelFormat::Checkpoint,
                "diffusers" => ModelFormat::Diffusers,
                other => bail!("unknown model format '{other}' (expected 'ckpt' or 'diffusers')"),
            };
            let mut entry = RegistryEntry::new(format);
            entry.description = description;
            entry.weights = weights;
            entry.config = config;
            entry.width = width;
            entry.height = height;
            entry.path = path;
            entry.repo_id = repo_id;

            registry.insert(&name, entry, clobber)?;
            registry.commit(&cli.registry)?;
            info!(model = name, "Model registered");
        }

        Command::Del { name } => {
            if registry.remove(&name).is_none() {
                bail!("unknown model '{name}'");
            }
            registry.commit(&cli.registry)?;
            info!(model = name, "Model deleted");
        }

        Command::SetDefault { name } => {
            registry.set_default_model(&name)?;
            registry.commit(&cli.registry)?;
            info!(model = name, "Default model updated");
        }
    }

    Ok(())
}
