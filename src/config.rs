//! Runtime configuration for the model cache.
//!
//! Everything that the original design threaded through ambient globals
//! (installation root, device, precision) is an explicit value here,
//! passed into the cache and loader adapters at construction time.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::integrity::scanner::ScanPolicy;
use crate::loader::backend::{Device, Precision};

/// Default number of simultaneously resident models.
pub const DEFAULT_MAX_MODELS: usize = 2;

/// Command-line arguments for the registry maintenance tool.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sd-model-cache",
    about = "Model registry maintenance for the resident-model cache"
)]
pub struct Cli {
    /// Path to the model registry file (YAML).
    #[arg(short, long, default_value = "models.yaml")]
    pub registry: PathBuf,

    /// Installation root for resolving relative weight paths.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List registered models with their descriptions.
    List,
    /// Add or overwrite a registry entry.
    Add {
        name: String,
        /// Model format: "ckpt" or "diffusers".
        #[arg(long)]
        format: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        weights: Option<PathBuf>,
        /// Companion architecture config (ckpt only).
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Local directory of a packaged pipeline (diffusers only).
        #[arg(long)]
        path: Option<PathBuf>,
        /// Remote repository identifier (diffusers only).
        #[arg(long)]
        repo_id: Option<String>,
        /// Overwrite an existing entry with the same name.
        #[arg(long)]
        clobber: bool,
    },
    /// Delete a registry entry.
    Del { name: String },
    /// Mark a model as the default.
    SetDefault { name: String },
}

/// Cache-wide settings. Owned by the façade, shared read-only with the
/// loader adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Installation root; relative weight and config paths resolve
    /// against this.
    pub root_dir: PathBuf,

    /// Execution device models are promoted onto.
    pub device: Device,

    /// Precision models are converted to on load.
    pub precision: Precision,

    /// Slot budget: maximum number of simultaneously resident models
    /// (active + idle).
    pub max_loaded_models: usize,

    /// Policy for inconclusive safety-scan results.
    pub scan_policy: ScanPolicy,

    /// Restrict packaged pipelines to locally cached files.
    pub offline: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            device: Device::Cuda,
            precision: Precision::Half,
            max_loaded_models: DEFAULT_MAX_MODELS,
            scan_policy: ScanPolicy::Deny,
            offline: false,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a JSON file, falling back to defaults
    /// when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: CacheConfig = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(CacheConfig::default())
        }
    }

    /// Resolve a possibly-relative path against the installation root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.max_loaded_models, 2);
        assert_eq!(cfg.precision, Precision::Half);
        assert_eq!(cfg.device, Device::Cuda);
    }

    #[test]
    fn test_resolve_relative_against_root() {
        let cfg = CacheConfig {
            root_dir: PathBuf::from("/opt/pipeline"),
            ..Default::default()
        };
        assert_eq!(
            cfg.resolve(Path::new("models/sd.ckpt")),
            PathBuf::from("/opt/pipeline/models/sd.ckpt")
        );
        assert_eq!(
            cfg.resolve(Path::new("/abs/sd.ckpt")),
            PathBuf::from("/abs/sd.ckpt")
        );
    }
}
