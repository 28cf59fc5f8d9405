//! Loader adapters: materialize a registry entry into a loaded model.
//!
//! One adapter per weight format, selected once on the entry's format
//! tag:
//! - [`checkpoint`]: legacy single-file checkpoints (scan, hash,
//!   deserialize, instantiate, tolerant weight load)
//! - [`diffusers`]: packaged pipelines (local or remote, with a
//!   half-to-full precision fallback)
//!
//! Adapters never mutate cache state; a failed load surfaces as a
//! [`LoadError`] and leaves nothing behind.

pub mod backend;
pub mod checkpoint;
pub mod diffusers;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::CacheConfig;
use crate::integrity::hasher::HasherStats;
use crate::integrity::scanner::ScanGate;
use crate::integrity::IntegrityError;
use crate::registry::{ModelFormat, RegistryEntry};

use self::backend::{BackendError, CheckpointBackend, ModelState, PipelineBackend};
use self::checkpoint::CheckpointLoader;
use self::diffusers::DiffusersLoader;

/// The normalized product of a successful load.
pub struct LoadedModel {
    pub model: Box<dyn ModelState>,
    pub width: u32,
    pub height: u32,
    pub hash: String,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("weights file not found: {0}")]
    WeightsNotFound(PathBuf),

    #[error("model config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("model '{name}' has no '{field}' attribute in its registry entry")]
    IncompleteEntry { name: String, field: &'static str },

    #[error("diffusers model '{0}' must define either 'path' or 'repo_id'")]
    MissingSource(String),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Format dispatch over the two adapters.
pub struct ModelLoader {
    checkpoint: CheckpointLoader,
    diffusers: DiffusersLoader,
}

impl ModelLoader {
    pub fn new(
        config: Arc<CacheConfig>,
        checkpoint_backend: Box<dyn CheckpointBackend>,
        pipeline_backend: Box<dyn PipelineBackend>,
        gate: ScanGate,
    ) -> Self {
        Self {
            checkpoint: CheckpointLoader::new(config.clone(), checkpoint_backend, gate),
            diffusers: DiffusersLoader::new(config, pipeline_backend),
        }
    }

    /// Materialize `entry` from storage.
    pub fn load(&mut self, name: &str, entry: &RegistryEntry) -> Result<LoadedModel, LoadError> {
        match entry.format {
            ModelFormat::Checkpoint => self.checkpoint.load(name, entry),
            ModelFormat::Diffusers => self.diffusers.load(name, entry),
        }
    }

    pub fn hasher_stats(&self) -> HasherStats {
        self.checkpoint.hasher_stats()
    }
}
