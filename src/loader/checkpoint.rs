//! Legacy-checkpoint adapter.
//!
//! Load order matters: the safety scan runs before any checkpoint bytes
//! reach the deserializer, and the blob is hashed while it is already in
//! memory so the digest costs one read, not two.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::integrity::hasher::IntegrityHasher;
use crate::integrity::scanner::ScanGate;
use crate::registry::RegistryEntry;

use super::backend::{CheckpointBackend, ModelState, Precision};
use super::{LoadError, LoadedModel};

pub struct CheckpointLoader {
    config: Arc<CacheConfig>,
    backend: Box<dyn CheckpointBackend>,
    gate: ScanGate,
    hasher: IntegrityHasher,
}

impl CheckpointLoader {
    pub fn new(
        config: Arc<CacheConfig>,
        backend: Box<dyn CheckpointBackend>,
        gate: ScanGate,
    ) -> Self {
        Self {
            config,
            backend,
            gate,
            hasher: IntegrityHasher::new(),
        }
    }

    pub fn hasher_stats(&self) -> crate::integrity::hasher::HasherStats {
        self.hasher.stats()
    }

    fn require<'a, T>(
        name: &str,
        field: &'static str,
        value: Option<&'a T>,
    ) -> Result<&'a T, LoadError> {
        value.ok_or_else(|| LoadError::IncompleteEntry {
            name: name.to_string(),
            field,
        })
    }

    pub fn load(&mut self, name: &str, entry: &RegistryEntry) -> Result<LoadedModel, LoadError> {
        let weights = self
            .config
            .resolve(Self::require(name, "weights", entry.weights.as_ref())?);
        let arch_config = self
            .config
            .resolve(Self::require(name, "config", entry.config.as_ref())?);
        let width = *Self::require(name, "width", entry.width.as_ref())?;
        let height = *Self::require(name, "height", entry.height.as_ref())?;

        if !weights.exists() {
            return Err(LoadError::WeightsNotFound(weights));
        }
        if !arch_config.exists() {
            return Err(LoadError::ConfigNotFound(arch_config));
        }

        // Scan before a single checkpoint byte is deserialized.
        self.gate.check(&weights)?;

        info!(model = name, weights = %weights.display(), "Loading checkpoint");
        let started = Instant::now();

        let bytes = std::fs::read(&weights)?;
        let hash = self.hasher.digest(&weights, &bytes)?;
        let state_dict = self.backend.deserialize_weights(&bytes)?.into_state_dict();
        drop(bytes);

        let mut model = self.backend.instantiate(&arch_config)?;
        model.load_weights(state_dict, false)?;

        match self.config.precision {
            Precision::Half => debug!(model = name, "Using faster float16 precision"),
            Precision::Full => debug!(model = name, "Using more accurate float32 precision"),
        }
        model.set_precision(self.config.precision)?;

        self.merge_companion_decoder(name, entry, model.as_mut())?;

        model.migrate(self.config.device)?;
        model.set_inference_mode();

        info!(
            model = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Checkpoint loaded"
        );

        Ok(LoadedModel {
            model,
            width,
            height,
            hash,
        })
    }

    /// Merge a companion decoder (VAE) checkpoint over the model's own
    /// decoder, if one is configured and present on disk. A configured
    /// but missing file is skipped with a warning, not an error.
    fn merge_companion_decoder(
        &self,
        name: &str,
        entry: &RegistryEntry,
        model: &mut dyn ModelState,
    ) -> Result<(), LoadError> {
        let Some(vae_rel) = &entry.vae else {
            return Ok(());
        };
        let vae = self.config.resolve(vae_rel);
        if !vae.exists() {
            warn!(model = name, vae = %vae.display(), "VAE file not found, skipping");
            return Ok(());
        }

        info!(model = name, vae = %vae.display(), "Loading VAE weights");
        let bytes = std::fs::read(&vae)?;
        let mut decoder = self.backend.deserialize_weights(&bytes)?.into_state_dict();
        // Training-loss tensors in the VAE checkpoint are not decoder
        // weights.
        decoder.strip_prefix("loss");
        model.merge_decoder_weights(decoder)?;
        Ok(())
    }
}
