//! The cache façade.
//!
//! Owns the authoritative mapping from model name to loaded-model
//! record, the registry, the loader adapters, and the recency queue.
//! All residency transitions (promote, offload, evict) go through the
//! façade; nothing else holds a live reference to a model's state.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::convert::{find_unconverted, CheckpointConverter};
use crate::integrity::hasher::HasherStats;
use crate::integrity::scanner::{BasicPickleScanner, ScanGate};
use crate::loader::backend::{
    BackendError, CheckpointBackend, Device, ModelState, PipelineBackend,
};
use crate::loader::{LoadError, ModelLoader};
use crate::registry::{ModelFormat, ModelRegistry, RegistryEntry, RegistryError};

use super::residency::{Residency, ResidencyTracker};

/// One resident model. The boxed state is exclusively owned; dropping
/// the record reclaims its memory.
pub struct LoadedModelRecord {
    pub model: Box<dyn ModelState>,
    pub width: u32,
    pub height: u32,
    pub hash: String,
    residency: Residency,
}

impl LoadedModelRecord {
    pub fn residency(&self) -> Residency {
        self.residency
    }
}

/// Load status of a registered model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelStatus {
    Active,
    Cached,
    NotLoaded,
}

/// One row of [`ModelCache::list_models`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelListing {
    pub status: ModelStatus,
    pub description: String,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("'{0}' is not a known model name; check the model registry")]
    UnknownModel(String),

    /// Fatal: a load failed and there is no previously active model to
    /// fall back to.
    #[error("model '{name}' could not be loaded and no previously active model exists to restore")]
    NoFallback {
        name: String,
        #[source]
        source: LoadError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The resident-model cache.
pub struct ModelCache {
    config: Arc<CacheConfig>,
    registry: ModelRegistry,
    loader: ModelLoader,
    records: HashMap<String, LoadedModelRecord>,
    tracker: ResidencyTracker,
    active: Option<String>,
}

impl ModelCache {
    pub fn new(
        config: CacheConfig,
        registry: ModelRegistry,
        checkpoint_backend: Box<dyn CheckpointBackend>,
        pipeline_backend: Box<dyn PipelineBackend>,
        gate: ScanGate,
    ) -> Self {
        let config = Arc::new(config);
        let tracker = ResidencyTracker::new(config.max_loaded_models);
        let loader = ModelLoader::new(config.clone(), checkpoint_backend, pipeline_backend, gate);
        Self {
            config,
            registry,
            loader,
            records: HashMap::new(),
            tracker,
            active: None,
        }
    }

    /// Construct with the built-in pickle scanner and the configured
    /// inconclusive-scan policy.
    pub fn with_default_scanner(
        config: CacheConfig,
        registry: ModelRegistry,
        checkpoint_backend: Box<dyn CheckpointBackend>,
        pipeline_backend: Box<dyn PipelineBackend>,
    ) -> Self {
        let gate = ScanGate::new(Box::new(BasicPickleScanner), config.scan_policy);
        Self::new(config, registry, checkpoint_backend, pipeline_backend, gate)
    }

    /// Fetch a model by name, loading or promoting as needed.
    ///
    /// An unknown name is recovered softly: it logs and returns the
    /// previously active record unchanged. A failed load restores the
    /// previously active model; if none exists the failure is fatal
    /// ([`CacheError::NoFallback`]).
    pub fn get_model(&mut self, name: &str) -> Result<&LoadedModelRecord, CacheError> {
        if !self.registry.contains(name) {
            warn!(model = name, "Unknown model name; check the model registry");
            return match self.active.clone() {
                Some(current) => self.record(&current),
                None => Err(CacheError::UnknownModel(name.to_string())),
            };
        }

        // Same-name fast path: a promotion no-op (re-promoting only if
        // the model was explicitly offloaded in the meantime).
        if self.active.as_deref() == Some(name) {
            self.tracker.mark_used(name);
            self.promote(name)?;
            return self.record(name);
        }

        let resident = self.records.contains_key(name);
        let previous = self.active.take();
        if let Some(prev) = previous.as_deref() {
            self.offload_model(prev)?;
        }

        if resident {
            info!(model = name, "Retrieving model from RAM cache");
            self.promote(name)?;
        } else {
            // Capacity is checked after the demotion above: the
            // just-demoted model is no longer active and is a legal
            // eviction victim, so the budget holds even at one slot.
            if let Some(victim) = self.tracker.ensure_capacity(None) {
                info!(
                    model = %victim,
                    budget = self.tracker.budget(),
                    "Cache slot budget reached; evicting least recently used model"
                );
                // Full eviction: dropping the record reclaims both device
                // and host memory.
                self.records.remove(&victim);
            }

            let entry = self
                .registry
                .get(name)
                .cloned()
                .ok_or_else(|| CacheError::UnknownModel(name.to_string()))?;
            match self.loader.load(name, &entry) {
                Ok(loaded) => {
                    self.records.insert(
                        name.to_string(),
                        LoadedModelRecord {
                            model: loaded.model,
                            width: loaded.width,
                            height: loaded.height,
                            hash: loaded.hash,
                            residency: Residency::Active,
                        },
                    );
                }
                Err(err) => {
                    error!(model = name, error = %err, "Model could not be loaded");
                    let Some(prev) = previous else {
                        return Err(CacheError::NoFallback {
                            name: name.to_string(),
                            source: err,
                        });
                    };
                    warn!(model = %prev, "Restoring previously active model");
                    self.restore_fallback(&prev, name, err)?;
                    self.tracker.mark_used(&prev);
                    self.active = Some(prev.clone());
                    return self.record(&prev);
                }
            }
        }

        self.active = Some(name.to_string());
        self.tracker.mark_used(name);
        self.record(name)
    }

    /// Register a model. Fails on incomplete attributes, or on a
    /// duplicate name without `clobber`. Clobbering invalidates any
    /// resident record for the name.
    pub fn add_model(
        &mut self,
        name: &str,
        entry: RegistryEntry,
        clobber: bool,
    ) -> Result<(), CacheError> {
        self.registry.insert(name, entry, clobber)?;
        if clobber {
            self.invalidate(name);
        }
        Ok(())
    }

    /// Remove a model from the registry and the recency queue. Does not
    /// by itself free a resident record; pair with [`offload_model`] or
    /// eviction on the calling path.
    ///
    /// [`offload_model`]: ModelCache::offload_model
    pub fn del_model(&mut self, name: &str) -> Result<(), CacheError> {
        if self.registry.remove(name).is_none() {
            return Err(CacheError::UnknownModel(name.to_string()));
        }
        self.tracker.remove(name);
        Ok(())
    }

    /// Transfer a resident model to the holding area. No-op when the
    /// model is not resident.
    pub fn offload_model(&mut self, name: &str) -> Result<(), CacheError> {
        let Some(record) = self.records.get_mut(name) else {
            return Ok(());
        };
        info!(model = name, "Offloading model to system RAM");
        // On a CPU-only machine the holding area is the execution
        // device; there is nothing to transfer.
        if self.config.device.is_accelerator() {
            record.model.migrate(Device::Cpu)?;
            debug!(model = name, "Transient device memory reclaimed");
        }
        record.residency = Residency::Idle;
        Ok(())
    }

    /// Write the registry out to `path` atomically.
    pub fn commit(&self, path: &Path) -> Result<(), CacheError> {
        self.registry.commit(path)?;
        Ok(())
    }

    /// Sweep `weights_dir` for checkpoint files that have not been
    /// converted into `dest_dir` yet, convert them through the
    /// collaborator, import them as packaged-pipeline entries
    /// (clobbering any previous definition), and commit the registry.
    ///
    /// Returns the number of models imported. A single failed
    /// conversion is logged and skipped, not fatal.
    pub fn autoconvert(
        &mut self,
        converter: &dyn CheckpointConverter,
        weights_dir: &Path,
        dest_dir: &Path,
        registry_path: &Path,
    ) -> Result<usize, CacheError> {
        let pending = find_unconverted(weights_dir, dest_dir).map_err(LoadError::Io)?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!(
            count = pending.len(),
            dir = %weights_dir.display(),
            "Found unconverted checkpoint files; optimizing and importing"
        );

        let mut imported = 0;
        for (checkpoint, dest) in pending {
            info!(file = %checkpoint.display(), "Optimizing checkpoint (30-60s)");
            if let Err(err) = converter.convert(&checkpoint, &dest) {
                error!(file = %checkpoint.display(), error = %err, "Conversion failed");
                continue;
            }

            let name = dest
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| checkpoint.to_string_lossy().into_owned());
            let mut entry = RegistryEntry::new(ModelFormat::Diffusers);
            entry.path = Some(dest.clone());
            entry.description = Some(format!("Optimized version of {name}"));
            self.add_model(&name, entry, true)?;
            info!(model = name, dest = %dest.display(), "Optimized model imported");
            imported += 1;
        }

        self.commit(registry_path)?;
        Ok(imported)
    }

    /// Statuses and descriptions of every registered model.
    pub fn list_models(&self) -> BTreeMap<String, ModelListing> {
        self.registry
            .names()
            .map(|name| {
                let status = if self.active.as_deref() == Some(name) {
                    ModelStatus::Active
                } else if self.records.contains_key(name) {
                    ModelStatus::Cached
                } else {
                    ModelStatus::NotLoaded
                };
                let description = self
                    .registry
                    .get(name)
                    .and_then(|entry| entry.description.clone())
                    .unwrap_or_else(|| "<no description>".to_string());
                (name.to_string(), ModelListing { status, description })
            })
            .collect()
    }

    /// Snapshot of a model's registry attributes.
    pub fn model_info(&self, name: &str) -> Option<RegistryEntry> {
        self.registry.get(name).cloned()
    }

    pub fn default_model(&self) -> Option<String> {
        self.registry.default_model().map(str::to_string)
    }

    pub fn set_default_model(&mut self, name: &str) -> Result<(), CacheError> {
        self.registry.set_default_model(name)?;
        Ok(())
    }

    pub fn is_legacy(&self, name: &str) -> bool {
        self.registry.is_legacy(name)
    }

    pub fn active_model_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Mutable access to the active model's record, for running the
    /// actual computation.
    pub fn active_model_mut(&mut self) -> Option<&mut LoadedModelRecord> {
        let name = self.active.clone()?;
        self.records.get_mut(&name)
    }

    pub fn is_resident(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn resident_count(&self) -> usize {
        self.records.len()
    }

    /// Oldest-first recency order of resident models.
    pub fn recency_order(&self) -> Vec<String> {
        self.tracker.order().map(str::to_string).collect()
    }

    pub fn hasher_stats(&self) -> HasherStats {
        self.loader.hasher_stats()
    }

    fn record(&self, name: &str) -> Result<&LoadedModelRecord, CacheError> {
        self.records
            .get(name)
            .ok_or_else(|| CacheError::UnknownModel(name.to_string()))
    }

    /// Bring the fallback model back after `failed` could not be
    /// loaded. The fallback may itself have been evicted to make room
    /// for the failed load; in that case it is reloaded from storage.
    fn restore_fallback(
        &mut self,
        prev: &str,
        failed: &str,
        err: LoadError,
    ) -> Result<(), CacheError> {
        if !self.records.contains_key(prev) {
            let entry = self
                .registry
                .get(prev)
                .cloned()
                .ok_or_else(|| CacheError::UnknownModel(prev.to_string()))?;
            match self.loader.load(prev, &entry) {
                Ok(loaded) => {
                    self.records.insert(
                        prev.to_string(),
                        LoadedModelRecord {
                            model: loaded.model,
                            width: loaded.width,
                            height: loaded.height,
                            hash: loaded.hash,
                            residency: Residency::Active,
                        },
                    );
                }
                Err(reload_err) => {
                    error!(model = prev, error = %reload_err, "Fallback model could not be reloaded");
                    return Err(CacheError::NoFallback {
                        name: failed.to_string(),
                        source: err,
                    });
                }
            }
        }
        self.promote(prev)
    }

    /// Transfer a resident model onto the execution device and mark it
    /// active. No-op if it is already there.
    fn promote(&mut self, name: &str) -> Result<(), CacheError> {
        let device = self.config.device;
        let Some(record) = self.records.get_mut(name) else {
            return Err(CacheError::UnknownModel(name.to_string()));
        };
        if record.residency != Residency::Active {
            record.model.migrate(device)?;
            record.residency = Residency::Active;
        }
        Ok(())
    }

    /// Drop any resident record for `name` and forget its recency slot.
    /// Used when a clobbering registration replaces the entry the record
    /// was loaded from.
    fn invalidate(&mut self, name: &str) {
        if self.records.remove(name).is_some() {
            debug!(model = name, "Invalidated cached model record");
        }
        self.tracker.remove(name);
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
    }
}
