//! Stub collaborators shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sd_model_cache::cache::manager::ModelCache;
use sd_model_cache::config::CacheConfig;
use sd_model_cache::convert::CheckpointConverter;
use sd_model_cache::integrity::scanner::{ScanGate, ScanPolicy, ScanReport, WeightScanner};
use sd_model_cache::integrity::IntegrityError;
use sd_model_cache::loader::backend::{
    BackendError, CheckpointBackend, Device, ModelState, PipelineBackend, PipelineHandle,
    PipelineSource, Precision, StateDict, WeightArchive,
};
use sd_model_cache::registry::{ModelFormat, ModelRegistry, RegistryEntry};

/// Minimal opaque model: records device placement and inference mode,
/// optionally counting device transfers.
pub struct StubModel {
    device: Device,
    inference: bool,
    migrations: Option<Arc<AtomicUsize>>,
}

impl StubModel {
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
            inference: false,
            migrations: None,
        }
    }

    pub fn with_counter(migrations: Arc<AtomicUsize>) -> Self {
        Self {
            migrations: Some(migrations),
            ..Self::new()
        }
    }
}

impl ModelState for StubModel {
    fn migrate(&mut self, device: Device) -> Result<(), BackendError> {
        if let Some(count) = &self.migrations {
            count.fetch_add(1, Ordering::SeqCst);
        }
        self.device = device;
        Ok(())
    }

    fn load_weights(&mut self, _weights: StateDict, _strict: bool) -> Result<(), BackendError> {
        Ok(())
    }

    fn merge_decoder_weights(&mut self, _weights: StateDict) -> Result<(), BackendError> {
        Ok(())
    }

    fn set_precision(&mut self, _precision: Precision) -> Result<(), BackendError> {
        Ok(())
    }

    fn set_inference_mode(&mut self) {
        self.inference = true;
    }

    fn device(&self) -> Device {
        self.device
    }
}

/// Checkpoint backend that counts architecture instantiations and the
/// device transfers of every model it produced, so tests can assert
/// whether a request hit storage or the resident cache.
pub struct CountingCheckpointBackend {
    pub instantiations: Arc<AtomicUsize>,
    pub migrations: Arc<AtomicUsize>,
}

impl CountingCheckpointBackend {
    pub fn new() -> Self {
        Self {
            instantiations: Arc::new(AtomicUsize::new(0)),
            migrations: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CheckpointBackend for CountingCheckpointBackend {
    fn deserialize_weights(&self, bytes: &[u8]) -> Result<WeightArchive, BackendError> {
        let mut sd = StateDict::new();
        sd.insert("model.weight", bytes.to_vec());
        Ok(WeightArchive::Nested { state_dict: sd })
    }

    fn instantiate(&self, _arch_config: &Path) -> Result<Box<dyn ModelState>, BackendError> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubModel::with_counter(self.migrations.clone())))
    }
}

/// Pipeline backend with a switchable half-precision variant, recording
/// every attempted precision tier.
pub struct StubPipelineBackend {
    pub attempts: Arc<Mutex<Vec<Precision>>>,
    pub half_available: bool,
    pub fail_all: bool,
}

impl StubPipelineBackend {
    pub fn new() -> Self {
        Self {
            attempts: Arc::new(Mutex::new(Vec::new())),
            half_available: true,
            fail_all: false,
        }
    }
}

impl PipelineBackend for StubPipelineBackend {
    fn load_pipeline(
        &self,
        source: &PipelineSource,
        precision: Precision,
        _decoder: Option<&PipelineSource>,
        _offline: bool,
    ) -> Result<PipelineHandle, BackendError> {
        self.attempts.lock().unwrap().push(precision);
        if self.fail_all {
            return Err(BackendError::SourceUnavailable(source.to_string()));
        }
        if precision == Precision::Half && !self.half_available {
            return Err(BackendError::VariantNotAvailable(Precision::Half));
        }
        Ok(PipelineHandle {
            model: Box::new(StubModel::new()),
            width: 768,
            height: 768,
        })
    }
}

pub struct CleanScanner;

impl WeightScanner for CleanScanner {
    fn scan(&self, _path: &Path) -> Result<ScanReport, IntegrityError> {
        Ok(ScanReport::clean())
    }
}

pub struct InfectedScanner;

impl WeightScanner for InfectedScanner {
    fn scan(&self, _path: &Path) -> Result<ScanReport, IntegrityError> {
        Ok(ScanReport {
            clean_count: 0,
            infected_count: 1,
            issues_count: 2,
        })
    }
}

/// Converter that just creates the destination directory, recording
/// what it converted.
pub struct DirConverter {
    pub converted: Arc<Mutex<Vec<PathBuf>>>,
    pub fail: bool,
}

impl DirConverter {
    pub fn new() -> Self {
        Self {
            converted: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }
}

impl CheckpointConverter for DirConverter {
    fn convert(&self, checkpoint: &Path, dest: &Path) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("conversion failed for {}", checkpoint.display());
        }
        std::fs::create_dir_all(dest)?;
        self.converted.lock().unwrap().push(checkpoint.to_path_buf());
        Ok(())
    }
}

/// Checkpoint entry whose weights and config files exist under `root`.
pub fn ckpt_entry(root: &Path, name: &str) -> RegistryEntry {
    let weights = root.join(format!("{name}.ckpt"));
    std::fs::write(&weights, format!("weights-{name}")).unwrap();
    let config = root.join(format!("{name}.yaml"));
    std::fs::write(&config, "model:\n  target: ldm.models.LatentDiffusion\n").unwrap();

    let mut entry = RegistryEntry::new(ModelFormat::Checkpoint);
    entry.description = Some(format!("test model {name}"));
    entry.weights = Some(weights);
    entry.config = Some(config);
    entry.width = Some(512);
    entry.height = Some(512);
    entry
}

/// Checkpoint entry whose weights file does not exist, so loads fail.
pub fn broken_ckpt_entry(root: &Path, name: &str) -> RegistryEntry {
    let mut entry = ckpt_entry(root, name);
    let missing = root.join(format!("{name}-missing.ckpt"));
    entry.weights = Some(missing);
    entry
}

pub fn diffusers_entry(repo_id: &str) -> RegistryEntry {
    let mut entry = RegistryEntry::new(ModelFormat::Diffusers);
    entry.description = Some(format!("pipeline {repo_id}"));
    entry.repo_id = Some(repo_id.to_string());
    entry
}

pub fn test_config(root: &Path, budget: usize) -> CacheConfig {
    CacheConfig {
        root_dir: root.to_path_buf(),
        device: Device::Cuda,
        precision: Precision::Half,
        max_loaded_models: budget,
        scan_policy: ScanPolicy::Deny,
        offline: true,
    }
}

/// Cache wired to counting stubs and a clean scanner.
pub fn build_cache(
    root: &Path,
    budget: usize,
    registry: ModelRegistry,
) -> (ModelCache, Arc<AtomicUsize>) {
    let checkpoint = CountingCheckpointBackend::new();
    let instantiations = checkpoint.instantiations.clone();
    let gate = ScanGate::new(Box::new(CleanScanner), ScanPolicy::Deny);
    let cache = ModelCache::new(
        test_config(root, budget),
        registry,
        Box::new(checkpoint),
        Box::new(StubPipelineBackend::new()),
        gate,
    );
    (cache, instantiations)
}
