//! Backend contracts for the loader adapters.
//!
//! The cache never touches tensors directly. Everything numerical lives
//! behind three seams: [`ModelState`] (an opaque, exclusively-owned model
//! handle), [`CheckpointBackend`] (deserialization and architecture
//! instantiation for legacy checkpoints), and [`PipelineBackend`]
//! (fetching packaged diffusion pipelines). The concrete implementations
//! are external collaborators; the adapters in this crate orchestrate
//! them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a model's tensors currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// CUDA execution device (fast, limited capacity).
    Cuda,
    /// Apple Metal execution device.
    Mps,
    /// Host RAM (the holding area, and also the execution device on
    /// machines without an accelerator).
    Cpu,
}

impl Device {
    /// Whether this device is a dedicated accelerator, as opposed to
    /// host memory doubling as the execution device.
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Device::Cpu)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cuda => write!(f, "cuda"),
            Device::Mps => write!(f, "mps"),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// Numeric precision for loaded weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    /// Reduced precision (float16): faster, smaller.
    #[serde(rename = "float16")]
    Half,
    /// Full precision (float32): slower, more accurate.
    #[serde(rename = "float32")]
    Full,
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precision::Half => write!(f, "float16"),
            Precision::Full => write!(f, "float32"),
        }
    }
}

/// A named collection of tensor blobs, as produced by deserializing a
/// weights file. Tensor payloads are opaque to the cache.
#[derive(Debug, Default, Clone)]
pub struct StateDict {
    tensors: BTreeMap<String, Vec<u8>>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.tensors.insert(name.into(), data);
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Drop every tensor whose name starts with `prefix`.
    ///
    /// Companion decoder checkpoints carry `loss.*` tensors that must not
    /// be merged into the decoder proper.
    pub fn strip_prefix(&mut self, prefix: &str) {
        self.tensors.retain(|name, _| !name.starts_with(prefix));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// The raw result of deserializing a checkpoint file.
///
/// Some checkpoints (notably merged ones) wrap their tensors in a nested
/// `state_dict` container; others are flat.
#[derive(Debug)]
pub enum WeightArchive {
    Flat(StateDict),
    Nested { state_dict: StateDict },
}

impl WeightArchive {
    /// Unwrap to the flat tensor collection regardless of container shape.
    pub fn into_state_dict(self) -> StateDict {
        match self {
            WeightArchive::Flat(sd) => sd,
            WeightArchive::Nested { state_dict } => state_dict,
        }
    }
}

/// Failures surfaced by backend collaborators.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The requested precision variant is not published for this model.
    /// The diffusers adapter retries once at full precision on this.
    #[error("{0} variant is not available for this model")]
    VariantNotAvailable(Precision),

    #[error("failed to deserialize weights: {0}")]
    MalformedWeights(String),

    #[error("architecture instantiation failed: {0}")]
    Instantiation(String),

    #[error("device transfer failed: {0}")]
    Transfer(String),

    #[error("pipeline source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque, exclusively-owned handle to an in-memory model.
///
/// The cache is the only owner; once a record is evicted the boxed state
/// is dropped and its device memory reclaimed. Migration between devices
/// goes through [`ModelState::migrate`]; there is no other transition
/// operator.
pub trait ModelState: Send {
    /// Transfer all tensors to the given device.
    fn migrate(&mut self, device: Device) -> Result<(), BackendError>;

    /// Load a state dict into the instantiated architecture.
    /// `strict = false` tolerates missing and unexpected keys.
    fn load_weights(&mut self, weights: StateDict, strict: bool) -> Result<(), BackendError>;

    /// Merge a companion decoder's weights over the model's own decoder.
    fn merge_decoder_weights(&mut self, weights: StateDict) -> Result<(), BackendError>;

    /// Convert the model's tensors to the given precision.
    fn set_precision(&mut self, precision: Precision) -> Result<(), BackendError>;

    /// Switch to inference (non-training) mode.
    fn set_inference_mode(&mut self);

    /// The device the model currently resides on.
    fn device(&self) -> Device;
}

/// Deserialization and instantiation collaborator for legacy checkpoints.
pub trait CheckpointBackend {
    /// Deserialize a raw weights blob into a tensor archive.
    fn deserialize_weights(&self, bytes: &[u8]) -> Result<WeightArchive, BackendError>;

    /// Instantiate the model architecture described by a companion
    /// config file, with uninitialized weights.
    fn instantiate(&self, arch_config: &Path) -> Result<Box<dyn ModelState>, BackendError>;
}

/// Where a packaged pipeline is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineSource {
    /// A directory on local disk.
    Local(PathBuf),
    /// A remote repository identifier (e.g. `stabilityai/stable-diffusion-2`).
    Remote(String),
}

impl std::fmt::Display for PipelineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineSource::Local(path) => write!(f, "{}", path.display()),
            PipelineSource::Remote(repo_id) => write!(f, "{repo_id}"),
        }
    }
}

/// A fully constructed packaged pipeline, ready for device placement.
pub struct PipelineHandle {
    pub model: Box<dyn ModelState>,
    /// Native image width reported by the pipeline.
    pub width: u32,
    /// Native image height reported by the pipeline.
    pub height: u32,
}

/// Fetch/load collaborator for packaged (diffusers-style) pipelines.
pub trait PipelineBackend {
    /// Load a pipeline at the requested precision, optionally overriding
    /// its decoder. Must return [`BackendError::VariantNotAvailable`]
    /// when the precision variant is not published, so the adapter can
    /// fall back; any other failure is surfaced as-is.
    fn load_pipeline(
        &self,
        source: &PipelineSource,
        precision: Precision,
        decoder: Option<&PipelineSource>,
        offline: bool,
    ) -> Result<PipelineHandle, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_archive_unwraps() {
        let mut sd = StateDict::new();
        sd.insert("unet.weight", vec![1, 2, 3]);
        let archive = WeightArchive::Nested { state_dict: sd };
        let flat = archive.into_state_dict();
        assert!(flat.contains("unet.weight"));
    }

    #[test]
    fn test_strip_prefix_drops_loss_tensors() {
        let mut sd = StateDict::new();
        sd.insert("decoder.weight", vec![0]);
        sd.insert("loss.weight", vec![0]);
        sd.insert("loss.bias", vec![0]);
        sd.strip_prefix("loss");
        assert_eq!(sd.len(), 1);
        assert!(sd.contains("decoder.weight"));
    }

    #[test]
    fn test_device_accelerator() {
        assert!(Device::Cuda.is_accelerator());
        assert!(Device::Mps.is_accelerator());
        assert!(!Device::Cpu.is_accelerator());
    }
}
