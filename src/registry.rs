//! The model registry: the catalog of known models and their load
//! parameters.
//!
//! The registry is an owned, explicitly mutable collection inside the
//! cache façade; external readers get clones, never live references.
//! Persistence is a YAML document mapping model name to attributes,
//! written atomically (temp file, then rename) with a fixed explanatory
//! preamble.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Weight format of a registered model, fixed at registration time.
/// Loader dispatch happens once on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFormat {
    /// Legacy single-file checkpoint (`.ckpt`).
    #[serde(rename = "ckpt")]
    Checkpoint,
    /// Packaged multi-component pipeline (diffusers layout).
    #[serde(rename = "diffusers")]
    Diffusers,
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelFormat::Checkpoint => write!(f, "ckpt"),
            ModelFormat::Diffusers => write!(f, "diffusers"),
        }
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// One registered model. Which optional fields are required depends on
/// the format; see [`RegistryEntry::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub format: ModelFormat,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Weights blob location (ckpt).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<PathBuf>,

    /// Companion architecture config (ckpt).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,

    /// Companion decoder (VAE) override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vae: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// At most one entry in the registry may have this set.
    #[serde(default, skip_serializing_if = "is_false")]
    pub default: bool,

    /// Local directory of a packaged pipeline (diffusers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Remote repository identifier (diffusers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
}

impl RegistryEntry {
    /// Blank entry of the given format; callers fill in the fields the
    /// format requires.
    pub fn new(format: ModelFormat) -> Self {
        Self {
            format,
            description: None,
            weights: None,
            config: None,
            vae: None,
            width: None,
            height: None,
            default: false,
            path: None,
            repo_id: None,
        }
    }

    /// Check the per-format required fields.
    ///
    /// Diffusers entries need a description and either a local path or a
    /// remote repository id. Checkpoint entries need description,
    /// weights, companion config, width, and height.
    pub fn validate(&self, name: &str) -> Result<(), RegistryError> {
        let missing = |field: &'static str| RegistryError::MissingField {
            name: name.to_string(),
            field,
            format: self.format,
        };

        match self.format {
            ModelFormat::Diffusers => {
                if self.description.is_none() {
                    return Err(missing("description"));
                }
                if self.path.is_none() && self.repo_id.is_none() {
                    return Err(RegistryError::MissingSource(name.to_string()));
                }
            }
            ModelFormat::Checkpoint => {
                if self.description.is_none() {
                    return Err(missing("description"));
                }
                if self.weights.is_none() {
                    return Err(missing("weights"));
                }
                if self.config.is_none() {
                    return Err(missing("config"));
                }
                if self.width.is_none() {
                    return Err(missing("width"));
                }
                if self.height.is_none() {
                    return Err(missing("height"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("attempt to overwrite existing model definition '{0}'; pass clobber to allow")]
    AlreadyExists(String),

    #[error("model '{name}': required field '{field}' is missing for {format} entries")]
    MissingField {
        name: String,
        field: &'static str,
        format: ModelFormat,
    },

    #[error("diffusers model '{0}' must define either 'path' or 'repo_id'")]
    MissingSource(String),

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("failed to parse registry document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed preamble written before the serialized registry on every commit.
const PREAMBLE: &str = "\
# This file describes the machine learning models known to the
# image generation pipeline.
#
# To add a new model, follow the examples below. Each checkpoint
# model requires a companion architecture config, a weights file,
# and the width and height of the images it was trained on.
# Packaged (diffusers) models require a local path or a remote
# repository id instead.
";

/// In-memory catalog of registered models.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a registry document (the preamble, if present, is plain
    /// YAML comment and parses away).
    pub fn from_str(doc: &str) -> Result<Self, RegistryError> {
        let entries: BTreeMap<String, RegistryEntry> = serde_yaml::from_str(doc)?;
        Ok(Self { entries })
    }

    /// Load a registry file, returning an empty registry when the file
    /// does not exist yet.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            tracing::warn!("Registry file not found at {:?}, starting empty", path);
            return Ok(Self::new());
        }
        let doc = std::fs::read_to_string(path)?;
        Self::from_str(&doc)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a model. Fails if the attributes are incomplete for the
    /// entry's format, or if the name exists and `clobber` is false.
    pub fn insert(
        &mut self,
        name: &str,
        entry: RegistryEntry,
        clobber: bool,
    ) -> Result<(), RegistryError> {
        entry.validate(name)?;
        if !clobber && self.entries.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        debug!(model = name, format = %entry.format, clobber, "Registry entry updated");
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<RegistryEntry> {
        self.entries.remove(name)
    }

    /// Name of the default model, if one is marked.
    pub fn default_model(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.default)
            .map(|(name, _)| name.as_str())
    }

    /// Mark `name` as the default, clearing the flag everywhere else.
    pub fn set_default_model(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.entries.contains_key(name) {
            return Err(RegistryError::UnknownModel(name.to_string()));
        }
        for (entry_name, entry) in self.entries.iter_mut() {
            entry.default = entry_name == name;
        }
        Ok(())
    }

    /// Whether the named model is a legacy checkpoint.
    pub fn is_legacy(&self, name: &str) -> bool {
        self.get(name)
            .map(|entry| entry.format == ModelFormat::Checkpoint)
            .unwrap_or(false)
    }

    /// Serialize to the on-disk document format, preamble included.
    pub fn to_document(&self) -> Result<String, RegistryError> {
        let body = serde_yaml::to_string(&self.entries)?;
        Ok(format!("{PREAMBLE}{body}"))
    }

    /// Write the registry to `path` atomically: serialize to a sibling
    /// temp file, then rename over the destination.
    pub fn commit(&self, path: &Path) -> Result<(), RegistryError> {
        let doc = self.to_document()?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, doc)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), models = self.entries.len(), "Registry committed");
        Ok(())
    }
}
