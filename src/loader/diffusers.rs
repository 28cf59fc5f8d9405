//! Packaged-pipeline (diffusers) adapter.
//!
//! Resolves a local directory or remote repository id, preferring the
//! reduced-precision variant and falling back to full precision exactly
//! once when the variant is not published. Packaged pipelines do not
//! participate in content verification; they carry an identity digest
//! instead.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::CacheConfig;
use crate::integrity::hasher::identity_digest;
use crate::registry::RegistryEntry;

use super::backend::{BackendError, PipelineBackend, PipelineSource, Precision};
use super::{LoadError, LoadedModel};

pub struct DiffusersLoader {
    config: Arc<CacheConfig>,
    backend: Box<dyn PipelineBackend>,
}

impl DiffusersLoader {
    pub fn new(config: Arc<CacheConfig>, backend: Box<dyn PipelineBackend>) -> Self {
        Self { config, backend }
    }

    fn source_of(&self, name: &str, entry: &RegistryEntry) -> Result<PipelineSource, LoadError> {
        if let Some(path) = &entry.path {
            Ok(PipelineSource::Local(self.config.resolve(path)))
        } else if let Some(repo_id) = &entry.repo_id {
            Ok(PipelineSource::Remote(repo_id.clone()))
        } else {
            Err(LoadError::MissingSource(name.to_string()))
        }
    }

    pub fn load(&mut self, name: &str, entry: &RegistryEntry) -> Result<LoadedModel, LoadError> {
        let source = self.source_of(name, entry)?;
        let decoder = entry
            .vae
            .as_ref()
            .map(|path| PipelineSource::Local(self.config.resolve(path)));

        info!(model = name, source = %source, "Loading diffusers pipeline");

        // At most two attempts: the configured precision, then one
        // fallback to full precision if the variant is not published.
        let tiers: &[Precision] = match self.config.precision {
            Precision::Half => &[Precision::Half, Precision::Full],
            Precision::Full => &[Precision::Full],
        };

        let mut last_missing = None;
        for &precision in tiers {
            match self.backend.load_pipeline(
                &source,
                precision,
                decoder.as_ref(),
                self.config.offline,
            ) {
                Ok(mut handle) => {
                    handle.model.migrate(self.config.device)?;
                    info!(
                        model = name,
                        width = handle.width,
                        height = handle.height,
                        precision = %precision,
                        "Pipeline loaded"
                    );
                    return Ok(LoadedModel {
                        model: handle.model,
                        width: handle.width,
                        height: handle.height,
                        hash: identity_digest(&source.to_string()),
                    });
                }
                Err(BackendError::VariantNotAvailable(missing)) => {
                    if missing == Precision::Half {
                        warn!(
                            model = name,
                            "Half-precision variant not available; fetching full precision instead"
                        );
                    }
                    last_missing = Some(missing);
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Both tiers reported the variant missing.
        Err(BackendError::VariantNotAvailable(last_missing.unwrap_or(Precision::Full)).into())
    }
}
