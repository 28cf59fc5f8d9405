//! Sidecar-cached content hashing for weight blobs.
//!
//! Hashing a multi-gigabyte checkpoint is expensive, so the digest is
//! persisted next to the weights file and reused as long as the weights
//! have not been modified since. Cache-aside keyed on `(path, mtime)`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Extension of the sidecar digest file, sharing the weights file's stem.
pub const SIDECAR_EXT: &str = "sha256";

/// Counters for observing which hash path ran.
#[derive(Debug, Default, Clone, Copy)]
pub struct HasherStats {
    /// Full digests computed over file content.
    pub computed: u64,
    /// Digests served from a fresh sidecar file.
    pub sidecar_hits: u64,
}

/// Computes and caches content hashes for weight blobs.
#[derive(Debug, Default)]
pub struct IntegrityHasher {
    stats: HasherStats,
}

impl IntegrityHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> HasherStats {
        self.stats
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        path.with_extension(SIDECAR_EXT)
    }

    /// Return the hex sha256 digest of `bytes`, reusing the sidecar
    /// digest when it is at least as new as the weights file.
    pub fn digest(&mut self, path: &Path, bytes: &[u8]) -> std::io::Result<String> {
        let sidecar = Self::sidecar_path(path);

        if let Some(cached) = self.fresh_sidecar(path, &sidecar)? {
            debug!(path = %path.display(), "Using cached sha256 from sidecar");
            self.stats.sidecar_hits += 1;
            return Ok(cached);
        }

        info!(path = %path.display(), "Calculating sha256 hash of weights file");
        let started = Instant::now();
        let digest = format!("{:x}", Sha256::digest(bytes));
        self.stats.computed += 1;
        info!(
            sha256 = digest,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Hash computed"
        );

        let mut out = std::fs::File::create(&sidecar)?;
        out.write_all(digest.as_bytes())?;
        Ok(digest)
    }

    /// The sidecar digest, if present and not older than the weights.
    fn fresh_sidecar(&self, path: &Path, sidecar: &Path) -> std::io::Result<Option<String>> {
        if !sidecar.exists() {
            return Ok(None);
        }
        let weights_mtime = std::fs::metadata(path)?.modified()?;
        let sidecar_mtime = std::fs::metadata(sidecar)?.modified()?;
        if sidecar_mtime < weights_mtime {
            return Ok(None);
        }
        let digest = std::fs::read_to_string(sidecar)?;
        Ok(Some(digest.trim().to_string()))
    }
}

/// A deterministic identity digest for models that do not participate in
/// content verification (packaged pipelines). Explicitly labeled so it
/// can never be mistaken for a content hash.
pub fn identity_digest(source: &str) -> String {
    format!("identity:{:x}", Sha256::digest(source.as_bytes()))
}
