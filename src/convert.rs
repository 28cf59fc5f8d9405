//! Checkpoint-to-pipeline conversion sweep.
//!
//! The conversion itself (rewriting a `.ckpt` into a packaged pipeline
//! directory) is an external collaborator; this module finds the work.

use std::path::{Path, PathBuf};

/// Conversion collaborator: rewrite a legacy checkpoint into a packaged
/// pipeline directory at `dest`.
pub trait CheckpointConverter {
    fn convert(&self, checkpoint: &Path, dest: &Path) -> anyhow::Result<()>;
}

/// Recursively find `.ckpt` files under `weights_dir` whose converted
/// destination (a directory named after the checkpoint's stem under
/// `dest_dir`) does not exist yet. Returns `(checkpoint, dest)` pairs,
/// sorted for deterministic processing order.
pub fn find_unconverted(
    weights_dir: &Path,
    dest_dir: &Path,
) -> std::io::Result<Vec<(PathBuf, PathBuf)>> {
    let mut pending = Vec::new();
    if !weights_dir.exists() {
        return Ok(pending);
    }

    let mut stack = vec![weights_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("ckpt") {
                continue;
            }
            let Some(stem) = path.file_stem() else {
                continue;
            };
            let dest = dest_dir.join(stem);
            if !dest.exists() {
                pending.push((path, dest));
            }
        }
    }

    pending.sort();
    Ok(pending)
}
