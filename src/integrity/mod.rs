//! Integrity verification for weight blobs.
//!
//! - [`hasher`]: sidecar-cached sha256 digests, keyed on file mtime
//! - [`scanner`]: static safety scan of legacy checkpoints before
//!   deserialization, with a policy gate for inconclusive results

pub mod hasher;
pub mod scanner;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    /// The scan flagged the file as malicious. Fatal: the load is
    /// refused and the CLI exits rather than deserialize the file.
    #[error("weights file {path} appears to be infected ({issues} issue(s) found); refusing to load")]
    Infected { path: PathBuf, issues: usize },

    /// The scan was inconclusive and the configured policy (or the
    /// operator) declined the load.
    #[error("safety scan of {path} was inconclusive and the load was declined")]
    Declined { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
