//! Static safety scanning of legacy checkpoints.
//!
//! Legacy `.ckpt` files are pickle archives and can embed arbitrary code
//! that runs on deserialization, so every checkpoint is scanned before
//! any bytes reach the deserializer. The scan itself is a collaborator
//! ([`WeightScanner`]); the [`ScanGate`] applies the verdict policy.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::integrity::IntegrityError;

/// Result of scanning a checkpoint file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanReport {
    /// Files found clean.
    pub clean_count: usize,
    /// Files flagged as infected. Exactly one means a definitive
    /// verdict; more than one marks the scan as inconclusive.
    pub infected_count: usize,
    /// Distinct issues found in flagged files.
    pub issues_count: usize,
}

impl ScanReport {
    pub fn clean() -> Self {
        Self {
            clean_count: 1,
            ..Default::default()
        }
    }
}

/// Safety-scan collaborator contract.
pub trait WeightScanner {
    fn scan(&self, path: &Path) -> Result<ScanReport, IntegrityError>;
}

/// How to proceed when a scan is inconclusive. A definitive infected
/// verdict always refuses the load regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPolicy {
    /// Refuse the load (the safe non-interactive default).
    Deny,
    /// Warn and proceed.
    Allow,
    /// Ask the operator through the confirm callback.
    Interactive,
}

/// Callback used by [`ScanPolicy::Interactive`] to ask the operator
/// whether to proceed.
pub type ConfirmFn = Box<dyn Fn(&str) -> bool>;

/// Applies scan verdicts to checkpoint loads.
pub struct ScanGate {
    scanner: Box<dyn WeightScanner>,
    policy: ScanPolicy,
    confirm: Option<ConfirmFn>,
}

impl ScanGate {
    pub fn new(scanner: Box<dyn WeightScanner>, policy: ScanPolicy) -> Self {
        Self {
            scanner,
            policy,
            confirm: None,
        }
    }

    /// Install the operator confirmation callback for interactive policy.
    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Scan `path` and decide whether the load may proceed.
    pub fn check(&self, path: &Path) -> Result<(), IntegrityError> {
        let report = self.scanner.scan(path)?;

        if report.infected_count == 0 {
            debug!(path = %path.display(), "Model scanned ok");
            return Ok(());
        }

        if report.infected_count == 1 {
            // Definitive verdict; never loaded, no policy override.
            return Err(IntegrityError::Infected {
                path: path.to_path_buf(),
                issues: report.issues_count,
            });
        }

        warn!(
            path = %path.display(),
            infected = report.infected_count,
            "Safety scan was inconclusive"
        );
        match self.policy {
            ScanPolicy::Allow => {
                warn!(path = %path.display(), "Proceeding despite inconclusive scan (policy: allow)");
                Ok(())
            }
            ScanPolicy::Deny => Err(IntegrityError::Declined {
                path: path.to_path_buf(),
            }),
            ScanPolicy::Interactive => {
                let prompt = format!(
                    "The safety scan of {} was inconclusive. Load the model anyway?",
                    path.display()
                );
                let proceed = self
                    .confirm
                    .as_ref()
                    .map(|confirm| confirm(&prompt))
                    .unwrap_or(false);
                if proceed {
                    Ok(())
                } else {
                    Err(IntegrityError::Declined {
                        path: path.to_path_buf(),
                    })
                }
            }
        }
    }
}

/// Pickle GLOBAL targets that have no business inside a weights file.
const FLAGGED_GLOBALS: &[&[u8]] = &[
    b"os\nsystem",
    b"posix\nsystem",
    b"subprocess\n",
    b"builtins\neval",
    b"builtins\nexec",
    b"runpy\n",
    b"socket\n",
];

/// Built-in scanner: looks for pickle GLOBAL references to process or
/// code-execution primitives in the raw byte stream. Deployments with a
/// dedicated pickle scanner plug it in through [`WeightScanner`].
#[derive(Debug, Default)]
pub struct BasicPickleScanner;

impl WeightScanner for BasicPickleScanner {
    fn scan(&self, path: &Path) -> Result<ScanReport, IntegrityError> {
        let bytes = std::fs::read(path)?;
        let issues = FLAGGED_GLOBALS
            .iter()
            .filter(|pattern| {
                bytes
                    .windows(pattern.len())
                    .any(|window| window == **pattern)
            })
            .count();

        if issues == 0 {
            Ok(ScanReport::clean())
        } else {
            Ok(ScanReport {
                clean_count: 0,
                infected_count: 1,
                issues_count: issues,
            })
        }
    }
}
