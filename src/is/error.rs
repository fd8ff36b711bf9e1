use std::io;

use thiserror::Error;

/// Errors raised while reconciling the process table against the config
/// table. A config error aborts the reconciliation before any table
/// mutation; a launch failure is per-tag and the walk continues.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The config table could not be opened or read.
    #[error("config {path} unavailable: {source}")]
    ConfigUnavailable {
        path: String,
        #[source]
        source: io::Error,
    },
    /// A config line did not satisfy the five-field grammar.
    #[error("config {path} line {line}: {reason}")]
    ConfigMalformed {
        path: String,
        line: usize,
        reason: String,
    },
    /// Fork/exec of a tag's command failed.
    #[error("launch of tag {tag} failed: {source}")]
    LaunchFailed {
        tag: String,
        #[source]
        source: io::Error,
    },
}

impl SupervisorError {
    /// Short stable label (snake_case) for event lines.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::ConfigUnavailable { .. } => "config_unavailable",
            SupervisorError::ConfigMalformed { .. } => "config_malformed",
            SupervisorError::LaunchFailed { .. } => "launch_failed",
        }
    }
}
