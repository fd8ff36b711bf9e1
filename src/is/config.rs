use std::path::{Path, PathBuf};

use crate::is::error::SupervisorError;

pub const DEFAULT_INITTAB: &str = "/etc/isinittab";
pub const DEFAULT_SOCK: &str = "/var/run/is/init.s";

/// Daemon-level settings. Everything that describes the supervised set
/// lives in the table file itself, which is re-read on every
/// reconciliation so a replicated edit takes effect on the next directive.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub inittab: PathBuf,
    pub sock: PathBuf,
}

/// How a tag behaves once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Never run; an active tag switched to `off` is stopped.
    Off,
    /// Run synchronously to completion, once per transition into a
    /// matching runlevel. Blocks the rest of the reconciliation.
    Wait,
    /// Restart on exit, subject to the respawn throttle.
    Respawn,
    /// Fork, exec, and do not restart.
    Once,
}

impl Mode {
    fn parse(s: &str) -> Mode {
        match s {
            "off" => Mode::Off,
            "wait" => Mode::Wait,
            "respawn" => Mode::Respawn,
            // Any other token runs once and is not restarted.
            _ => Mode::Once,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::Wait => "wait",
            Mode::Respawn => "respawn",
            Mode::Once => "once",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the table: `<group>:<tag>:<levels>:<mode>:<cmd>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub group: String,
    pub tag: String,
    pub levels: Vec<String>,
    pub mode: Mode,
    pub cmd: String,
}

impl TagRecord {
    /// Strict set-membership: the requested runlevel must equal one of the
    /// comma-separated tokens in the `levels` field.
    pub fn runs_at(&self, runlevel: &str) -> bool {
        self.levels.iter().any(|l| l == runlevel)
    }
}

/// Read and parse the whole table, in file order. File order is
/// significant: it is the start/stop order during reconciliation.
pub fn load_inittab(path: &Path) -> Result<Vec<TagRecord>, SupervisorError> {
    let raw =
        std::fs::read_to_string(path).map_err(|e| SupervisorError::ConfigUnavailable {
            path: path.display().to_string(),
            source: e,
        })?;
    parse_inittab(&raw, path)
}

fn parse_inittab(raw: &str, path: &Path) -> Result<Vec<TagRecord>, SupervisorError> {
    let malformed = |line: usize, reason: String| SupervisorError::ConfigMalformed {
        path: path.display().to_string(),
        line,
        reason,
    };

    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let lineno = idx + 1;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        // cmd may itself contain colons; the split takes at most five fields.
        let fields: Vec<&str> = t.splitn(5, ':').collect();
        if fields.len() < 5 {
            return Err(malformed(
                lineno,
                format!("expected 5 colon-separated fields, got {}", fields.len()),
            ));
        }
        let group = fields[0].trim();
        let tag = fields[1].trim();
        if group.is_empty() {
            return Err(malformed(lineno, "empty group field".to_string()));
        }
        if tag.is_empty() {
            return Err(malformed(lineno, "empty tag field".to_string()));
        }
        let levels: Vec<String> = fields[2]
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        out.push(TagRecord {
            group: group.to_string(),
            tag: tag.to_string(),
            levels,
            mode: Mode::parse(fields[3].trim()),
            cmd: fields[4].to_string(),
        });
    }
    Ok(out)
}
