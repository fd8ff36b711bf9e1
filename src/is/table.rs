use std::collections::HashMap;
use std::time::{Duration, Instant};

use nix::unistd::Pid;

use crate::is::config::Mode;

/// At most `RESPAWN_MAX` starts per `RESPAWN_WINDOW`; exceeding that puts
/// the tag into `RESPAWN_COOLDOWN` before starts are admitted again.
pub const RESPAWN_WINDOW: Duration = Duration::from_secs(10);
pub const RESPAWN_MAX: u32 = 5;
pub const RESPAWN_COOLDOWN: Duration = Duration::from_secs(60);

/// What the table holds for a supervised tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervised {
    /// A forked child currently being tracked.
    Running(Pid),
    /// Placeholder for a `wait` command that already ran at this runlevel;
    /// suppresses re-runs until the tag leaves the active set.
    WaitDone,
}

/// Per-tag start accounting on a monotonic clock.
#[derive(Debug, Clone)]
pub struct RespawnThrottle {
    window_start: Instant,
    count: u32,
}

impl RespawnThrottle {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    /// Account one start attempt at `now`. Returns false while the tag is
    /// throttled. A `window_start` in the future is the cool-down marker.
    pub fn admit(&mut self, now: Instant) -> bool {
        if now < self.window_start {
            return false;
        }
        if now.duration_since(self.window_start) > RESPAWN_WINDOW {
            self.window_start = now;
            self.count = 0;
        }
        if self.count >= RESPAWN_MAX {
            self.window_start = now + RESPAWN_COOLDOWN;
            self.count = 0;
            return false;
        }
        self.count += 1;
        true
    }
}

/// Bidirectional tag/pid mapping plus the cached mode map the reaper reads
/// and the per-tag throttle state. Both sides of the mapping are updated in
/// the same call so they never disagree.
#[derive(Debug, Default)]
pub struct ProcessTable {
    by_tag: HashMap<String, Supervised>,
    by_pid: HashMap<i32, String>,
    modes: HashMap<String, Mode>,
    throttles: HashMap<String, RespawnThrottle>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly forked child. Replacing an existing entry drops its
    /// old pid mapping as well.
    pub fn insert_running(&mut self, tag: &str, pid: Pid) {
        if let Some(Supervised::Running(old)) = self
            .by_tag
            .insert(tag.to_string(), Supervised::Running(pid))
        {
            self.by_pid.remove(&old.as_raw());
        }
        self.by_pid.insert(pid.as_raw(), tag.to_string());
    }

    /// Mark a `wait` tag satisfied. A `wait` tag is never represented by a
    /// live pid, only by this placeholder.
    pub fn insert_wait_done(&mut self, tag: &str) {
        if let Some(Supervised::Running(old)) =
            self.by_tag.insert(tag.to_string(), Supervised::WaitDone)
        {
            self.by_pid.remove(&old.as_raw());
        }
    }

    pub fn get(&self, tag: &str) -> Option<Supervised> {
        self.by_tag.get(tag).copied()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    pub fn tag_for_pid(&self, pid: Pid) -> Option<&str> {
        self.by_pid.get(&pid.as_raw()).map(|s| s.as_str())
    }

    /// Drop a tag from both sides. Returns what was stored, if anything.
    pub fn remove(&mut self, tag: &str) -> Option<Supervised> {
        let prev = self.by_tag.remove(tag);
        if let Some(Supervised::Running(pid)) = prev {
            self.by_pid.remove(&pid.as_raw());
        }
        prev
    }

    /// Drop by pid (the reaper side). Returns the owning tag.
    pub fn remove_pid(&mut self, pid: Pid) -> Option<String> {
        let tag = self.by_pid.remove(&pid.as_raw())?;
        self.by_tag.remove(&tag);
        Some(tag)
    }

    pub fn tags(&self) -> Vec<String> {
        self.by_tag.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    /// Cache a tag's mode so the reaper can act without re-reading the file.
    pub fn set_mode(&mut self, tag: &str, mode: Mode) {
        self.modes.insert(tag.to_string(), mode);
    }

    pub fn mode(&self, tag: &str) -> Option<Mode> {
        self.modes.get(tag).copied()
    }

    /// Account a respawn start attempt for `tag`.
    pub fn throttle_admit(&mut self, tag: &str, now: Instant) -> bool {
        self.throttles
            .entry(tag.to_string())
            .or_insert_with(|| RespawnThrottle::new(now))
            .admit(now)
    }

    /// Drop every trace of a tag. Used when it leaves the active set;
    /// throttle counters survive reconciliations until then.
    pub fn forget(&mut self, tag: &str) {
        self.remove(tag);
        self.modes.remove(tag);
        self.throttles.remove(tag);
    }
}
