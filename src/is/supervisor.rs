use std::collections::HashSet;
use std::io;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::is::config::{self, MasterConfig, Mode, TagRecord};
use crate::is::daemon::is_event;
use crate::is::error::SupervisorError;
use crate::is::table::{ProcessTable, Supervised};

/// Sleeps between liveness checks while waiting for a SIGTERM'd child to
/// exit; after the last one (31s cumulative) the stop escalates to SIGKILL.
const TERM_BACKOFF_SECS: [u64; 5] = [1, 2, 4, 8, 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildState {
    Alive,
    Exited,
    Gone,
}

/// The supervisor state machine: the process table, the last directive, and
/// the launch/terminate/reap/reconcile operations the daemon loop drives.
/// All methods run on the daemon's single thread; blocking in `wait` tags
/// and in the terminator back-off is part of the contract.
pub struct Supervisor {
    cfg: MasterConfig,
    table: ProcessTable,
    target: Option<(String, String)>,
}

impl Supervisor {
    pub fn new(cfg: MasterConfig) -> Self {
        Self {
            cfg,
            table: ProcessTable::new(),
            target: None,
        }
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn target(&self) -> Option<(&str, &str)> {
        self.target.as_ref().map(|(g, r)| (g.as_str(), r.as_str()))
    }

    /// Apply a directive. `None` on either side means "unchanged"; with no
    /// directive ever issued there is nothing to reconcile and nothing
    /// starts. The config is loaded before the target is committed, so a
    /// config error leaves both the table and the target untouched.
    pub fn tell(
        &mut self,
        group: Option<&str>,
        runlevel: Option<&str>,
    ) -> Result<(), SupervisorError> {
        let cur = self.target.clone();
        let g = group
            .map(str::to_string)
            .or_else(|| cur.as_ref().map(|(g, _)| g.clone()));
        let r = runlevel
            .map(str::to_string)
            .or_else(|| cur.as_ref().map(|(_, r)| r.clone()));
        let (g, r) = match (g, r) {
            (Some(g), Some(r)) => (g, r),
            _ => return Ok(()),
        };

        let records = config::load_inittab(&self.cfg.inittab)?;
        self.target = Some((g.clone(), r.clone()));
        self.walk(&records, &g, &r);
        Ok(())
    }

    /// Re-apply the last directive (the reaper path).
    pub fn reconcile_current(&mut self) -> Result<(), SupervisorError> {
        self.tell(None, None)
    }

    /// One reconciliation pass, in file order.
    fn walk(&mut self, records: &[TagRecord], group: &str, runlevel: &str) {
        let mut active: HashSet<String> = HashSet::new();

        for rec in records {
            self.table.set_mode(&rec.tag, rec.mode);
            if rec.mode == Mode::Off {
                continue;
            }
            active.insert(rec.tag.clone());
            if rec.group != group {
                continue;
            }
            if rec.runs_at(runlevel) {
                if self.table.contains(&rec.tag) {
                    continue;
                }
                match rec.mode {
                    Mode::Wait => self.run_sync(rec),
                    Mode::Respawn => {
                        if self.table.throttle_admit(&rec.tag, Instant::now()) {
                            self.launch(rec);
                        } else {
                            is_event(
                                "respawn",
                                Some(&rec.tag),
                                format!(
                                    "outcome=throttled defer_secs={}",
                                    crate::is::table::RESPAWN_COOLDOWN.as_secs()
                                ),
                            );
                        }
                    }
                    _ => self.launch(rec),
                }
            } else if self.table.contains(&rec.tag) {
                self.terminate(&rec.tag);
            }
        }

        // Tags still in the table but absent from the active set were
        // removed from the file or switched to `off`; purge them from any
        // group. Their throttle state goes with them.
        let mut departed: Vec<String> = self
            .table
            .tags()
            .into_iter()
            .filter(|t| !active.contains(t))
            .collect();
        departed.sort();
        for tag in departed {
            self.terminate(&tag);
            self.table.forget(&tag);
        }
    }

    /// Fork/exec one tag's command via the shell and track it.
    fn launch(&mut self, rec: &TagRecord) {
        match spawn_shell(&rec.cmd) {
            Ok(pid) => {
                self.table.insert_running(&rec.tag, pid);
                is_event(
                    "launch",
                    Some(&rec.tag),
                    format!("outcome=started pid={pid} mode={}", rec.mode),
                );
            }
            Err(e) => {
                let err = SupervisorError::LaunchFailed {
                    tag: rec.tag.clone(),
                    source: e,
                };
                is_event(
                    "launch",
                    Some(&rec.tag),
                    format!("outcome={} err={err}", err.as_label()),
                );
            }
        }
    }

    /// `wait` tags run synchronously. The placeholder goes in before the
    /// command starts, so records later in the file observe the tag as
    /// satisfied; it stays in place afterwards to suppress re-runs within
    /// the same runlevel.
    fn run_sync(&mut self, rec: &TagRecord) {
        self.table.insert_wait_done(&rec.tag);
        is_event("wait", Some(&rec.tag), "outcome=running");
        match Command::new("/bin/sh")
            .arg("-c")
            .arg(&rec.cmd)
            .stdin(Stdio::null())
            .status()
        {
            Ok(st) => {
                let code = st
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                is_event("wait", Some(&rec.tag), format!("outcome=done exit_code={code}"));
            }
            Err(e) => {
                is_event("wait", Some(&rec.tag), format!("outcome=launch_failed err={e}"));
            }
        }
    }

    /// Graceful-then-forceful stop of one tag. Blocks up to 31s of back-off
    /// before escalating to SIGKILL.
    pub fn terminate(&mut self, tag: &str) {
        let pid = match self.table.get(tag) {
            None => return,
            Some(Supervised::WaitDone) => {
                // Nothing to signal.
                self.table.remove(tag);
                return;
            }
            Some(Supervised::Running(pid)) => pid,
        };

        is_event("stop", Some(tag), format!("attempt=signal sig=TERM pid={pid}"));
        let _ = kill(pid, Signal::SIGTERM);

        let mut alive = true;
        for secs in TERM_BACKOFF_SECS {
            std::thread::sleep(Duration::from_secs(secs));
            if reap_one(pid) != ChildState::Alive || !self.table.contains(tag) {
                alive = false;
                break;
            }
        }
        if alive {
            is_event(
                "stop",
                Some(tag),
                format!("attempt=signal sig=KILL pid={pid} outcome=escalated"),
            );
            let _ = kill(pid, Signal::SIGKILL);
        }

        self.table.remove(tag);
        is_event("stop", Some(tag), "outcome=stopped");
    }

    /// Harvest every currently exited child without blocking. Returns true
    /// if a `respawn` tag was removed, i.e. the current target should be
    /// re-applied.
    pub fn reap(&mut self) -> bool {
        let mut respawn_needed = false;
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(WaitStatus::Exited(pid, code)) => {
                    respawn_needed |= self.note_exit(pid, &format!("exit_code={code}"));
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    respawn_needed |= self.note_exit(pid, &format!("signal={sig}"));
                }
                Ok(_) => continue,
                // ECHILD: nothing left to reap.
                Err(_) => break,
            }
        }
        respawn_needed
    }

    /// Record a reaped pid. The reap result is trusted: the pid is gone, so
    /// the entry goes regardless of mode. Pids with no owning tag belong to
    /// already-stopped or `wait` children and are ignored.
    fn note_exit(&mut self, pid: Pid, how: &str) -> bool {
        let Some(tag) = self.table.tag_for_pid(pid).map(str::to_string) else {
            return false;
        };
        self.table.remove(&tag);
        let mode = self.table.mode(&tag);
        is_event(
            "reap",
            Some(&tag),
            format!(
                "pid={pid} {how} mode={}",
                mode.map(|m| m.as_str()).unwrap_or("-")
            ),
        );
        matches!(mode, Some(Mode::Respawn))
    }

    /// Drain exits, then re-apply the target so `respawn` tags come back up.
    /// Repeats while relaunched children keep dying; the throttle bounds
    /// the cycle.
    pub fn reap_cycle(&mut self) {
        loop {
            if !self.reap() {
                return;
            }
            if let Err(e) = self.reconcile_current() {
                is_event("reconcile", None, format!("outcome={} err={e}", e.as_label()));
                return;
            }
        }
    }

    /// Stop everything we supervise: the `stopall` directive and daemon
    /// shutdown.
    pub fn stop_all(&mut self) {
        let mut tags = self.table.tags();
        tags.sort();
        for tag in tags {
            self.terminate(&tag);
        }
        self.reap();
    }
}

fn spawn_shell(cmd: &str) -> io::Result<Pid> {
    // exec resets caught signal dispositions, so the child starts with
    // defaults regardless of what the daemon has installed.
    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .spawn()?;
    Ok(Pid::from_raw(child.id() as i32))
}

/// Non-blocking liveness probe that doubles as a reap: a child that exited
/// during the terminator back-off is harvested here.
fn reap_one(pid: Pid) -> ChildState {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => ChildState::Alive,
        Ok(_) => ChildState::Exited,
        Err(_) => ChildState::Gone,
    }
}
