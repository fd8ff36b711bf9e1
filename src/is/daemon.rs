use std::fs;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::time as tokio_time;

use crate::is::config::MasterConfig;
use crate::is::rpc::Directive;
use crate::is::supervisor::Supervisor;

/// Timestamped event line on stderr; the payload is `key=value` tokens by
/// convention.
pub(crate) fn is_event(component: &str, tag: Option<&str>, msg: impl AsRef<str>) {
    let ts = Local::now().format("%Y-%m-%d_%H:%M:%S%.3f");
    match tag {
        Some(t) => eprintln!("{ts} [{component}] tag={t} {}", msg.as_ref()),
        None => eprintln!("{ts} [{component}] {}", msg.as_ref()),
    }
}

pub fn run_daemon(cfg: MasterConfig) -> anyhow::Result<()> {
    // Directives are handled one at a time and `wait` tags block the loop
    // on purpose, so a single-threaded runtime is all the daemon needs.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    rt.block_on(run_daemon_async(cfg))
}

async fn run_daemon_async(cfg: MasterConfig) -> anyhow::Result<()> {
    let sock = cfg.sock.clone();
    prepare_socket(&sock)?;
    let mut listener = UnixListener::bind(&sock)
        .map_err(|e| anyhow::anyhow!("failed to bind socket {}: {e}", sock.display()))?;

    // Child deaths are funneled through the same loop that accepts
    // directives, so reaping never interleaves with a reconciliation.
    let mut sigchld = unix_signal(SignalKind::child()).context("SIGCHLD handler")?;
    let mut sigterm = unix_signal(SignalKind::terminate()).context("SIGTERM handler")?;
    let mut sigint = unix_signal(SignalKind::interrupt()).context("SIGINT handler")?;

    let mut sup = Supervisor::new(cfg);

    is_event("boot", None, crate::is::build_info::banner());
    is_event(
        "ctl",
        None,
        format!("listening sock={}", sock.display()),
    );

    loop {
        tokio::select! {
            r = listener.accept() => match r {
                Ok((stream, _addr)) => {
                    if handle_connection(&mut sup, stream).await == Flow::Shutdown {
                        break;
                    }
                }
                Err(e) => {
                    is_event("ctl", None, format!("outcome=accept_error err={e}"));
                    tokio_time::sleep(Duration::from_millis(200)).await;
                    // Rebuild the listener in place: unlink + rebind.
                    match rebuild_listener(&sock) {
                        Ok(l) => {
                            listener = l;
                            is_event("ctl", None, "outcome=socket_rebuilt");
                        }
                        Err(e) => {
                            is_event("ctl", None, format!("outcome=socket_rebuild_failed err={e:#}"));
                        }
                    }
                }
            },
            _ = sigchld.recv() => sup.reap_cycle(),
            _ = sigterm.recv() => {
                is_event("shutdown", None, "signal=TERM");
                break;
            }
            _ = sigint.recv() => {
                is_event("shutdown", None, "signal=INT");
                break;
            }
        }
    }

    sup.stop_all();
    let _ = fs::remove_file(&sock);
    is_event("shutdown", None, "outcome=exit code=0");
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Shutdown,
}

/// One directive per connection: read a line, act, close. Malformed input
/// is logged and ignored; the daemon keeps accepting.
async fn handle_connection(sup: &mut Supervisor, stream: UnixStream) -> Flow {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => return Flow::Continue,
        Ok(_) => {}
        Err(e) => {
            is_event("ctl", None, format!("outcome=read_error err={e}"));
            return Flow::Continue;
        }
    }
    let Some(d) = Directive::parse(&line) else {
        is_event("ctl", None, format!("outcome=ignored input={:?}", line.trim()));
        return Flow::Continue;
    };
    match d {
        Directive::StopAll => {
            is_event("ctl", None, "directive=stopall");
            Flow::Shutdown
        }
        Directive::Tell { group, runlevel } => {
            is_event(
                "ctl",
                None,
                format!("directive=tell group={group} runlevel={runlevel}"),
            );
            if let Err(e) = sup.tell(Some(&group), Some(&runlevel)) {
                // Config problems leave the table untouched; keep serving.
                is_event("reconcile", None, format!("outcome={} err={e}", e.as_label()));
            }
            sup.reap_cycle();
            Flow::Continue
        }
    }
}

/// Make the socket path usable: create the parent directory, refuse to run
/// next to a live daemon, unlink a stale socket file.
fn prepare_socket(sock: &Path) -> anyhow::Result<()> {
    if let Some(parent) = sock.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!(
                "failed to create socket directory {}: {e}",
                parent.display()
            )
        })?;
    }

    if sock.exists() {
        match StdUnixStream::connect(sock) {
            Ok(_) => anyhow::bail!(
                "is daemon already running (socket {} is accepting connections)",
                sock.display()
            ),
            Err(_) => {
                fs::remove_file(sock).map_err(|e| {
                    anyhow::anyhow!("failed to remove stale socket {}: {e}", sock.display())
                })?;
            }
        }
    }
    Ok(())
}

fn rebuild_listener(sock: &Path) -> anyhow::Result<UnixListener> {
    let _ = fs::remove_file(sock);
    UnixListener::bind(sock)
        .map_err(|e| anyhow::anyhow!("failed to rebind socket {}: {e}", sock.display()))
}
