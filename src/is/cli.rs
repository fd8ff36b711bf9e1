use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use nix::unistd::{fork, setsid, ForkResult};

use crate::is::config::{MasterConfig, DEFAULT_INITTAB, DEFAULT_SOCK};
use crate::is::daemon;
use crate::is::rpc::{self, Directive};

#[derive(Debug, Parser)]
#[command(name = "is", version, about = "cluster-aware process supervisor")]
pub struct Args {
    /// Path to the shared process table
    #[arg(short = 'c', long = "config", default_value = DEFAULT_INITTAB)]
    pub config: PathBuf,

    /// Control socket path
    #[arg(short = 's', long = "sock", default_value = DEFAULT_SOCK)]
    pub sock: PathBuf,

    /// `<group> <runlevel>` to reconcile, or the single word `stopall`
    #[arg(num_args = 0..=2, value_name = "DIRECTIVE")]
    pub directive: Vec<String>,
}

/// One daemon per host: whoever finds a listener on the socket is a client;
/// the first invocation on a quiet host becomes the daemon itself and its
/// foreground branch delivers the directive once the socket is up.
pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let directive = parse_directive(&args.directive)?;
    let cfg = MasterConfig {
        inittab: args.config,
        sock: args.sock,
    };

    if rpc::daemon_running(&cfg.sock) {
        return match directive {
            Some(d) => rpc::client_send(&cfg.sock, &d),
            None => Ok(()),
        };
    }

    match unsafe { fork() }.map_err(|e| anyhow::anyhow!("fork failed: {e}"))? {
        ForkResult::Child => {
            // Background branch: own session, then serve until `stopall`.
            let _ = setsid();
            daemon::run_daemon(cfg)
        }
        ForkResult::Parent { .. } => {
            // Give the daemon a moment to bind before delivering the
            // directive; the command itself returns promptly.
            thread::sleep(Duration::from_secs(1));
            match directive {
                Some(d) => rpc::client_send(&cfg.sock, &d),
                None => Ok(()),
            }
        }
    }
}

fn parse_directive(toks: &[String]) -> anyhow::Result<Option<Directive>> {
    match toks {
        [] => Ok(None),
        [one] if one.as_str() == "stopall" => Ok(Some(Directive::StopAll)),
        [one] => anyhow::bail!("single argument must be `stopall`, got {one:?}"),
        [group, runlevel] => Ok(Some(Directive::Tell {
            group: group.clone(),
            runlevel: runlevel.clone(),
        })),
        _ => anyhow::bail!("expected `<group> <runlevel>` or `stopall`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn directive_forms() {
        assert_eq!(parse_directive(&toks(&[])).unwrap(), None);
        assert_eq!(
            parse_directive(&toks(&["stopall"])).unwrap(),
            Some(Directive::StopAll)
        );
        assert_eq!(
            parse_directive(&toks(&["web", "run"])).unwrap(),
            Some(Directive::Tell {
                group: "web".to_string(),
                runlevel: "run".to_string()
            })
        );
        assert!(parse_directive(&toks(&["web"])).is_err());
    }
}
