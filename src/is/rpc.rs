use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;

/// A directive on the control socket: one line of whitespace-delimited
/// tokens, no framing beyond newline/EOF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Reconcile `group` to `runlevel`.
    Tell { group: String, runlevel: String },
    /// Stop every supervised tag and exit the daemon.
    StopAll,
}

impl Directive {
    pub fn encode(&self) -> String {
        match self {
            Directive::Tell { group, runlevel } => format!("{group} {runlevel}\n"),
            Directive::StopAll => "stopall\n".to_string(),
        }
    }

    /// Parse one line read from the socket. `None` for anything malformed;
    /// the server logs those and keeps accepting.
    pub fn parse(line: &str) -> Option<Directive> {
        let toks: Vec<&str> = line.split_whitespace().collect();
        match toks.as_slice() {
            ["stopall"] => Some(Directive::StopAll),
            [group, runlevel] => Some(Directive::Tell {
                group: group.to_string(),
                runlevel: runlevel.to_string(),
            }),
            _ => None,
        }
    }
}

/// Client side: connect, write the directive line, close. A connect
/// failure means no daemon is listening on `sock`.
pub fn client_send(sock: &Path, d: &Directive) -> anyhow::Result<()> {
    let mut stream = UnixStream::connect(sock).map_err(|e| {
        anyhow::anyhow!(
            "failed to connect to is daemon socket {}: {e}",
            sock.display()
        )
    })?;
    stream.write_all(d.encode().as_bytes())?;
    stream.flush()?;
    Ok(())
}

/// Probe for a listening daemon without sending anything.
pub fn daemon_running(sock: &Path) -> bool {
    UnixStream::connect(sock).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tell_and_stopall() {
        assert_eq!(
            Directive::parse("web run\n"),
            Some(Directive::Tell {
                group: "web".to_string(),
                runlevel: "run".to_string()
            })
        );
        assert_eq!(Directive::parse("  stopall  "), Some(Directive::StopAll));
    }

    #[test]
    fn rejects_wrong_arity_and_empty_lines() {
        assert_eq!(Directive::parse(""), None);
        assert_eq!(Directive::parse("\n"), None);
        assert_eq!(Directive::parse("web"), None);
        assert_eq!(Directive::parse("web run extra"), None);
    }

    #[test]
    fn encode_round_trips() {
        let d = Directive::Tell {
            group: "mail".to_string(),
            runlevel: "runmore".to_string(),
        };
        assert_eq!(Directive::parse(&d.encode()), Some(d));
        assert_eq!(
            Directive::parse(&Directive::StopAll.encode()),
            Some(Directive::StopAll)
        );
    }
}
