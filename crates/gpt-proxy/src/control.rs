//! Signal dispatch to a running instance (`gpt-proxy -s stop|reload`).

use crate::error::ControlError;
use crate::pidfile::read_pid_file;
use std::fmt;
use std::path::Path;

/// What a controlling invocation asks the serving instance to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Directive {
    /// Drain connections and exit (SIGTERM).
    Stop,
    /// Drain connections and restart the listener with fresh config (SIGUSR1).
    Reload,
}

impl Directive {
    pub fn signal_name(self) -> &'static str {
        match self {
            Directive::Stop => "SIGTERM",
            Directive::Reload => "SIGUSR1",
        }
    }

    #[cfg(unix)]
    fn signal(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            Directive::Stop => Signal::SIGTERM,
            Directive::Reload => Signal::SIGUSR1,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Stop => f.write_str("stop"),
            Directive::Reload => f.write_str("reload"),
        }
    }
}

/// Look up the serving instance in `pid_file` and deliver `directive` to it.
///
/// Returns the PID that was signalled.
pub fn send(directive: Directive, pid_file: &Path) -> Result<i32, ControlError> {
    let pid = read_pid_file(pid_file)?;
    deliver(pid, directive)?;
    Ok(pid)
}

#[cfg(unix)]
fn deliver(pid: i32, directive: Directive) -> Result<(), ControlError> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), directive.signal()) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(ControlError::ProcessNotFound(pid)),
        Err(e) => Err(ControlError::SendFailed {
            signal: directive.signal_name(),
            pid,
            reason: e.desc().to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn deliver(_pid: i32, _directive: Directive) -> Result<(), ControlError> {
    Err(ControlError::Unsupported)
}
