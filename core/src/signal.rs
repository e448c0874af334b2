//! Named POSIX signals used by `stopsignal` and operator signal handling.
//!
//! Generalizes `habitat_core::os::process::Signal`, which enumerated a fixed set of
//! signals for the same purpose (child shutdown, operator control) without pulling in a
//! signal-name crate.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use nix::sys::signal::Signal as NixSignal;

use crate::error::{ConfigError, Error};

#[allow(non_snake_case)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    HUP,
    INT,
    QUIT,
    ILL,
    ABRT,
    FPE,
    KILL,
    USR1,
    SEGV,
    USR2,
    ALRM,
    TERM,
    CHLD,
}

impl Signal {
    /// The default `stopsignal` per spec.md §3.
    pub const fn default_stop() -> Signal {
        Signal::TERM
    }

    pub fn as_nix(self) -> NixSignal {
        match self {
            Signal::HUP => NixSignal::SIGHUP,
            Signal::INT => NixSignal::SIGINT,
            Signal::QUIT => NixSignal::SIGQUIT,
            Signal::ILL => NixSignal::SIGILL,
            Signal::ABRT => NixSignal::SIGABRT,
            Signal::FPE => NixSignal::SIGFPE,
            Signal::KILL => NixSignal::SIGKILL,
            Signal::USR1 => NixSignal::SIGUSR1,
            Signal::SEGV => NixSignal::SIGSEGV,
            Signal::USR2 => NixSignal::SIGUSR2,
            Signal::ALRM => NixSignal::SIGALRM,
            Signal::TERM => NixSignal::SIGTERM,
            Signal::CHLD => NixSignal::SIGCHLD,
        }
    }

    /// Parse a signal name, accepting both `TERM` and `SIGTERM` spellings.
    pub fn parse(name: &str) -> Option<Signal> {
        let stripped = name.strip_prefix("SIG").unwrap_or(name);
        match stripped.to_ascii_uppercase().as_str() {
            "HUP" => Some(Signal::HUP),
            "INT" => Some(Signal::INT),
            "QUIT" => Some(Signal::QUIT),
            "ILL" => Some(Signal::ILL),
            "ABRT" => Some(Signal::ABRT),
            "FPE" => Some(Signal::FPE),
            "KILL" => Some(Signal::KILL),
            "USR1" => Some(Signal::USR1),
            "SEGV" => Some(Signal::SEGV),
            "USR2" => Some(Signal::USR2),
            "ALRM" => Some(Signal::ALRM),
            "TERM" => Some(Signal::TERM),
            "CHLD" => Some(Signal::CHLD),
            _ => None,
        }
    }

    pub fn parse_for(name: &str, program: &str) -> Result<Signal, ConfigError> {
        Signal::parse(name).ok_or_else(|| ConfigError::UnknownSignal {
            name: program.to_string(),
            signal: name.to_string(),
        })
    }
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signal::parse(s).ok_or_else(|| format!("unrecognized signal name '{s}'"))
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Signal::HUP => "HUP",
            Signal::INT => "INT",
            Signal::QUIT => "QUIT",
            Signal::ILL => "ILL",
            Signal::ABRT => "ABRT",
            Signal::FPE => "FPE",
            Signal::KILL => "KILL",
            Signal::USR1 => "USR1",
            Signal::SEGV => "SEGV",
            Signal::USR2 => "USR2",
            Signal::ALRM => "ALRM",
            Signal::TERM => "TERM",
            Signal::CHLD => "CHLD",
        };
        write!(f, "{s}")
    }
}

/// Send `signal` to `pid`. Mirrors `habitat_core::os::process::signal`, rewritten on top
/// of `nix` instead of raw `libc::kill`.
pub fn send_signal(pid: libc::pid_t, signal: Signal) -> Result<(), Error> {
    use nix::unistd::Pid;
    nix::sys::signal::kill(Pid::from_raw(pid), signal.as_nix())
        .map_err(|errno| Error::SignalDelivery(signal, pid, errno))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_sig_prefixed_names() {
        assert_eq!(Signal::parse("TERM"), Some(Signal::TERM));
        assert_eq!(Signal::parse("SIGTERM"), Some(Signal::TERM));
        assert_eq!(Signal::parse("sigterm"), Some(Signal::TERM));
    }

    #[test]
    fn rejects_unknown_names() {
        assert_eq!(Signal::parse("BOGUS"), None);
    }

    #[test]
    fn displays_as_bare_name() {
        assert_eq!(Signal::TERM.to_string(), "TERM");
    }
}
