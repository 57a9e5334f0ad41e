//! Signals and notifications exchanged between the launcher and its processes.
//!
//! `ProcessSignal` names the stop signal delivered to a supervised process and
//! doubles as the description of a shutdown request received by armorykit
//! itself. `ExitNotice` is posted by a process task once its child has exited.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// A POSIX signal used to stop a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ProcessSignal {
    SigInt,
    SigTerm,
    SigHup,
    SigQuit,
    SigKill,
}

impl ProcessSignal {
    pub fn name(self) -> &'static str {
        match self {
            ProcessSignal::SigInt => "SIGINT",
            ProcessSignal::SigTerm => "SIGTERM",
            ProcessSignal::SigHup => "SIGHUP",
            ProcessSignal::SigQuit => "SIGQUIT",
            ProcessSignal::SigKill => "SIGKILL",
        }
    }
}

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProcessSignal {
    type Err = String;

    /// Accepts `SIGINT`, `sigint` or `INT` style names.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "INT" => Ok(ProcessSignal::SigInt),
            "TERM" => Ok(ProcessSignal::SigTerm),
            "HUP" => Ok(ProcessSignal::SigHup),
            "QUIT" => Ok(ProcessSignal::SigQuit),
            "KILL" => Ok(ProcessSignal::SigKill),
            _ => Err(format!("unsupported stop signal: {}", value)),
        }
    }
}

impl TryFrom<String> for ProcessSignal {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Posted once by each process task after its child has been reaped.
#[derive(Debug, Clone)]
pub struct ExitNotice {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signal_names() {
        assert_eq!("SIGINT".parse::<ProcessSignal>(), Ok(ProcessSignal::SigInt));
        assert_eq!("term".parse::<ProcessSignal>(), Ok(ProcessSignal::SigTerm));
        assert_eq!(" sigkill ".parse::<ProcessSignal>(), Ok(ProcessSignal::SigKill));
        assert!("SIGUSR9".parse::<ProcessSignal>().is_err());
    }

    #[test]
    fn displays_canonical_name() {
        assert_eq!(ProcessSignal::SigHup.to_string(), "SIGHUP");
        assert_eq!(ProcessSignal::SigQuit.name(), "SIGQUIT");
    }
}
