use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::events::ProcessSignal;
use crate::output::StreamKind;
use crate::process::ProcessStatus;

/// Failures of the supervision engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{name}: failed to attach {stream} pipe")]
    PipeSetup { name: String, stream: StreamKind },

    #[error("{name}: failed to launch `{command}`: {source}")]
    Launch {
        name: String,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not running")]
    NotRunning(String),

    #[error("{addr} is already in use, is the daemon already running? ({source})")]
    PortInUse {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("{name} exited with {status}")]
    ProcessExit { name: String, status: ExitStatus },

    #[error("{name}: cannot {action} while {state}")]
    InvalidState {
        name: String,
        action: &'static str,
        state: ProcessStatus,
    },

    #[error("{name}: failed to send {signal}: {source}")]
    Signal {
        name: String,
        signal: ProcessSignal,
        #[source]
        source: io::Error,
    },

    #[error("{name}: failed to wait for exit: {source}")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{name}: supervision task failed: {source}")]
    Task {
        name: String,
        #[source]
        source: tokio::task::JoinError,
    },
}
