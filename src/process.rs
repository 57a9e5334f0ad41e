//! Supervision of a single external program.
//!
//! A `SupervisedProcess` owns one child's lifecycle: it is started once, drains
//! stdout/stderr into a `LogSink`, and is reaped by `wait_for_shutdown`. Stop
//! requests go through a cloneable `StopHandle`, so another task can signal the
//! child while the owner is blocked draining or waiting.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::error::Error;
use crate::events::ProcessSignal;
use crate::output::{stream_tag, LogSink, StreamKind};

/// Shell used when a process is launched from a composed command line.
pub const SHELL: &str = "/bin/sh";

/// Specification for a process to be run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Friendly name used in log tags.
    pub name: String,
    /// The executable.
    pub program: String,
    /// Rendered arguments.
    pub args: Vec<String>,
    /// Run `program args...` through `/bin/sh -c` instead of executing it directly.
    pub shell: bool,
    /// Signal delivered by `stop`.
    pub stop_signal: ProcessSignal,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            shell: false,
            stop_signal: ProcessSignal::SigTerm,
        }
    }

    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_stop_signal(mut self, signal: ProcessSignal) -> Self {
        self.stop_signal = signal;
        self
    }

    /// The program and its arguments joined with spaces, as handed to the shell.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The argument vector actually executed.
    pub fn argv(&self) -> Vec<String> {
        if self.shell {
            vec![SHELL.to_string(), "-c".to_string(), self.command_line()]
        } else {
            let mut argv = Vec::with_capacity(1 + self.args.len());
            argv.push(self.program.clone());
            argv.extend(self.args.iter().cloned());
            argv
        }
    }

    /// Shell-quoted rendering of `argv`, for logs and dry runs.
    pub fn display(&self) -> String {
        shell_words::join(self.argv())
    }

    fn command(&self) -> Command {
        let argv = self.argv();
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        command
    }
}

/// Lifecycle of a supervised process. Instances are single-use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Prepared but not spawned.
    Unstarted,
    /// Spawned, output not yet being drained.
    Running,
    /// Output is being drained or has been drained.
    Draining,
    /// Reaped.
    Exited,
    /// Failed to start.
    Failed,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessStatus::Unstarted => "unstarted",
            ProcessStatus::Running => "running",
            ProcessStatus::Draining => "draining",
            ProcessStatus::Exited => "exited",
            ProcessStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Sends the configured stop signal to a running child.
///
/// The pid slot is filled on start and emptied by the first `stop` or when the
/// child is reaped, whichever comes first.
#[derive(Debug, Clone)]
pub struct StopHandle {
    name: Arc<str>,
    signal: ProcessSignal,
    pid: Arc<Mutex<Option<u32>>>,
    delivered: Arc<AtomicBool>,
}

impl StopHandle {
    fn new(name: &str, signal: ProcessSignal) -> Self {
        Self {
            name: Arc::from(name),
            signal,
            pid: Arc::new(Mutex::new(None)),
            delivered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends the stop signal without waiting for the child to exit.
    ///
    /// Returns `Error::NotRunning` if the child was never started, was
    /// already reaped or has already been sent its stop signal.
    pub fn stop(&self) -> Result<(), Error> {
        let Some(pid) = self.slot().take() else {
            return Err(Error::NotRunning(self.name.to_string()));
        };
        self.delivered.store(true, Ordering::SeqCst);
        log::debug!("{}: sending {} to pid {}", self.name, self.signal, pid);
        send_os_signal(pid, self.signal).map_err(|source| Error::Signal {
            name: self.name.to_string(),
            signal: self.signal,
            source,
        })
    }

    /// Whether a stop signal was ever delivered.
    pub fn stop_requested(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }

    fn arm(&self, pid: u32) {
        *self.slot() = Some(pid);
    }

    fn disarm(&self) {
        self.slot().take();
    }

    fn slot(&self) -> MutexGuard<'_, Option<u32>> {
        self.pid.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One external program under supervision.
pub struct SupervisedProcess {
    spec: ProcessSpec,
    sink: Arc<dyn LogSink>,
    command: Command,
    status: ProcessStatus,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stop: StopHandle,
}

impl SupervisedProcess {
    /// Prepares the process; nothing is spawned until `start`.
    pub fn new(spec: ProcessSpec, sink: Arc<dyn LogSink>) -> Self {
        let command = spec.command();
        let stop = StopHandle::new(&spec.name, spec.stop_signal);
        Self {
            spec,
            sink,
            command,
            status: ProcessStatus::Unstarted,
            child: None,
            stdout: None,
            stderr: None,
            stop,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Spawns the child and takes ownership of its output pipes.
    ///
    /// Returns the pid of the new process.
    pub fn start(&mut self) -> Result<u32, Error> {
        if self.status != ProcessStatus::Unstarted {
            return Err(self.invalid_state("start"));
        }

        log::debug!("{}: starting {}", self.spec.name, self.spec.display());
        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.status = ProcessStatus::Failed;
                return Err(Error::Launch {
                    name: self.spec.name.clone(),
                    command: self.spec.display(),
                    source,
                });
            }
        };

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                let _ = child.start_kill();
                self.status = ProcessStatus::Failed;
                let stream = if stdout.is_none() {
                    StreamKind::Stdout
                } else {
                    StreamKind::Stderr
                };
                return Err(Error::PipeSetup {
                    name: self.spec.name.clone(),
                    stream,
                });
            }
        };

        let pid = child.id().unwrap_or(0);
        self.stop.arm(pid);
        self.child = Some(child);
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        self.status = ProcessStatus::Running;
        log::info!("{}: started (pid {})", self.spec.name, pid);
        Ok(pid)
    }

    /// Sends the stop signal. See `StopHandle::stop`.
    pub fn stop(&self) -> Result<(), Error> {
        self.stop.stop()
    }

    /// Drains stdout and stderr into the sink until both reach end of stream.
    pub async fn print_output(&mut self) {
        if self.status != ProcessStatus::Running {
            log::debug!("{}: no output to drain while {}", self.spec.name, self.status);
            return;
        }
        self.status = ProcessStatus::Draining;

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = self.stdout.take() {
            let tag = stream_tag(&self.spec.name, StreamKind::Stdout);
            readers.push(tokio::spawn(drain_stream(tag, stdout, self.sink.clone())));
        }
        if let Some(stderr) = self.stderr.take() {
            let tag = stream_tag(&self.spec.name, StreamKind::Stderr);
            readers.push(tokio::spawn(drain_stream(tag, stderr, self.sink.clone())));
        }
        for reader in readers {
            if let Err(err) = reader.await {
                log::warn!("{}: output reader failed: {}", self.spec.name, err);
            }
        }
    }

    /// Waits until the child has exited and been reaped.
    ///
    /// Must follow `print_output`. A non-zero or signal-induced exit is
    /// returned as `Error::ProcessExit`.
    pub async fn wait_for_shutdown(&mut self) -> Result<(), Error> {
        if self.status != ProcessStatus::Draining {
            return Err(self.invalid_state("wait for shutdown"));
        }
        let Some(mut child) = self.child.take() else {
            return Err(Error::NotRunning(self.spec.name.clone()));
        };

        let result = child.wait().await;
        self.stop.disarm();
        self.status = ProcessStatus::Exited;

        let status = result.map_err(|source| Error::Wait {
            name: self.spec.name.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::ProcessExit {
                name: self.spec.name.clone(),
                status,
            })
        }
    }

    fn invalid_state(&self, action: &'static str) -> Error {
        Error::InvalidState {
            name: self.spec.name.clone(),
            action,
            state: self.status,
        }
    }
}

async fn drain_stream<R>(tag: String, reader: R, sink: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(mut bytes)) => {
                if bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }
                sink.write(&tag, &String::from_utf8_lossy(&bytes));
            }
            Ok(None) => break,
            Err(err) => {
                log::debug!("{}: read failed: {}", tag, err);
                break;
            }
        }
    }
}

#[cfg(unix)]
fn send_os_signal(pid: u32, signal: ProcessSignal) -> io::Result<()> {
    let sig = match signal {
        ProcessSignal::SigInt => libc::SIGINT,
        ProcessSignal::SigTerm => libc::SIGTERM,
        ProcessSignal::SigHup => libc::SIGHUP,
        ProcessSignal::SigQuit => libc::SIGQUIT,
        ProcessSignal::SigKill => libc::SIGKILL,
    };
    let pid = pid as libc::pid_t;
    // The child leads its own process group; the group may not exist yet if
    // the child has not reached exec.
    unsafe {
        let _ = libc::kill(-pid, sig);
        if libc::kill(pid, sig) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_os_signal(_pid: u32, signal: ProcessSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is not supported on this platform", signal),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;

    fn script(name: &str, body: &str) -> ProcessSpec {
        ProcessSpec::new(name, "sh", vec!["-c".to_string(), body.to_string()])
    }

    #[test]
    fn argv_is_direct_unless_shell() {
        let spec = ProcessSpec::new("armory", "armory", vec!["--datadir=/tmp/w".into()]);
        assert_eq!(spec.argv(), vec!["armory", "--datadir=/tmp/w"]);

        let spec = spec.with_shell(true);
        assert_eq!(spec.argv(), vec![SHELL, "-c", "armory --datadir=/tmp/w"]);
        assert_eq!(spec.display(), "/bin/sh -c 'armory --datadir=/tmp/w'");
    }

    #[tokio::test]
    async fn drains_both_streams_with_tags() {
        let sink = Arc::new(MemorySink::default());
        let mut process = SupervisedProcess::new(
            script("fake", "printf 'a\\nb\\nc\\n'; echo oops >&2"),
            sink.clone(),
        );
        assert_eq!(process.status, ProcessStatus::Unstarted);

        process.start().unwrap();
        assert_eq!(process.status, ProcessStatus::Running);
        process.print_output().await;
        assert_eq!(process.status, ProcessStatus::Draining);
        process.wait_for_shutdown().await.unwrap();
        assert_eq!(process.status, ProcessStatus::Exited);

        assert_eq!(sink.lines_for("fake[stdout]"), vec!["a", "b", "c"]);
        assert_eq!(sink.lines_for("fake[stderr]"), vec!["oops"]);
    }

    #[tokio::test]
    async fn shell_mode_runs_composed_command_line() {
        let sink = Arc::new(MemorySink::default());
        let spec = ProcessSpec::new("echo", "echo", vec!["hello".into(), "--x=1".into()])
            .with_shell(true);
        let mut process = SupervisedProcess::new(spec, sink.clone());
        process.start().unwrap();
        process.print_output().await;
        process.wait_for_shutdown().await.unwrap();
        assert_eq!(sink.lines_for("echo[stdout]"), vec!["hello --x=1"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let sink = Arc::new(MemorySink::default());
        let mut process = SupervisedProcess::new(script("fake", "exit 3"), sink);
        process.start().unwrap();
        process.print_output().await;
        match process.wait_for_shutdown().await {
            Err(Error::ProcessExit { name, status }) => {
                assert_eq!(name, "fake");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_twice_reports_not_running() {
        let sink = Arc::new(MemorySink::default());
        let mut process = SupervisedProcess::new(script("sleeper", "sleep 5"), sink);
        process.start().unwrap();

        process.stop().unwrap();
        assert!(matches!(process.stop(), Err(Error::NotRunning(_))));
        assert!(process.stop_handle().stop_requested());

        process.print_output().await;
        let result = process.wait_for_shutdown().await;
        assert!(matches!(result, Err(Error::ProcessExit { .. })));
        assert!(matches!(process.stop(), Err(Error::NotRunning(_))));
    }

    #[tokio::test]
    async fn stop_after_exit_reports_not_running() {
        let sink = Arc::new(MemorySink::default());
        let mut process = SupervisedProcess::new(script("quick", "true"), sink);
        assert!(matches!(process.stop(), Err(Error::NotRunning(_))));

        process.start().unwrap();
        process.print_output().await;
        process.wait_for_shutdown().await.unwrap();

        assert!(matches!(process.stop(), Err(Error::NotRunning(_))));
        assert!(!process.stop_handle().stop_requested());
    }

    #[tokio::test]
    async fn interrupt_reaches_trapping_child() {
        let sink = Arc::new(MemorySink::default());
        let spec = script(
            "wallet",
            "trap 'echo saving; exit 0' INT; echo ready; while :; do sleep 0.05; done",
        )
        .with_stop_signal(ProcessSignal::SigInt);
        let mut process = SupervisedProcess::new(spec, sink.clone());
        process.start().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        process.stop().unwrap();

        process.print_output().await;
        process.wait_for_shutdown().await.unwrap();
        assert_eq!(sink.lines_for("wallet[stdout]"), vec!["ready", "saving"]);
    }

    #[tokio::test]
    async fn failed_start_is_terminal() {
        let sink = Arc::new(MemorySink::default());
        let spec = ProcessSpec::new("ghost", "/nonexistent/armorykit-missing-binary", vec![]);
        let mut process = SupervisedProcess::new(spec, sink);

        assert!(matches!(process.start(), Err(Error::Launch { .. })));
        assert_eq!(process.status, ProcessStatus::Failed);
        assert!(matches!(
            process.start(),
            Err(Error::InvalidState { action: "start", .. })
        ));
        assert!(matches!(process.stop(), Err(Error::NotRunning(_))));
        assert!(matches!(
            process.wait_for_shutdown().await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn wait_requires_drained_output() {
        let sink = Arc::new(MemorySink::default());
        let mut process = SupervisedProcess::new(script("fake", "true"), sink);
        process.start().unwrap();
        assert!(matches!(
            process.wait_for_shutdown().await,
            Err(Error::InvalidState { state: ProcessStatus::Running, .. })
        ));
        process.print_output().await;
        process.wait_for_shutdown().await.unwrap();
    }
}
