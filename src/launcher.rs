//! Coordinated launch of bitcoind and Armory.
//!
//! The `Launcher` checks that the bitcoind port is free, starts bitcoind and
//! then Armory, streams both outputs, and as soon as either process exits (or
//! armorykit itself is asked to shut down) stops both and waits for them.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{LaunchSettings, Profile};
use crate::error::Error;
use crate::events::{ExitNotice, ProcessSignal};
use crate::flags::{Flag, FlagList};
use crate::output::{LogSink, LoggerSink};
use crate::process::{ProcessSpec, StopHandle, SupervisedProcess};

const BITCOIND: &str = "bitcoind";
const ARMORY: &str = "armory";

/// Runs bitcoind and Armory as a pair that lives and dies together.
pub struct Launcher {
    daemon: SupervisedProcess,
    wallet: SupervisedProcess,
    preflight_addr: String,
}

impl Launcher {
    pub fn new(daemon: SupervisedProcess, wallet: SupervisedProcess, preflight_addr: String) -> Self {
        Self {
            daemon,
            wallet,
            preflight_addr,
        }
    }

    /// Builds both processes from a resolved profile.
    ///
    /// bitcoind output is logged at debug level, Armory output at info.
    pub fn from_profile(profile: &Profile, settings: &LaunchSettings) -> Self {
        let daemon_sink: Arc<dyn LogSink> = Arc::new(LoggerSink::new(log::Level::Debug));
        let wallet_sink: Arc<dyn LogSink> = Arc::new(LoggerSink::new(log::Level::Info));
        Self::new(
            SupervisedProcess::new(daemon_spec(profile, settings), daemon_sink),
            SupervisedProcess::new(wallet_spec(profile, settings), wallet_sink),
            profile.bitcoind_addr(),
        )
    }

    /// Fails with `Error::PortInUse` if the bitcoind address cannot be bound.
    pub async fn is_runnable(&self) -> Result<(), Error> {
        log::debug!("launcher: checking if {} is in use", self.preflight_addr);
        check_open_port(&self.preflight_addr).await
    }

    /// Runs until one process exits or armorykit receives SIGINT/SIGTERM.
    pub async fn run(self) -> Result<(), Error> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs until one process exits or `shutdown` resolves.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ProcessSignal>,
    {
        self.is_runnable().await?;
        self.daemon.start()?;
        if let Err(err) = self.wallet.start() {
            if let Err(stop) = self.daemon.stop() {
                log::debug!("launcher: {}", stop);
            }
            self.daemon.print_output().await;
            if let Err(exit) = self.daemon.wait_for_shutdown().await {
                log::debug!("{}", exit);
            }
            return Err(err);
        }

        let daemon_stop = self.daemon.stop_handle();
        let wallet_stop = self.wallet.stop_handle();
        let (exit_tx, mut exit_rx) = mpsc::channel(2);
        let daemon_task = tokio::spawn(process_and_wait(self.daemon, exit_tx.clone()));
        let wallet_task = tokio::spawn(process_and_wait(self.wallet, exit_tx));

        tokio::pin!(shutdown);
        tokio::select! {
            notice = exit_rx.recv() => match notice {
                Some(notice) => log::info!("launcher: {} exited, shutting down", notice.name),
                None => log::warn!("launcher: process tasks ended without an exit notice"),
            },
            signal = &mut shutdown => {
                log::info!("launcher: received {}, shutting down", signal);
            }
        }

        stop_quietly(&daemon_stop);
        stop_quietly(&wallet_stop);

        let daemon_result = join_process(daemon_task, daemon_stop.name()).await;
        let wallet_result = join_process(wallet_task, wallet_stop.name()).await;
        daemon_result.and(wallet_result)
    }
}

/// What a launch would execute, for dry runs.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchPlan {
    pub profile: String,
    pub preflight: String,
    pub bitcoind: Vec<String>,
    pub armory: Vec<String>,
}

impl LaunchPlan {
    pub fn new(profile: &Profile, settings: &LaunchSettings) -> Self {
        Self {
            profile: profile.name.clone(),
            preflight: profile.bitcoind_addr(),
            bitcoind: daemon_spec(profile, settings).argv(),
            armory: wallet_spec(profile, settings).argv(),
        }
    }

    /// One line per item, with commands shell-quoted.
    pub fn render(&self) -> String {
        format!(
            "profile: {}\npreflight: {}\nbitcoind: {}\narmory: {}",
            self.profile,
            self.preflight,
            shell_words::join(&self.bitcoind),
            shell_words::join(&self.armory),
        )
    }
}

/// Builds the bitcoind invocation for a profile.
pub fn daemon_spec(profile: &Profile, settings: &LaunchSettings) -> ProcessSpec {
    let bitcoind = &profile.bitcoind;
    let mut entries = vec![
        ("daemon", "0".to_string()),
        ("port", bitcoind.port.to_string()),
    ];
    if let Some(conf) = &bitcoind.config {
        entries.push(("conf", conf.clone()));
    }
    if let Some(datadir) = &bitcoind.datadir {
        entries.push(("datadir", datadir.clone()));
    }
    if let Some(rpcport) = bitcoind.rpcport {
        entries.push(("rpcport", rpcport.to_string()));
    }

    let mut flags = FlagList::from_map(settings.flag_dash, entries);
    for raw in bitcoind.flags.iter().chain(&profile.settings.bitcoind_flags) {
        flags.push(Flag::new(raw.as_str(), ""));
    }

    ProcessSpec::new(BITCOIND, settings.bitcoind_binary.as_str(), flags.to_args())
        .with_shell(settings.shell)
        .with_stop_signal(settings.bitcoind_stop_signal)
}

/// Builds the Armory invocation for a profile.
pub fn wallet_spec(profile: &Profile, settings: &LaunchSettings) -> ProcessSpec {
    let mut entries = Vec::new();
    if let Some(datadir) = &profile.settings.armory_datadir {
        entries.push(("datadir", datadir.clone()));
    }
    if let Some(datadir) = &profile.bitcoind.datadir {
        entries.push(("satoshi-datadir", datadir.clone()));
    }

    let mut flags = FlagList::from_map(settings.flag_dash, entries);
    for raw in &profile.settings.armory_flags {
        flags.push(Flag::new(raw.as_str(), ""));
    }

    ProcessSpec::new(ARMORY, settings.armory_binary.as_str(), flags.to_args())
        .with_shell(settings.shell)
        .with_stop_signal(settings.armory_stop_signal)
}

/// Tests that nothing is listening on `addr` by binding and releasing it.
pub async fn check_open_port(addr: &str) -> Result<(), Error> {
    match TcpListener::bind(addr).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(source) => Err(Error::PortInUse {
            addr: addr.to_string(),
            source,
        }),
    }
}

/// Resolves on the first SIGINT or SIGTERM delivered to armorykit.
pub async fn shutdown_signal() -> ProcessSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                log::warn!("launcher: cannot listen for SIGTERM: {}", err);
                return ctrl_c().await;
            }
        };
        tokio::select! {
            signal = ctrl_c() => signal,
            Some(()) = sigterm.recv() => ProcessSignal::SigTerm,
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> ProcessSignal {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::warn!("launcher: cannot listen for SIGINT: {}", err);
        std::future::pending::<()>().await;
    }
    ProcessSignal::SigInt
}

// Drains, reaps and reports one process. Exits that follow a stop signal are
// expected and not treated as failures.
async fn process_and_wait(
    mut process: SupervisedProcess,
    exit_tx: mpsc::Sender<ExitNotice>,
) -> Result<(), Error> {
    process.print_output().await;
    let result = process.wait_for_shutdown().await;
    let stopped = process.stop_handle().stop_requested();

    let outcome = match result {
        Ok(()) => {
            log::info!("{}: exited", process.name());
            Ok(())
        }
        Err(Error::ProcessExit { status, .. }) if stopped => {
            log::info!("{}: stopped ({})", process.name(), status);
            Ok(())
        }
        Err(err) => {
            log::warn!("{}", err);
            Err(err)
        }
    };

    let _ = exit_tx
        .send(ExitNotice {
            name: process.name().to_string(),
        })
        .await;
    outcome
}

async fn join_process(task: JoinHandle<Result<(), Error>>, name: &str) -> Result<(), Error> {
    match task.await {
        Ok(result) => result,
        Err(source) => Err(Error::Task {
            name: name.to_string(),
            source,
        }),
    }
}

fn stop_quietly(handle: &StopHandle) {
    match handle.stop() {
        Ok(()) => {}
        Err(err @ Error::NotRunning(_)) => log::debug!("launcher: {}", err),
        Err(err) => log::warn!("launcher: {}", err),
    }
}
