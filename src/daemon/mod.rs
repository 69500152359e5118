//! Session daemon: the resident process that owns Chrome, the CDP
//! connection, the collectors, and the IPC server.

mod registry;
mod report;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::cdp::{CdpClient, CdpConfig, ReconnectEvent, extract_port_from_ws_url};
use crate::chrome::{
    ChromeProcess, LaunchConfig, find_available_port, find_chrome_executable, launch_chrome,
    query_version,
};
use crate::error::{AppError, ExitCode};
use crate::ipc::IpcServer;
use crate::resolver;
use crate::schema::ProtocolSchema;
use crate::session::{
    LockState, SessionMeta, SessionPaths, acquire, read_pid_file, remove_session_files,
    write_meta, write_pid_file,
};
use crate::telemetry::{
    ConsoleCaptureOptions, NetworkCaptureOptions, TargetSummary, TelemetryKind, TelemetryStore,
    capture_snapshot, lock_store, spawn_console_collector, spawn_network_collector,
};

pub use registry::{CommandRegistry, IPC_PROTOCOL_VERSION};
pub use report::{FinalReport, build_report, write_report};

/// Why the daemon is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM.
    Signal,
    /// A `stop_session` request arrived over IPC.
    StopRequested { kill_chrome: bool },
    /// Chrome destroyed the session tab.
    TargetDestroyed,
    /// The CDP connection is gone and reconnection was exhausted.
    ConnectionLost,
    /// The configured session timeout elapsed.
    TimeoutElapsed,
}

/// Everything the daemon needs to bootstrap a session.
pub struct DaemonOptions {
    /// Normalized URL the session tab should show.
    pub url: String,
    /// Prefer reusing an existing matching tab over opening a new one.
    pub reuse_tab: bool,
    /// Launch Chrome headless.
    pub headless: bool,
    /// Fixed debugging port; otherwise a free port is picked.
    pub port: Option<u16>,
    /// Attach to an already running Chrome instead of launching one.
    pub chrome_ws_url: Option<String>,
    /// Kill Chrome during shutdown (otherwise it keeps running with its
    /// profile intact).
    pub kill_chrome: bool,
    /// Stop the session automatically after this long.
    pub session_timeout: Option<Duration>,
    /// Telemetry kinds to collect.
    pub collect: Vec<TelemetryKind>,
    pub network: NetworkCaptureOptions,
    pub console: ConsoleCaptureOptions,
    /// Extra Chrome command-line arguments.
    pub chrome_args: Vec<String>,
    /// Budget for Chrome to open its debugging port.
    pub launch_timeout: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            reuse_tab: false,
            headless: false,
            port: None,
            chrome_ws_url: None,
            kill_chrome: false,
            session_timeout: None,
            collect: vec![
                TelemetryKind::Network,
                TelemetryKind::Console,
                TelemetryKind::Dom,
            ],
            network: NetworkCaptureOptions::default(),
            console: ConsoleCaptureOptions::default(),
            chrome_args: Vec::new(),
            launch_timeout: Duration::from_secs(30),
        }
    }
}

/// Initialize daemon logging from `BDG_LOG` (default `info`).
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("BDG_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Run a session daemon to completion.
///
/// Acquires the daemon and session locks, bootstraps Chrome and the CDP
/// connection, serves IPC until a shutdown trigger fires, then tears
/// down in the documented order.
///
/// # Errors
///
/// Returns `AppError` with `DaemonAlreadyRunning` when another daemon
/// holds the lock, `ResourceBusy` when the session lock is held, or the
/// underlying failure from bootstrap/shutdown.
pub async fn run(paths: &SessionPaths, opts: DaemonOptions) -> Result<(), AppError> {
    paths.ensure_root()?;

    let daemon_lock = match acquire(&paths.daemon_lock())? {
        LockState::Acquired(lock) => lock,
        LockState::Held { pid } => return Err(AppError::daemon_already_running(pid)),
    };
    let session_lock = match acquire(&paths.session_lock())? {
        LockState::Acquired(lock) => lock,
        LockState::Held { pid } => {
            let _ = daemon_lock.release();
            return Err(AppError::new(
                format!("a session is already running (pid {pid})"),
                ExitCode::ResourceBusy,
            ));
        }
    };

    let outcome = serve_session(paths, opts).await;

    if outcome.is_err() {
        // Bootstrap or teardown failed partway; leave nothing dangling.
        remove_session_files(paths);
    }
    // The lock files were removed with the session files; the guards
    // have nothing left to release.
    drop(session_lock);
    drop(daemon_lock);

    outcome
}

#[allow(clippy::too_many_lines)]
async fn serve_session(paths: &SessionPaths, opts: DaemonOptions) -> Result<(), AppError> {
    // --- Chrome -----------------------------------------------------------
    let mut chrome_proc: Option<ChromeProcess> = None;
    let (browser_ws, port, chrome_pid) = if let Some(ws_url) = &opts.chrome_ws_url {
        let port = extract_port_from_ws_url(ws_url).ok_or_else(|| {
            AppError::invalid_arguments(format!("cannot parse port from {ws_url}"))
        })?;
        (ws_url.clone(), port, None)
    } else {
        let executable = find_chrome_executable()?;
        let port = match opts.port {
            Some(port) => port,
            None => find_available_port()?,
        };
        let process = launch_chrome(
            LaunchConfig {
                executable,
                port,
                headless: opts.headless,
                extra_args: opts.chrome_args.clone(),
                user_data_dir: paths.chrome_profile(),
            },
            opts.launch_timeout,
        )
        .await?;
        let pid = process.pid();
        write_pid_file(&paths.chrome_pid(), pid)?;
        tracing::info!(pid, port, "Chrome launched");

        let version = query_version("127.0.0.1", port).await?;
        // Keep the handle: if bootstrap fails before the session is
        // serving, dropping it kills the fresh Chrome.
        chrome_proc = Some(process);
        (version.ws_debugger_url, port, Some(pid))
    };

    // --- Target resolution ------------------------------------------------
    let browser = CdpClient::connect(&browser_ws, CdpConfig::default()).await?;
    let target = resolver::resolve_tab(&browser, "127.0.0.1", port, &opts.url, opts.reuse_tab)
        .await?;
    browser.close().await;

    let tab_ws = target.ws_debugger_url.clone().ok_or_else(|| {
        AppError::new(
            format!("target {} has no webSocketDebuggerUrl", target.id),
            ExitCode::ProtocolError,
        )
    })?;

    let tab_config = CdpConfig {
        reconnect: crate::cdp::ReconnectConfig {
            enabled: true,
            ..crate::cdp::ReconnectConfig::default()
        },
        ..CdpConfig::default()
    };
    let client = Arc::new(CdpClient::connect(&tab_ws, tab_config).await?);
    tracing::info!(target_id = %target.id, url = %target.url, "attached to session tab");

    // --- Store and collectors ---------------------------------------------
    let store = TelemetryStore::shared();
    {
        let mut locked = lock_store(&store);
        locked.set_target(TargetSummary {
            id: target.id.clone(),
            url: target.url.clone(),
            title: target.title.clone(),
        });
        locked.set_active(opts.collect.clone());
    }

    let mut collector_handles = Vec::new();
    if opts.collect.contains(&TelemetryKind::Network) {
        collector_handles
            .push(spawn_network_collector(Arc::clone(&client), Arc::clone(&store), opts.network).await?);
    }
    if opts.collect.contains(&TelemetryKind::Console) {
        collector_handles
            .push(spawn_console_collector(Arc::clone(&client), Arc::clone(&store), opts.console).await?);
    }

    // --- Session files ----------------------------------------------------
    let pid = std::process::id();
    write_pid_file(&paths.session_pid(), pid)?;
    write_pid_file(&paths.daemon_pid(), pid)?;
    let meta = SessionMeta {
        bdg_pid: pid,
        chrome_pid,
        start_time: lock_store(&store).start_iso().to_string(),
        port,
        target_id: Some(target.id.clone()),
        ws_debugger_url: Some(tab_ws),
        active_telemetry: Some(opts.collect.iter().map(|k| k.to_string()).collect()),
    };
    write_meta(paths, &meta)?;

    // --- IPC server -------------------------------------------------------
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(4);
    let schema = ProtocolSchema::load().map_err(|e| {
        AppError::new(
            format!("bundled protocol schema is invalid: {e}"),
            ExitCode::UnhandledException,
        )
    })?;
    let handler = Arc::new(CommandRegistry::new(
        Arc::clone(&store),
        Arc::clone(&client),
        schema,
        shutdown_tx.clone(),
    ));
    let server = IpcServer::bind(&paths.daemon_sock())?;
    let accept_handle = server.spawn(handler);
    tracing::info!(socket = %paths.daemon_sock().display(), "IPC server listening");

    // --- Watchers ---------------------------------------------------------
    // Tab-destroyed supervision; best-effort since some endpoints refuse
    // discovery on page connections.
    let _ = client
        .send_command("Target.setDiscoverTargets", Some(json!({"discover": true})))
        .await;
    let mut destroyed_rx = client.subscribe("Target.targetDestroyed").await?;
    let watched_target = target.id.clone();
    let destroyed_tx = shutdown_tx.clone();
    let target_watcher = tokio::spawn(async move {
        while let Some(event) = destroyed_rx.recv().await {
            if event.params["targetId"].as_str() == Some(watched_target.as_str()) {
                tracing::warn!(target_id = %watched_target, "session target destroyed");
                let _ = destroyed_tx.send(ShutdownReason::TargetDestroyed).await;
                break;
            }
        }
    });

    let mut reconnect_rx = client.reconnect_events().await?;
    let reconnect_client = Arc::clone(&client);
    let reconnect_tx = shutdown_tx.clone();
    let active_kinds = opts.collect.clone();
    let reconnect_watcher = tokio::spawn(async move {
        while let Some(event) = reconnect_rx.recv().await {
            match event {
                ReconnectEvent::Reconnected { attempt } => {
                    tracing::info!(attempt, "re-enabling CDP domains after reconnect");
                    if active_kinds.contains(&TelemetryKind::Network) {
                        let _ = reconnect_client.send_command("Network.enable", None).await;
                    }
                    if active_kinds.contains(&TelemetryKind::Console) {
                        let _ = reconnect_client.send_command("Runtime.enable", None).await;
                        let _ = reconnect_client.send_command("Log.enable", None).await;
                    }
                    let _ = reconnect_client
                        .send_command("Target.setDiscoverTargets", Some(json!({"discover": true})))
                        .await;
                }
                ReconnectEvent::Gone {
                    attempts,
                    last_error,
                } => {
                    tracing::error!(attempts, %last_error, "CDP connection lost for good");
                    let _ = reconnect_tx.send(ShutdownReason::ConnectionLost).await;
                    break;
                }
            }
        }
    });

    // Bootstrap is complete: Chrome now outlives this process unless a
    // shutdown explicitly kills it.
    if let Some(process) = chrome_proc.take() {
        let _ = process.detach();
    }

    // --- Passive main loop ------------------------------------------------
    let reason = wait_for_shutdown(&mut shutdown_rx, opts.session_timeout).await?;
    tracing::info!(?reason, "beginning shutdown");

    // --- Ordered shutdown -------------------------------------------------
    // 1. No new IPC connections.
    accept_handle.abort();
    target_watcher.abort();
    reconnect_watcher.abort();

    // 2. Stop collectors.
    for handle in collector_handles {
        handle.abort();
    }

    // 3. Best-effort DOM snapshot.
    let dom = if opts.collect.contains(&TelemetryKind::Dom) && client.is_connected() {
        Some(capture_snapshot(&client).await)
    } else {
        None
    };

    // 4. Final output, before any session file disappears.
    let error_note = match reason {
        ShutdownReason::TargetDestroyed => Some("session target was destroyed".to_string()),
        ShutdownReason::ConnectionLost => Some("CDP connection lost".to_string()),
        _ => None,
    };
    let mut failure = None;
    let final_report = {
        let locked = lock_store(&store);
        build_report(&locked, dom, error_note)
    };
    if let Err(e) = write_report(paths, &final_report) {
        tracing::error!(error = %e, "could not write session.json");
        failure = Some(AppError::from(e));
    }

    // 5. Close the CDP client.
    client.close().await;

    // 6. Kill Chrome only when asked.
    let kill_chrome =
        opts.kill_chrome || matches!(reason, ShutdownReason::StopRequested { kill_chrome: true });
    if kill_chrome {
        let pid = chrome_pid.or_else(|| read_pid_file(&paths.chrome_pid()));
        if let Some(pid) = pid {
            tracing::info!(pid, "killing Chrome");
            crate::session::kill_process(pid);
        }
    }

    // 7. Remove coordination files; session.json, chrome.pid, and the
    //    profile stay.
    remove_session_files(paths);

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Block until a shutdown trigger fires: a signal, an IPC stop, a
/// watcher event, or the optional session timeout.
async fn wait_for_shutdown(
    shutdown_rx: &mut mpsc::Receiver<ShutdownReason>,
    session_timeout: Option<Duration>,
) -> Result<ShutdownReason, AppError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| AppError::new(format!("signal handler: {e}"), ExitCode::UnhandledException))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| AppError::new(format!("signal handler: {e}"), ExitCode::UnhandledException))?;

        let timeout_sleep = async {
            match session_timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout_sleep);

        let reason = tokio::select! {
            _ = sigint.recv() => ShutdownReason::Signal,
            _ = sigterm.recv() => ShutdownReason::Signal,
            received = shutdown_rx.recv() => received.unwrap_or(ShutdownReason::ConnectionLost),
            () = &mut timeout_sleep => ShutdownReason::TimeoutElapsed,
        };
        Ok(reason)
    }
    #[cfg(not(unix))]
    {
        let _ = session_timeout;
        Ok(shutdown_rx.recv().await.unwrap_or(ShutdownReason::Signal))
    }
}
