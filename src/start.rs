//! `bdg start` — launch the session daemon.
//!
//! The default path spawns a detached copy of this binary with the
//! hidden `--foreground` flag, its stdio redirected to `daemon.log`,
//! then polls the IPC socket until the daemon answers a handshake. The
//! foreground path runs the daemon inline.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;

use bdg::config;
use bdg::daemon::{self, DaemonOptions};
use bdg::error::{AppError, ExitCode};
use bdg::ipc::{IpcRequest, new_session_id};
use bdg::resolver;
use bdg::session::{self, SessionMeta};
use bdg::telemetry::{
    ConsoleCaptureOptions, ConsoleFilters, NetworkCaptureOptions, TelemetryKind, UrlPatterns,
};

use crate::cli::{CollectKind, GlobalOpts, StartArgs};
use crate::support::{print_output, request_daemon, resolve_paths};

/// How long the parent waits for the detached daemon to come up, beyond
/// the Chrome launch budget.
const HANDSHAKE_GRACE: Duration = Duration::from_secs(15);

/// Handshake poll cadence.
const HANDSHAKE_POLL: Duration = Duration::from_millis(200);

#[derive(Serialize)]
struct StartedInfo<'a> {
    started: bool,
    meta: &'a SessionMeta,
    socket: String,
}

fn collect_kinds(args: &StartArgs) -> Vec<TelemetryKind> {
    if args.collect.is_empty() {
        return vec![
            TelemetryKind::Network,
            TelemetryKind::Console,
            TelemetryKind::Dom,
        ];
    }
    args.collect
        .iter()
        .map(|k| match k {
            CollectKind::Network => TelemetryKind::Network,
            CollectKind::Console => TelemetryKind::Console,
            CollectKind::Dom => TelemetryKind::Dom,
        })
        .collect()
}

/// Merge CLI flags over config-file defaults into daemon options.
fn build_options(
    url: String,
    args: &StartArgs,
    capture: &config::ResolvedCapture,
    launch: &config::ResolvedLaunch,
) -> Result<DaemonOptions, AppError> {
    let include_all = args.include_all || capture.include_all;
    let include = if args.include_patterns.is_empty() {
        capture.include_patterns.clone()
    } else {
        args.include_patterns.clone()
    };
    let exclude = if args.exclude_patterns.is_empty() {
        capture.exclude_patterns.clone()
    } else {
        args.exclude_patterns.clone()
    };
    let console_include = if args.console_include.is_empty() {
        capture.console_include.clone()
    } else {
        args.console_include.clone()
    };
    let console_exclude = if args.console_exclude.is_empty() {
        capture.console_exclude.clone()
    } else {
        args.console_exclude.clone()
    };

    let network = NetworkCaptureOptions {
        include_all,
        patterns: UrlPatterns::new(&include, &exclude)?,
        fetch_all_bodies: args.fetch_all_bodies || capture.fetch_all_bodies,
        max_body_size: args.max_body_size.unwrap_or(capture.max_body_size),
    };
    let console = ConsoleCaptureOptions {
        filters: ConsoleFilters::new(&console_include, &console_exclude)?,
    };

    let mut chrome_args = launch.extra_args.clone();
    chrome_args.extend(args.chrome_args.iter().cloned());

    Ok(DaemonOptions {
        url,
        reuse_tab: args.reuse_tab,
        headless: args.headless || launch.headless,
        port: args.port,
        chrome_ws_url: args.ws_url.clone(),
        kill_chrome: args.kill_chrome,
        session_timeout: args.timeout.map(Duration::from_millis),
        collect: collect_kinds(args),
        network,
        console,
        chrome_args,
        launch_timeout: args
            .launch_timeout
            .map_or(Duration::from_secs(30), Duration::from_millis),
    })
}

/// Rebuild the argv for the detached daemon process.
fn daemon_argv(url: &str, args: &StartArgs, global: &GlobalOpts) -> Vec<String> {
    let mut argv: Vec<String> = vec!["start".into(), url.into(), "--foreground".into()];

    if let Some(dir) = &global.session_dir {
        argv.push("--session-dir".into());
        argv.push(dir.display().to_string());
    }
    if let Some(config) = &global.config {
        argv.push("--config".into());
        argv.push(config.display().to_string());
    }

    if args.reuse_tab {
        argv.push("--reuse-tab".into());
    }
    if args.headless {
        argv.push("--headless".into());
    }
    if let Some(port) = args.port {
        argv.push("--port".into());
        argv.push(port.to_string());
    }
    if let Some(ws_url) = &args.ws_url {
        argv.push("--ws-url".into());
        argv.push(ws_url.clone());
    }
    if args.kill_chrome {
        argv.push("--kill-chrome".into());
    }
    if let Some(timeout) = args.timeout {
        argv.push("--timeout".into());
        argv.push(timeout.to_string());
    }
    for kind in &args.collect {
        argv.push("--collect".into());
        argv.push(
            match kind {
                CollectKind::Network => "network",
                CollectKind::Console => "console",
                CollectKind::Dom => "dom",
            }
            .into(),
        );
    }
    if args.include_all {
        argv.push("--include-all".into());
    }
    for pattern in &args.include_patterns {
        argv.push("--include".into());
        argv.push(pattern.clone());
    }
    for pattern in &args.exclude_patterns {
        argv.push("--exclude".into());
        argv.push(pattern.clone());
    }
    if args.fetch_all_bodies {
        argv.push("--fetch-all-bodies".into());
    }
    if let Some(size) = args.max_body_size {
        argv.push("--max-body-size".into());
        argv.push(size.to_string());
    }
    for pattern in &args.console_include {
        argv.push("--console-include".into());
        argv.push(pattern.clone());
    }
    for pattern in &args.console_exclude {
        argv.push("--console-exclude".into());
        argv.push(pattern.clone());
    }
    for arg in &args.chrome_args {
        argv.push("--chrome-arg".into());
        argv.push(arg.clone());
    }
    if let Some(timeout) = args.launch_timeout {
        argv.push("--launch-timeout".into());
        argv.push(timeout.to_string());
    }

    argv
}

pub async fn execute_start(global: &GlobalOpts, args: &StartArgs) -> Result<(), AppError> {
    let paths = resolve_paths(global)?;
    let url = resolver::normalize_url(&args.url);

    if args.foreground {
        daemon::init_logging();
        let (config_path, config_file) = config::load_config(global.config.as_deref());
        let resolved = config::resolve(config_path, &config_file);
        let opts = build_options(url, args, &resolved.capture, &resolved.launch)?;
        return daemon::run(&paths, opts).await;
    }

    // Validate filter patterns before spawning; a daemon that dies on
    // arguments is a bad error surface.
    let (config_path, config_file) = config::load_config(global.config.as_deref());
    let resolved = config::resolve(config_path, &config_file);
    let _ = build_options(url.clone(), args, &resolved.capture, &resolved.launch)?;

    if let Some(pid) = session::read_pid_file(&paths.daemon_pid()) {
        if session::pid_alive(pid) {
            return Err(AppError::daemon_already_running(pid));
        }
    }

    paths.ensure_root()?;
    let log = std::fs::File::create(paths.daemon_log()).map_err(|e| {
        AppError::new(
            format!("could not create daemon log: {e}"),
            ExitCode::UnhandledException,
        )
    })?;
    let log_err = log.try_clone().map_err(|e| {
        AppError::new(
            format!("could not clone daemon log handle: {e}"),
            ExitCode::UnhandledException,
        )
    })?;

    let exe = std::env::current_exe().map_err(|e| {
        AppError::new(
            format!("cannot locate own executable: {e}"),
            ExitCode::UnhandledException,
        )
    })?;

    let mut command = std::process::Command::new(exe);
    command
        .args(daemon_argv(&url, args, global))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group: the daemon must survive this terminal.
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|e| {
        AppError::new(
            format!("could not spawn daemon: {e}"),
            ExitCode::UnhandledException,
        )
    })?;

    // Wait for the daemon to come up: Chrome launch budget plus grace.
    let launch_budget = args
        .launch_timeout
        .map_or(Duration::from_secs(30), Duration::from_millis);
    let deadline = tokio::time::Instant::now() + launch_budget + HANDSHAKE_GRACE;

    loop {
        let handshake = IpcRequest::HandshakeRequest {
            session_id: new_session_id(),
        };
        if request_daemon(&paths, &handshake).await.is_ok() {
            break;
        }

        if let Ok(Some(status)) = child.try_wait() {
            return Err(AppError::new(
                format!(
                    "daemon exited during startup ({status}); see {}",
                    paths.daemon_log().display()
                ),
                ExitCode::UnhandledException,
            ));
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AppError::new(
                format!(
                    "daemon did not become ready in time; see {}",
                    paths.daemon_log().display()
                ),
                ExitCode::TimeoutError,
            ));
        }
        tokio::time::sleep(HANDSHAKE_POLL).await;
    }

    let meta = session::read_meta(&paths)?.ok_or_else(|| {
        AppError::new(
            "daemon is up but wrote no session metadata",
            ExitCode::UnhandledException,
        )
    })?;

    let info = StartedInfo {
        started: true,
        meta: &meta,
        socket: paths.daemon_sock().display().to_string(),
    };
    print_output(&info, &global.output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_args(url: &str) -> StartArgs {
        StartArgs {
            url: url.into(),
            reuse_tab: false,
            headless: false,
            port: None,
            ws_url: None,
            kill_chrome: false,
            timeout: None,
            collect: Vec::new(),
            include_all: false,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            fetch_all_bodies: false,
            max_body_size: None,
            console_include: Vec::new(),
            console_exclude: Vec::new(),
            chrome_args: Vec::new(),
            launch_timeout: None,
            foreground: false,
        }
    }

    #[test]
    fn empty_collect_means_everything() {
        let kinds = collect_kinds(&minimal_args("example.com"));
        assert_eq!(kinds.len(), 3);
    }

    #[test]
    fn daemon_argv_round_trips_through_clap() {
        use clap::Parser;

        let mut args = minimal_args("https://example.com/app");
        args.headless = true;
        args.include_patterns = vec!["api.example.com".into()];
        args.collect = vec![CollectKind::Network];
        args.timeout = Some(60_000);

        let global = GlobalOpts {
            session_dir: Some("/tmp/bdg-argv-test".into()),
            config: None,
            output: crate::cli::OutputFormat {
                json: false,
                pretty: false,
                plain: false,
            },
        };

        let mut argv = vec!["bdg".to_string()];
        argv.extend(daemon_argv("https://example.com/app", &args, &global));
        let reparsed = crate::cli::Cli::try_parse_from(&argv).unwrap();

        let crate::cli::Command::Start(parsed) = reparsed.command else {
            panic!("expected start");
        };
        assert!(parsed.foreground);
        assert!(parsed.headless);
        assert_eq!(parsed.include_patterns, vec!["api.example.com"]);
        assert_eq!(parsed.collect, vec![CollectKind::Network]);
        assert_eq!(parsed.timeout, Some(60_000));
        assert_eq!(
            reparsed.global.session_dir.as_deref(),
            Some(std::path::Path::new("/tmp/bdg-argv-test"))
        );
    }

    #[test]
    fn bad_pattern_is_rejected_before_spawn() {
        let mut args = minimal_args("example.com");
        args.include_patterns = vec!["[".into()];
        let capture = config::ResolvedCapture {
            include_all: false,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            fetch_all_bodies: false,
            max_body_size: bdg::telemetry::DEFAULT_MAX_BODY_SIZE,
            console_include: Vec::new(),
            console_exclude: Vec::new(),
        };
        let launch = config::ResolvedLaunch {
            executable: None,
            headless: false,
            extra_args: Vec::new(),
        };
        let result = build_options("https://example.com".into(), &args, &capture, &launch);
        assert!(result.is_err());
    }
}
