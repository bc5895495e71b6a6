//! TripDaemon - trip-planning lobby coordinator
//!
//! CLI entry point for launching and managing the coordinator daemon.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use tripdaemon::cli::{Cli, Command, DaemonCommand, StatusFormat, get_log_path};
use tripdaemon::config::Config;
use tripdaemon::daemon::DaemonManager;
use tripdaemon::net::{LobbyClient, listener};
use tripdaemon::session::{SessionRequest, SessionStore};
use tripmatch::create_provider;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tripdaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Level priority: CLI --log-level > config file > INFO default
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(log_dir.join("tripd.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// The address the CLI should use to reach the coordinator
///
/// Prefers what the running coordinator recorded about itself; falls back
/// to the local config when there is no runtime file.
fn coordinator_addr(daemon: &DaemonManager, config: &Config) -> String {
    daemon.reachable_at().unwrap_or_else(|| config.server.bind.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Daemon { command } => match command {
            DaemonCommand::Start { foreground } => cmd_start(&config, foreground).await,
            DaemonCommand::Stop => cmd_stop(&config).await,
            DaemonCommand::Status { detailed, format } => cmd_status(&config, detailed, format).await,
            DaemonCommand::Ping => cmd_ping(&config).await,
        },
        Command::Serve => run_daemon(&config, false).await,
        Command::RunDaemon => run_daemon(&config, true).await,
        Command::Logs { follow, lines } => cmd_logs(follow, lines).await,
    }
}

/// Start the daemon
async fn cmd_start(config: &Config, foreground: bool) -> Result<()> {
    let daemon = DaemonManager::new();

    if daemon.is_running() {
        if let Some(pid) = daemon.running_pid() {
            println!("TripDaemon is already running (PID: {})", pid);
        } else {
            println!("TripDaemon is already running");
        }
        return Ok(());
    }

    if foreground {
        println!("Starting TripDaemon in foreground mode...");
        run_daemon(config, false).await
    } else {
        let pid = daemon.start()?;
        println!("TripDaemon started (PID: {})", pid);
        Ok(())
    }
}

/// Stop the daemon
///
/// Tries a graceful wire shutdown at the recorded listener address first,
/// falls back to signals if that fails.
async fn cmd_stop(config: &Config) -> Result<()> {
    let daemon = DaemonManager::new();

    if !daemon.is_running() {
        println!("TripDaemon is not running");
        return Ok(());
    }

    let pid = daemon.running_pid();
    let addr = coordinator_addr(&daemon, config);

    if let Ok(mut client) = LobbyClient::connect(&addr).await {
        debug!(%addr, "cmd_stop: trying wire shutdown");
        match client.shutdown().await {
            Ok(()) => {
                let mut attempts = 0;
                while daemon.is_running() && attempts < 50 {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    attempts += 1;
                }
                if !daemon.is_running() {
                    if let Some(pid) = pid {
                        println!("TripDaemon stopped gracefully (was PID: {})", pid);
                    } else {
                        println!("TripDaemon stopped gracefully");
                    }
                    return Ok(());
                }
                debug!("cmd_stop: wire shutdown timed out, falling back to signals");
            }
            Err(e) => {
                debug!(error = %e, "cmd_stop: wire shutdown failed, falling back to signals");
            }
        }
    }

    daemon.stop()?;
    if let Some(pid) = pid {
        println!("TripDaemon stopped (was PID: {})", pid);
    } else {
        println!("TripDaemon stopped");
    }
    Ok(())
}

/// Ping the daemon to check if it's alive and responsive
async fn cmd_ping(config: &Config) -> Result<()> {
    let daemon = DaemonManager::new();
    if !daemon.is_running() {
        println!("TripDaemon is not running");
        return Ok(());
    }

    let addr = coordinator_addr(&daemon, config);
    match LobbyClient::connect(&addr).await {
        Ok(mut client) => match client.ping().await {
            Ok(version) => {
                println!("Daemon is alive and responsive at {}", addr);
                println!("Version: {}", version);
            }
            Err(e) => {
                println!("Daemon is registered but not responding");
                println!("Error: {}", e);
            }
        },
        Err(e) => {
            println!("Daemon is registered but its listener at {} is not reachable", addr);
            println!("Error: {}", e);
        }
    }

    Ok(())
}

/// Show daemon status
async fn cmd_status(config: &Config, detailed: bool, format: StatusFormat) -> Result<()> {
    let daemon = DaemonManager::new();
    let status = daemon.status();

    let stats = if detailed && status.running {
        let addr = coordinator_addr(&daemon, config);
        match LobbyClient::connect(&addr).await {
            Ok(mut client) => client.stats().await.ok(),
            Err(_) => None,
        }
    } else {
        None
    };

    match format {
        StatusFormat::Json => {
            let mut json = serde_json::json!({
                "running": status.running,
                "pid": status.info.as_ref().map(|i| i.pid),
                "version": status.info.as_ref().map(|i| i.version.clone()),
                "bind": status.info.as_ref().map(|i| i.bind.clone()),
                "runtime_file": status.runtime_file.to_string_lossy(),
            });
            if let Some(stats) = &stats {
                json["stats"] = serde_json::to_value(stats)?;
            }
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        StatusFormat::Text => {
            println!("TripDaemon Status");
            println!("-----------------");
            if status.running {
                println!("Status: running");
                if let Some(info) = &status.info {
                    println!("PID: {}", info.pid);
                    println!("Version: {}", info.version);
                    println!("Listening on: {}", info.bind);
                }
            } else {
                println!("Status: stopped");
            }
            println!("Runtime file: {}", status.runtime_file.display());

            if let Some(stats) = &stats {
                println!();
                println!("Active sessions:   {}", stats.active_sessions);
                println!("Connected clients: {}", stats.connected_clients);
                println!("Matches computed:  {}", stats.matches_computed);
            } else if detailed && status.running {
                println!();
                println!("Live counters unavailable (listener not reachable)");
            }
        }
    }

    Ok(())
}

/// Show logs
async fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        println!("The daemon may not have been started yet.");
        return Ok(());
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();

        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;

        child.wait()?;
    } else {
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let reader = BufReader::new(file);
        let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        let start = all_lines.len().saturating_sub(lines);
        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(())
}

/// Run the coordinator main loop
///
/// When `register` is set (the forked `run-daemon` path) the process records
/// itself in the runtime file once the listener is bound, with the address
/// the listener actually got, and clears the file again on graceful exit.
async fn run_daemon(config: &Config, register: bool) -> Result<()> {
    info!("Coordinator starting...");

    // Fail fast on provider misconfiguration (missing API key, unknown name)
    let provider =
        create_provider(&config.provider).map_err(|e| eyre::eyre!("Failed to create flight provider: {e}"))?;
    info!(provider = %config.provider.provider, "Flight provider initialized");

    let store = SessionStore::new(config.session.clone(), config.travel.clone(), provider);
    let store_tx = store.sender();
    let mut store_task = tokio::spawn(store.run());
    info!("Session store started");

    let lobby_listener = listener::bind(&config.server.bind).await?;
    let local_addr = lobby_listener.local_addr()?;
    let listener_task = tokio::spawn(listener::run(
        lobby_listener,
        store_tx.clone(),
        config.session.outbox_buffer,
    ));

    let daemon = DaemonManager::new();
    if register {
        daemon.register_self(&local_addr.to_string())?;
    }

    info!(%local_addr, "Coordinator running. Press Ctrl+C to stop.");

    let mut store_stopped = false;

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                warn!("SIGINT received");
                let _ = store_tx.send(SessionRequest::Shutdown).await;
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                let _ = store_tx.send(SessionRequest::Shutdown).await;
            }
            _ = &mut store_task => {
                // Wire-level shutdown command
                info!("Session store stopped");
                store_stopped = true;
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl+C received");
                let _ = store_tx.send(SessionRequest::Shutdown).await;
            }
            _ = &mut store_task => {
                info!("Session store stopped");
                store_stopped = true;
            }
        }
    }

    info!("Coordinator shutting down...");

    if !store_stopped {
        let _ = store_task.await;
    }
    listener_task.abort();

    if register {
        // A crash is the only way to leave a stale runtime file behind
        if let Err(e) = daemon.clear() {
            warn!(error = %e, "Failed to remove runtime file");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
