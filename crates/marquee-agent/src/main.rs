//! `marquee-agent` — headless host for the Marquee signage agent.
//!
//! Wires configuration, the session manager, and the command dispatcher
//! together and runs the device lifecycle: restore or pair, heartbeat
//! while active, execute remote commands, logout on demand. A real
//! deployment embeds `marquee-core` in a UI shell; this binary stands
//! in for that shell with logging handlers, which makes it useful for
//! backend integration testing and kiosk installs without a player.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use marquee_core::{Agent, CommandKind, ScreenNavigator, SessionState};

/// Digital-signage device agent.
#[derive(Parser, Debug)]
#[command(name = "marquee-agent", version, about)]
struct Cli {
    /// Config file path (defaults to the platform config dir)
    #[arg(short = 'c', long, env = "MARQUEE_CONFIG")]
    config: Option<PathBuf>,

    /// Log to this file instead of stdout
    #[arg(long, env = "MARQUEE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Set up tracing to stdout or a file. Returns the appender guard that
/// must be held for the lifetime of the application so logs flush.
fn setup_tracing(cli: &Cli) -> Option<WorkerGuard> {
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "marquee_agent={log_level},marquee_core={log_level},marquee_api={log_level}"
        ))
    });

    match &cli.log_file {
        Some(log_file) => {
            let log_dir = log_file.parent().unwrap_or(std::path::Path::new("."));
            let log_filename = log_file
                .file_name()
                .unwrap_or(std::ffi::OsStr::new("marquee-agent.log"));

            let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
                .init();

            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .init();
            None
        }
    }
}

/// Stand-in for the UI shell's navigation: a real deployment swaps the
/// playlist screen for the login/pairing screen here.
struct LoggingNavigator;

impl ScreenNavigator for LoggingNavigator {
    fn to_login_screen(&self) {
        info!("presentation layer redirected to the pairing screen");
    }
}

/// Register the built-in command handlers. Preview and screen-share are
/// log-only stand-ins for what the UI shell would wire up.
fn register_handlers(agent: &Agent) {
    let registry = agent.registry();

    registry.register_fn(CommandKind::SyncStatus, |command| async move {
        info!(id = %command.id, "sync requested, playlist refresh would run here");
        Ok(())
    });

    registry.register_fn(CommandKind::PreviewContent, |command| async move {
        info!(id = %command.id, payload = %command.payload, "preview requested");
        Ok(())
    });

    registry.register_fn(CommandKind::ScreenShare, |command| async move {
        info!(id = %command.id, "screen share requested, relay would attach here");
        Ok(())
    });

    let session = agent.session().clone();
    registry.register_fn(CommandKind::Logout, move |command| {
        let session = session.clone();
        async move {
            info!(id = %command.id, "remote logout requested");
            session.logout().await;
            Ok(())
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _log_guard = setup_tracing(&cli);

    let config = marquee_config::load_config(cli.config.as_ref())
        .map_err(|e| eyre!("cannot load config: {e}"))?;
    let agent_config =
        marquee_config::to_agent_config(&config).map_err(|e| eyre!("invalid config: {e}"))?;

    info!(backend = %agent_config.backend_url, "starting marquee-agent");

    let agent = Agent::new(agent_config, Arc::new(LoggingNavigator), None)
        .map_err(|e| eyre!("cannot build agent: {e}"))?;
    info!(device_id = %agent.device_id(), "device identity resolved");

    register_handlers(&agent);
    agent.initialize().await.map_err(|e| eyre!("initialization failed: {e}"))?;

    run(&agent).await;

    agent.shutdown().await;
    info!("marquee-agent stopped");
    Ok(())
}

/// Drive the session lifecycle until ctrl-c.
///
/// Authenticated: mark the screen active (heartbeat on) and listen for
/// commands. Unauthenticated: show a pairing code and wait for a
/// companion client to claim it. Logout (local or remote) drops back
/// to pairing automatically.
async fn run(agent: &Agent) {
    let mut state = agent.session().state();

    loop {
        match *state.borrow_and_update() {
            SessionState::Authenticated => {
                agent.session().set_screen_active(true).await;
                if let Err(e) = agent.dispatcher().start_listening().await {
                    warn!(error = %e, "cannot start command dispatcher");
                }
            }
            SessionState::Unauthenticated => {
                match agent.session().begin_pairing().await {
                    Ok(code) => {
                        info!(code = %code.code, expires_at = %code.expires_at, "pairing code ready, claim it from the admin console");
                    }
                    Err(e) => {
                        warn!(error = %e, "cannot start pairing, retrying");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                }
            }
            _ => {}
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
