//! # iplchat server
//!
//! Orchestrates the broker's shared state, accepts TCP connections, and
//! runs the background flush/snapshot timers and the operator admin
//! console (C7/C8/C9).

use clap::Parser;
use iplchat_broker::{admin, dispatch, BrokerState};
use iplchat_common::config;
use iplchat_db::engine::Engine;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::{interval, Duration};

#[derive(Parser, Debug)]
#[command(name = "iplchat", about = "End-to-end encrypted direct-messaging broker")]
struct Cli {
    /// Startup file pointing at the active config file (`configPath=...`).
    /// Defaults to no indirection file, in which case `--config` (or
    /// built-in defaults) is used directly.
    #[arg(long)]
    startup_file: Option<PathBuf>,

    /// Path to the flat `key=value` config file. Takes precedence over
    /// `--startup-file`.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    let startup_file = cli.startup_file.clone().unwrap_or_else(|| PathBuf::from("startup.conf"));
    config::read_startup_file(&startup_file).ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = match resolve_config_path(&cli) {
        Some(path) => match config::init(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("config error loading {}: {e}; falling back to defaults", path.display());
                config::init_default()
            }
        },
        None => config::init_default(),
    };

    let _log_guard = iplchat_common::logging::init(&cfg.logfile_path, cfg.log_verbose)?;

    tracing::info!("starting iplchat broker on {}:{}", cfg.bind_host, cfg.bind_port);

    let engine = Engine::connect(
        cfg.database_file(),
        cfg.snapshot_path.clone(),
        cfg.snapshot_backlog,
        cfg.database_buffered_access,
    )
    .await?;
    let state = BrokerState::new(engine);

    let shutdown = Arc::new(Notify::new());
    spawn_flush_timer(state.clone(), cfg.database_flush_timeout_minutes, shutdown.clone());
    if cfg.autosave {
        spawn_snapshot_timer(state.clone(), cfg.snapshot_timeout_hours, shutdown.clone());
    }

    let listener = TcpListener::bind((cfg.bind_host.as_str(), cfg.bind_port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let accept_shutdown = shutdown.clone();
    let accept_state = state.clone();
    let accept_task = tokio::spawn(async move {
        let next_stream_id = AtomicU64::new(1);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((socket, _)) = accepted else { continue };
                    let stream_id = next_stream_id.fetch_add(1, Ordering::Relaxed);
                    let state = accept_state.clone();
                    tokio::spawn(async move {
                        dispatch::handle_connection(state, socket, stream_id).await;
                    });
                }
                _ = accept_shutdown.notified() => break,
            }
        }
    });

    let exit = admin::run(state.clone(), cfg, shutdown.clone()).await;
    shutdown.notify_waiters();
    accept_task.abort();

    match exit {
        admin::ConsoleExit::Stop => tracing::info!("operator requested shutdown"),
        admin::ConsoleExit::Eof => tracing::info!("console stdin closed, shutting down"),
    }

    if let Err(e) = state.engine.flush().await {
        tracing::warn!(error = %e, "final flush failed");
    }

    Ok(())
}

fn spawn_flush_timer(state: Arc<BrokerState>, minutes: u64, shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(minutes.max(1) * 60));
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = state.engine.flush().await {
                        tracing::warn!(error = %e, "periodic flush failed");
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    });
}

fn spawn_snapshot_timer(state: Arc<BrokerState>, hours: u64, shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(hours.max(1) * 3600));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = state.engine.save_snapshot().await {
                        tracing::warn!(error = %e, "periodic snapshot failed");
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    });
}
