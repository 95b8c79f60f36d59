//! Canopy terminal client.
//!
//! Usage:
//!   canopy chat.example.org:7777
//!   canopy --username alice --histfile ./history.json localhost:7777
//!
//! Logs go to a file (see `--logfile`); set `RUST_LOG` to change the level.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use canopy_archive::ArchiveManager;
use canopy_client::{ClientConfig, NetClient, NotificationPolicy, quit, spawn_history, spawn_supervisor};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod frontend;

use frontend::{BellNotifier, Frontend};

/// Terminal client for tree-structured chat.
#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(about = "Terminal client for tree-structured chat")]
struct Args {
    /// Server address (host:port)
    address: String,

    /// Username shown on your messages
    #[arg(long, default_value_t = whoami::username())]
    username: String,

    /// History file [default: <data dir>/canopy/history.json]
    #[arg(long)]
    histfile: Option<PathBuf>,

    /// Log file [default: <data dir>/canopy/canopy.log]
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// When to ring the bell for incoming messages
    #[arg(long, default_value = "mention-reply", value_parser = NotificationPolicy::from_str)]
    notify: NotificationPolicy,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("canopy")
}

fn init_logging(logfile: &Path) -> Result<WorkerGuard> {
    let dir = logfile
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = logfile
        .file_name()
        .with_context(|| format!("log path {} has no file name", logfile.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logfile = args.logfile.clone().unwrap_or_else(|| data_dir().join("canopy.log"));
    let _guard = init_logging(&logfile)?;
    tracing::info!("--- new session ---");

    let histfile = args
        .histfile
        .clone()
        .unwrap_or_else(|| data_dir().join("history.json"));
    let manager = ArchiveManager::new(&histfile)?;
    // An unreadable history file is left untouched on exit.
    let loaded = match manager.load() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(path = %histfile.display(), "failed to load history: {e}");
            eprintln!("history not loaded from {}: {e}", histfile.display());
            false
        }
    };
    let archive = manager.archive();

    let config = ClientConfig::new(&args.address, &args.username)?
        .with_notification_policy(args.notify);
    let client = NetClient::new(config, archive.clone());

    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    client.on_receive(move |message| {
        let _ = incoming_tx.send(message);
    });

    let history = spawn_history(archive);
    let supervisor = spawn_supervisor(client.clone(), true);

    let result = Frontend::new(client.clone(), history, BellNotifier)
        .run(incoming_rx)
        .await;

    quit(&client).await;
    supervisor.stop();
    if loaded {
        match manager.save() {
            Ok(()) => tracing::info!(path = %histfile.display(), "history saved"),
            Err(e) => {
                tracing::error!(path = %histfile.display(), "failed to save history: {e}");
                eprintln!("failed to save history to {}: {e}", histfile.display());
            }
        }
    }

    eprintln!("log written to {}", logfile.display());
    result
}
