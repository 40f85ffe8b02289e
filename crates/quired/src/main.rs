//! Quire Daemon (quired)
//!
//! The main server process for Quire - a versioned document store.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (in-memory store on port 7180)
//! quired
//!
//! # File-persisted store
//! quired --backend file --store-file /var/lib/quire/store.json
//!
//! # SQLite-backed store
//! quired --backend sqlite --db /var/lib/quire/data.db
//!
//! # Development mode (enables the /reset route)
//! quired --mode development
//!
//! # With a configuration file
//! quired --config /etc/quire/quire.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use quire_http::{build_router, AppState};
use quire_protocol::DocumentService;
use quire_store::{FileStore, MemoryStore, RuntimeMode, SqliteStore, Store};

mod config;
use config::FileConfig;

/// Quire Daemon - versioned document store server
#[derive(Parser, Debug)]
#[command(name = "quired")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "QUIRE_PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(long, env = "QUIRE_BIND")]
    bind: Option<String>,

    /// Storage backend (memory, file, sqlite)
    #[arg(long, env = "QUIRE_BACKEND")]
    backend: Option<String>,

    /// Store file path for the file backend
    #[arg(long, env = "QUIRE_STORE_FILE")]
    store_file: Option<PathBuf>,

    /// SQLite database path for the sqlite backend
    #[arg(long, env = "QUIRE_DB")]
    db: Option<PathBuf>,

    /// Runtime mode (production, development, test)
    #[arg(long, env = "QUIRE_MODE")]
    mode: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "QUIRE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "QUIRE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    // Initialize logging
    let log_level = args
        .log_level
        .or(file.log_level)
        .unwrap_or_else(|| "info".into());
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    print_banner();

    let mode: RuntimeMode = args
        .mode
        .or(file.mode)
        .unwrap_or_else(|| "production".into())
        .parse()?;

    let backend = args.backend.or(file.backend).unwrap_or_else(|| "memory".into());
    let store: Arc<dyn Store> = match backend.as_str() {
        "memory" => {
            info!("Using in-memory store (no persistence)");
            Arc::new(MemoryStore::new(mode))
        }
        "file" => {
            let path = args
                .store_file
                .or(file.store_file)
                .unwrap_or_else(|| PathBuf::from("store/quire.json"));
            info!(path = %path.display(), "Using file-persisted store");
            Arc::new(FileStore::open(path, mode)?)
        }
        "sqlite" => {
            let path = args.db.or(file.db).unwrap_or_else(|| PathBuf::from("quire.db"));
            info!(path = %path.display(), "Using SQLite store");
            Arc::new(SqliteStore::new(path, mode)?)
        }
        other => anyhow::bail!("Unknown backend: {}", other),
    };

    let service = Arc::new(DocumentService::new(store));
    let router = build_router(AppState::new(service, mode));

    let bind = args.bind.or(file.bind).unwrap_or_else(|| "0.0.0.0".into());
    let port = args.port.or(file.port).unwrap_or(7180);
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;

    info!(
        addr = %addr,
        backend = %backend,
        mode = %mode,
        "Starting Quire daemon"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_banner() {
    println!(
        r#"
  ╔═╗ ╦ ╦╦╦═╗╔═╗
  ║═╬╗║ ║║╠╦╝║╣
  ╚═╝╚╚═╝╩╩╚═╚═╝
  Versioned Document Store
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
