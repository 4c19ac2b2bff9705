//! Coordinator binary

use clap::{Parser, Subcommand};
use roomalloc::{
    common::{Config, StorageBackend},
    Coordinator,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "roomalloc-coord")]
#[command(about = "roomalloc hostel room allocation coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Config file (TOML); ROOMALLOC__* env vars apply on top
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Storage backend: memory or rocksdb
        #[arg(long)]
        storage: Option<StorageBackend>,

        /// Database directory (rocksdb backend)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Append audit entries to this file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            storage,
            db,
            audit_log,
        } => {
            // File and environment first, CLI flags win
            let mut config = Config::load(config.as_deref())?;
            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.coordinator.bind_addr = bind;
            }
            if let Some(storage) = storage {
                config.coordinator.storage = storage;
            }
            if let Some(db) = db {
                config.coordinator.db_path = db;
            }
            if audit_log.is_some() {
                config.coordinator.audit_log = audit_log;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let coord = Coordinator::new(config.coordinator, config.node_id);
            coord.serve().await?;
        }
    }

    Ok(())
}
