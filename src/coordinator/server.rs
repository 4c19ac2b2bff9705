//! Coordinator server

use std::net::SocketAddr;
use std::sync::Arc;

use crate::common::audit::{AuditEventType, AuditLogger};
use crate::common::{CoordinatorConfig, Result, StorageBackend};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::memory::MemStore;
use crate::coordinator::rocks::RocksStore;
use crate::coordinator::store::Store;

pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
}

/// Open the configured storage backend
pub fn open_store(config: &CoordinatorConfig) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.storage {
        StorageBackend::Memory => Arc::new(MemStore::new()),
        StorageBackend::Rocksdb => Arc::new(RocksStore::open(&config.db_path)?),
    };
    Ok(store)
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self { config, node_id }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting coordinator: {}", self.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Storage: {:?}", self.config.storage);
        if self.config.storage == StorageBackend::Rocksdb {
            tracing::info!("  DB path: {}", self.config.db_path.display());
        }
        tracing::info!(
            "  Commit timeout: {:?}, max attempts: {}",
            self.config.allocation.commit_timeout(),
            self.config.allocation.max_attempts
        );

        let store = open_store(&self.config)?;
        let audit = Arc::new(AuditLogger::new(self.config.audit_log.as_deref()));
        audit.log_event(
            AuditEventType::System,
            "system",
            None,
            format!("coordinator {} starting", self.node_id),
            None,
        );

        let state = CoordState::new(store, &self.config, audit.clone());
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Coordinator ready");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        audit.log_event(
            AuditEventType::System,
            "system",
            None,
            format!("coordinator {} stopped", self.node_id),
            None,
        );
        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
