//! Common utilities and types shared across roomalloc

pub mod audit;
pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use audit::{AuditEventType, AuditLogger};
pub use config::{AllocationPolicy, Config, CoordinatorConfig, StorageBackend};
pub use error::{Entity, Error, Result};
pub use metrics::MetricsRegistry;
pub use utils::{generate_id, retry_with_backoff, timestamp_now, validate_id, Backoff};
