//! # roomalloc
//!
//! A hostel room allocation coordinator with:
//! - Capacity-safe bed assignment under concurrent warden actions
//! - All-or-nothing commits of room, application and allocation records
//! - Optimistic concurrency (compare-and-swap) with bounded, jittered retry
//! - Fail-closed commit timeouts
//! - In-memory or RocksDB storage
//! - HTTP API with a server-sent change feed
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              HTTP API (axum)             │
//! └───────┬──────────────┬───────────────┬───┘
//!         │              │               │
//! ┌───────▼─────┐ ┌──────▼──────┐ ┌──────▼──────┐
//! │ RoomRegistry│ │ Application │ │ Allocation  │
//! │             │ │ Desk        │ │ Coordinator │
//! └───────┬─────┘ └──────┬──────┘ └──────┬──────┘
//!         └──────────────┼───────────────┘
//!                        │ WriteBatch (CAS)
//!                ┌───────▼────────┐      ┌──────────┐
//!                │ Store          │─────▶│ EventBus │
//!                │ (mem / rocks)  │      └──────────┘
//!                └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! roomalloc-coord serve \
//!   --id coord-1 \
//!   --bind 0.0.0.0:5000 \
//!   --storage rocksdb \
//!   --db ./roomalloc-data
//! ```
//!
//! ### Use the CLI
//! ```bash
//! roomalloc room create --hostel north --number 101 --capacity 3
//! roomalloc application submit --student s-42 --semester 2024-S1
//! roomalloc application approve <application-id>
//! roomalloc allocate <application-id> <room-id> --bed B
//! roomalloc cancel <allocation-id>
//! roomalloc occupancy north
//! roomalloc verify
//! ```

pub mod common;
pub mod coordinator;
pub mod ops;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{AllocationCoordinator, Coordinator};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
