//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Room registry and application review
//! - Capacity-safe bed allocation and cancellation (optimistic CAS + retry)
//! - Allocation queries and occupancy reports
//! - Change notifications for subscribers
//! - Storage backends (in-memory, RocksDB)

pub mod allocator;
pub mod events;
pub mod http;
pub mod memory;
pub mod records;
pub mod reports;
pub mod review;
pub mod rocks;
pub mod rooms;
pub mod server;
pub mod store;

pub use allocator::AllocationCoordinator;
pub use events::{ChangeEvent, ChangeKind, EventBus, Subscription};
pub use memory::MemStore;
pub use records::{
    Allocation, AllocationDetails, AllocationStatus, Application, ApplicationStatus, Gender,
    GenderPolicy, Room,
};
pub use rocks::RocksStore;
pub use server::{open_store, Coordinator};
pub use store::{Mutation, Store, WriteBatch};
