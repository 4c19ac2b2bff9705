//! Ops commands: store verification and the coordinator client

pub mod client;
pub mod verify;

pub use client::ApiClient;
pub use verify::{verify_store, VerifyReport};
