//! Verify store consistency
//!
//! For every room, `occupied` must equal the number of active allocations
//! that reference it and must not exceed `capacity`. Every allocation must
//! reference an existing room.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::Result;
use crate::coordinator::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDrift {
    pub room_id: String,
    pub capacity: u32,
    pub occupied: u32,
    pub active_allocations: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReport {
    pub rooms_checked: usize,
    pub allocations_checked: usize,
    /// occupied != active allocations
    pub mismatched: Vec<RoomDrift>,
    /// occupied > capacity
    pub over_capacity: Vec<RoomDrift>,
    /// Allocation ids whose room is missing
    pub orphaned: Vec<String>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatched.is_empty() && self.over_capacity.is_empty() && self.orphaned.is_empty()
    }
}

pub async fn verify_store(store: &dyn Store) -> Result<VerifyReport> {
    tracing::info!("Starting store verification");

    let rooms = store.list_rooms().await?;
    let allocations = store.list_allocations().await?;

    let mut active: HashMap<&str, u32> = HashMap::new();
    let mut orphaned = Vec::new();
    for allocation in &allocations {
        if !rooms.iter().any(|r| r.id == allocation.room_id) {
            orphaned.push(allocation.id.clone());
            continue;
        }
        if allocation.is_active() {
            *active.entry(allocation.room_id.as_str()).or_default() += 1;
        }
    }

    let mut report = VerifyReport {
        rooms_checked: rooms.len(),
        allocations_checked: allocations.len(),
        orphaned,
        ..Default::default()
    };
    for room in &rooms {
        let drift = RoomDrift {
            room_id: room.id.clone(),
            capacity: room.capacity,
            occupied: room.occupied,
            active_allocations: active.get(room.id.as_str()).copied().unwrap_or(0),
        };
        if room.occupied > room.capacity {
            report.over_capacity.push(drift.clone());
        }
        if drift.occupied != drift.active_allocations {
            report.mismatched.push(drift);
        }
    }

    if report.is_consistent() {
        tracing::info!(
            rooms = report.rooms_checked,
            allocations = report.allocations_checked,
            "Store is consistent"
        );
    } else {
        tracing::warn!(
            mismatched = report.mismatched.len(),
            over_capacity = report.over_capacity.len(),
            orphaned = report.orphaned.len(),
            "Store inconsistencies found"
        );
    }

    Ok(report)
}
