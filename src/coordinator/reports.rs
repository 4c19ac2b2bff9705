//! Allocation queries and occupancy reports

use serde::{Deserialize, Serialize};

use crate::common::{Entity, Error, Result};
use crate::coordinator::records::{Allocation, AllocationStatus};
use crate::coordinator::store::Store;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocationFilter {
    pub student_id: Option<String>,
    pub room_id: Option<String>,
    pub semester: Option<String>,
    pub hostel_id: Option<String>,
    pub status: Option<AllocationStatus>,
}

impl AllocationFilter {
    pub fn matches(&self, allocation: &Allocation) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w == have)
        }

        eq(&self.student_id, &allocation.student_id)
            && eq(&self.room_id, &allocation.room_id)
            && eq(&self.semester, &allocation.semester)
            && eq(&self.hostel_id, &allocation.room.hostel_id)
            && self.status.map_or(true, |s| s == allocation.status)
    }
}

/// Newest first
pub async fn list_allocations(store: &dyn Store, filter: &AllocationFilter) -> Result<Vec<Allocation>> {
    let mut allocations: Vec<Allocation> = store
        .list_allocations()
        .await?
        .into_iter()
        .filter(|a| filter.matches(a))
        .collect();
    allocations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(allocations)
}

pub async fn get_allocation(store: &dyn Store, id: &str) -> Result<Allocation> {
    store
        .get_allocation(id)
        .await?
        .ok_or_else(|| Error::not_found(Entity::Allocation, id))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostelOccupancy {
    pub hostel_id: String,
    pub total_rooms: usize,
    pub total_capacity: u64,
    pub occupied: u64,
    pub available: u64,
    /// Percent of beds taken, two decimals
    pub occupancy_rate: f64,
}

pub async fn hostel_occupancy(store: &dyn Store, hostel_id: &str) -> Result<HostelOccupancy> {
    let rooms: Vec<_> = store
        .list_rooms()
        .await?
        .into_iter()
        .filter(|r| r.hostel_id == hostel_id)
        .collect();
    if rooms.is_empty() {
        return Err(Error::not_found(Entity::Hostel, hostel_id));
    }

    let total_capacity: u64 = rooms.iter().map(|r| r.capacity as u64).sum();
    let occupied: u64 = rooms.iter().map(|r| r.occupied as u64).sum();
    let rate = if total_capacity == 0 {
        0.0
    } else {
        occupied as f64 / total_capacity as f64 * 100.0
    };

    Ok(HostelOccupancy {
        hostel_id: hostel_id.to_string(),
        total_rooms: rooms.len(),
        total_capacity,
        occupied,
        available: total_capacity.saturating_sub(occupied),
        occupancy_rate: (rate * 100.0).round() / 100.0,
    })
}
