//! Room registry

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::common::audit::{AuditEventType, AuditLogger};
use crate::common::utils::{generate_id, validate_id};
use crate::common::{Entity, Error, Result};
use crate::coordinator::events::{ChangeEvent, ChangeKind, EventBus};
use crate::coordinator::records::{GenderPolicy, Room};
use crate::coordinator::store::{Store, WriteBatch};

/// Registration request for a room
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRoom {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub room_number: String,
    pub hostel_id: String,
    pub capacity: u32,
    #[serde(default)]
    pub block: Option<String>,
    #[serde(default)]
    pub floor: Option<i32>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
    /// Must agree with rooms already registered in the hostel
    #[serde(default)]
    pub gender_policy: GenderPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomFilter {
    pub hostel_id: Option<String>,
    /// Only rooms with at least one free bed
    #[serde(default)]
    pub available_only: bool,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        if let Some(hostel) = &self.hostel_id {
            if &room.hostel_id != hostel {
                return false;
            }
        }
        !(self.available_only && room.is_full())
    }
}

pub struct RoomRegistry {
    store: Arc<dyn Store>,
    events: EventBus,
    audit: Arc<AuditLogger>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn Store>, events: EventBus, audit: Arc<AuditLogger>) -> Self {
        Self {
            store,
            events,
            audit,
        }
    }

    pub async fn create_room(&self, new: NewRoom, actor: &str) -> Result<Room> {
        let id = match new.id {
            Some(id) => {
                validate_id("room_id", &id)?;
                id
            }
            None => generate_id(),
        };
        validate_id("hostel_id", &new.hostel_id)?;
        if new.room_number.trim().is_empty() {
            return Err(Error::InvalidInput("room_number cannot be empty".into()));
        }
        if new.capacity == 0 {
            return Err(Error::InvalidInput("room capacity must be positive".into()));
        }
        if let Some(existing) = self
            .store
            .list_rooms()
            .await?
            .into_iter()
            .find(|r| r.hostel_id == new.hostel_id && r.gender_policy != new.gender_policy)
        {
            return Err(Error::InvalidInput(format!(
                "hostel {} is {}, not {}",
                new.hostel_id, existing.gender_policy, new.gender_policy
            )));
        }

        let now = Utc::now();
        let room = Room {
            id,
            room_number: new.room_number,
            hostel_id: new.hostel_id,
            capacity: new.capacity,
            occupied: 0,
            block: new.block,
            floor: new.floor,
            condition: new.condition,
            amenities: new.amenities,
            gender_policy: new.gender_policy,
            created_at: now,
            updated_at: now,
        };
        self.store
            .apply(WriteBatch::new().insert_room(room.clone()))
            .await?;

        tracing::info!(
            room_id = %room.id,
            hostel_id = %room.hostel_id,
            capacity = room.capacity,
            "room registered"
        );
        self.audit.log_event(
            AuditEventType::RoomCreated,
            actor,
            Some(room.id.clone()),
            format!("room {} registered in {}", room.room_number, room.hostel_id),
            Some(serde_json::json!({
                "capacity": room.capacity,
                "gender_policy": room.gender_policy,
            })),
        );
        self.events
            .publish(ChangeEvent::new(ChangeKind::RoomCreated, room.id.as_str()).room(room.id.as_str()));
        Ok(room)
    }

    pub async fn get_room(&self, id: &str) -> Result<Room> {
        self.store
            .get_room(id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Room, id))
    }

    pub async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<Room>> {
        let mut rooms: Vec<Room> = self
            .store
            .list_rooms()
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        rooms.sort_by(|a, b| {
            (a.hostel_id.as_str(), a.room_number.as_str())
                .cmp(&(b.hostel_id.as_str(), b.room_number.as_str()))
        });
        Ok(rooms)
    }
}
