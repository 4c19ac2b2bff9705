//! Room, application and allocation records
//!
//! Stored as-is by every backend (bincode on disk, cloned in memory) and
//! returned as JSON by the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A physical unit with fixed bed capacity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub room_number: String,
    pub hostel_id: String,
    pub capacity: u32,
    pub occupied: u32,
    pub block: Option<String>,
    pub floor: Option<i32>,
    pub condition: Option<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
    /// Hostel-wide rule on who may be housed here
    #[serde(default)]
    pub gender_policy: GenderPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.occupied)
    }

    pub fn is_full(&self) -> bool {
        self.occupied >= self.capacity
    }

    /// Descriptive fields copied onto an allocation
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_number: self.room_number.clone(),
            hostel_id: self.hostel_id.clone(),
            block: self.block.clone(),
            floor: self.floor,
            condition: self.condition.clone(),
            amenities: self.amenities.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            other => Err(crate::Error::InvalidInput(format!("unknown gender: {}", other))),
        }
    }
}

/// Which students a hostel houses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderPolicy {
    Male,
    Female,
    #[default]
    Mixed,
}

impl GenderPolicy {
    /// A restricted hostel only admits students whose recorded gender matches.
    pub fn admits(self, gender: Option<Gender>) -> bool {
        match self {
            GenderPolicy::Mixed => true,
            GenderPolicy::Male => gender == Some(Gender::Male),
            GenderPolicy::Female => gender == Some(Gender::Female),
        }
    }
}

impl fmt::Display for GenderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenderPolicy::Male => write!(f, "male"),
            GenderPolicy::Female => write!(f, "female"),
            GenderPolicy::Mixed => write!(f, "mixed"),
        }
    }
}

impl std::str::FromStr for GenderPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "male" => Ok(GenderPolicy::Male),
            "female" => Ok(GenderPolicy::Female),
            "mixed" => Ok(GenderPolicy::Mixed),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown gender policy: {}",
                other
            ))),
        }
    }
}

/// Room metadata as it was when the bed was assigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_number: String,
    pub hostel_id: String,
    pub block: Option<String>,
    pub floor: Option<i32>,
    pub condition: Option<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
    Allocated,
}

impl ApplicationStatus {
    /// Monotonic lifecycle: pending -> {approved, rejected}, approved -> allocated.
    ///
    /// Pending -> allocated is legal only when approval is not enforced.
    pub fn can_transition_to(self, next: ApplicationStatus, strict: bool) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Allocated)
        ) || (!strict && self == Pending && next == Allocated)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationStatus::Pending => write!(f, "pending"),
            ApplicationStatus::Approved => write!(f, "approved"),
            ApplicationStatus::Rejected => write!(f, "rejected"),
            ApplicationStatus::Allocated => write!(f, "allocated"),
        }
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ApplicationStatus::Pending),
            "approved" => Ok(ApplicationStatus::Approved),
            "rejected" => Ok(ApplicationStatus::Rejected),
            "allocated" => Ok(ApplicationStatus::Allocated),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown application status: {}",
                other
            ))),
        }
    }
}

/// Who reviewed an application and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
    pub rejection_reason: Option<String>,
}

/// A student's request for accommodation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub student_id: String,
    pub semester: String,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
    pub review: Option<Review>,
    /// Assigned room, set when the application becomes allocated
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    Active,
    Cancelled,
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationStatus::Active => write!(f, "active"),
            AllocationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for AllocationStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(AllocationStatus::Active),
            "cancelled" | "canceled" => Ok(AllocationStatus::Cancelled),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown allocation status: {}",
                other
            ))),
        }
    }
}

/// Binding of one application to one bed in one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    pub application_id: String,
    pub room_id: String,
    pub student_id: String,
    pub semester: String,
    pub bed_label: Option<String>,
    pub status: AllocationStatus,
    pub allocated_by: String,
    pub created_at: DateTime<Utc>,
    pub room: RoomSnapshot,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Allocation {
    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }
}

/// Caller-supplied part of an allocation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocationDetails {
    /// Must match the application's student
    pub student_id: String,
    pub bed_label: Option<String>,
    /// Acting warden
    #[serde(default)]
    pub allocated_by: String,
}
