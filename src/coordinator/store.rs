//! Storage contract shared by every backend
//!
//! Writes never go straight to a table. Callers describe them as a
//! [`WriteBatch`] of [`Mutation`]s, each carrying the prior value it expects
//! (compare-and-swap). A backend validates the whole batch against its
//! current state through [`stage`] and then commits the staged records in
//! one step, so either every mutation becomes visible or none does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::common::{Entity, Error, Result};
use crate::coordinator::records::{
    Allocation, AllocationStatus, Application, ApplicationStatus, Review, Room,
};

/// A single conditional write
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Register a room; fails if the id is taken
    InsertRoom(Room),
    /// Record a submitted application; fails if the id is taken
    InsertApplication(Application),
    CompareAndSwapOccupied {
        room_id: String,
        expected: u32,
        new: u32,
    },
    SetApplicationStatus {
        application_id: String,
        expected: ApplicationStatus,
        new: ApplicationStatus,
        review: Option<Review>,
        room_id: Option<String>,
    },
    CreateAllocation(Allocation),
    SetAllocationStatus {
        allocation_id: String,
        expected: AllocationStatus,
        new: AllocationStatus,
        changed_by: String,
        changed_at: DateTime<Utc>,
    },
    /// Guard: the student holds no active allocation for the semester
    EnsureNoActiveAllocation { student_id: String, semester: String },
}

/// Ordered set of mutations committed as one unit
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn insert_room(self, room: Room) -> Self {
        self.push(Mutation::InsertRoom(room))
    }

    pub fn insert_application(self, application: Application) -> Self {
        self.push(Mutation::InsertApplication(application))
    }

    pub fn compare_and_swap_occupied(self, room_id: &str, expected: u32, new: u32) -> Self {
        self.push(Mutation::CompareAndSwapOccupied {
            room_id: room_id.to_string(),
            expected,
            new,
        })
    }

    pub fn set_application_status(
        self,
        application_id: &str,
        expected: ApplicationStatus,
        new: ApplicationStatus,
        review: Option<Review>,
        room_id: Option<String>,
    ) -> Self {
        self.push(Mutation::SetApplicationStatus {
            application_id: application_id.to_string(),
            expected,
            new,
            review,
            room_id,
        })
    }

    pub fn create_allocation(self, allocation: Allocation) -> Self {
        self.push(Mutation::CreateAllocation(allocation))
    }

    pub fn set_allocation_status(
        self,
        allocation_id: &str,
        expected: AllocationStatus,
        new: AllocationStatus,
        changed_by: &str,
        changed_at: DateTime<Utc>,
    ) -> Self {
        self.push(Mutation::SetAllocationStatus {
            allocation_id: allocation_id.to_string(),
            expected,
            new,
            changed_by: changed_by.to_string(),
            changed_at,
        })
    }

    pub fn ensure_no_active_allocation(self, student_id: &str, semester: &str) -> Self {
        self.push(Mutation::EnsureNoActiveAllocation {
            student_id: student_id.to_string(),
            semester: semester.to_string(),
        })
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn mutations_mut(&mut self) -> &mut [Mutation] {
        &mut self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Storage backend for rooms, applications and allocations
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_room(&self, id: &str) -> Result<Option<Room>>;
    async fn list_rooms(&self) -> Result<Vec<Room>>;

    async fn get_application(&self, id: &str) -> Result<Option<Application>>;
    async fn list_applications(&self) -> Result<Vec<Application>>;

    async fn get_allocation(&self, id: &str) -> Result<Option<Allocation>>;
    async fn list_allocations(&self) -> Result<Vec<Allocation>>;

    /// Apply every mutation of the batch, or none of them.
    ///
    /// A precondition mismatch fails the whole batch (`Conflict`, `NotFound`,
    /// `Full`, `InvalidState`). Implementations must not await once the first
    /// staged record has been made visible: a caller that drops the future
    /// (timeout) observes either the complete batch or nothing.
    async fn apply(&self, batch: WriteBatch) -> Result<()>;

    async fn list_allocations_for_student(&self, student_id: &str) -> Result<Vec<Allocation>> {
        Ok(self
            .list_allocations()
            .await?
            .into_iter()
            .filter(|a| a.student_id == student_id)
            .collect())
    }

    async fn compare_and_swap_occupied(&self, room_id: &str, expected: u32, new: u32) -> Result<()> {
        self.apply(WriteBatch::new().compare_and_swap_occupied(room_id, expected, new))
            .await
    }

    async fn set_application_status(
        &self,
        application_id: &str,
        expected: ApplicationStatus,
        new: ApplicationStatus,
        review: Option<Review>,
    ) -> Result<()> {
        self.apply(WriteBatch::new().set_application_status(
            application_id,
            expected,
            new,
            review,
            None,
        ))
        .await
    }

    async fn create_allocation(&self, allocation: Allocation) -> Result<String> {
        let id = allocation.id.clone();
        self.apply(WriteBatch::new().create_allocation(allocation))
            .await?;
        Ok(id)
    }

    /// Flip an active allocation record to cancelled (record only, no occupancy change)
    async fn mark_allocation_cancelled(&self, allocation_id: &str, cancelled_by: &str) -> Result<()> {
        self.apply(WriteBatch::new().set_allocation_status(
            allocation_id,
            AllocationStatus::Active,
            AllocationStatus::Cancelled,
            cancelled_by,
            Utc::now(),
        ))
        .await
    }
}

/// Point-in-time reads a backend offers while it holds its commit gate
pub trait SnapshotRead {
    fn room(&self, id: &str) -> Result<Option<Room>>;
    fn application(&self, id: &str) -> Result<Option<Application>>;
    fn allocation(&self, id: &str) -> Result<Option<Allocation>>;
    /// Ids of active allocations held by `student_id` for `semester`
    fn active_allocation_ids(&self, student_id: &str, semester: &str) -> Result<Vec<String>>;
}

/// Records a validated batch will write
#[derive(Debug, Default)]
pub struct StagedWrites {
    pub rooms: HashMap<String, Room>,
    pub applications: HashMap<String, Application>,
    pub allocations: HashMap<String, Allocation>,
}

impl StagedWrites {
    fn room<S: SnapshotRead + ?Sized>(&self, snapshot: &S, id: &str) -> Result<Option<Room>> {
        match self.rooms.get(id) {
            Some(room) => Ok(Some(room.clone())),
            None => snapshot.room(id),
        }
    }

    fn application<S: SnapshotRead + ?Sized>(
        &self,
        snapshot: &S,
        id: &str,
    ) -> Result<Option<Application>> {
        match self.applications.get(id) {
            Some(app) => Ok(Some(app.clone())),
            None => snapshot.application(id),
        }
    }

    fn allocation<S: SnapshotRead + ?Sized>(
        &self,
        snapshot: &S,
        id: &str,
    ) -> Result<Option<Allocation>> {
        match self.allocations.get(id) {
            Some(a) => Ok(Some(a.clone())),
            None => snapshot.allocation(id),
        }
    }

    fn holds_active<S: SnapshotRead + ?Sized>(
        &self,
        snapshot: &S,
        student_id: &str,
        semester: &str,
    ) -> Result<bool> {
        let committed = snapshot.active_allocation_ids(student_id, semester)?;
        let still_active = committed.iter().any(|id| match self.allocations.get(id) {
            Some(staged) => staged.is_active(),
            None => true,
        });
        let staged_active = self
            .allocations
            .values()
            .any(|a| a.is_active() && a.student_id == student_id && a.semester == semester);
        Ok(still_active || staged_active)
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty() && self.applications.is_empty() && self.allocations.is_empty()
    }
}

/// Validate `batch` against `snapshot` and compute the records to write.
///
/// Mutations are checked in order and see the effects of earlier mutations
/// of the same batch. Nothing is written here; the first failing check
/// aborts with the whole batch discarded.
pub fn stage<S: SnapshotRead + ?Sized>(snapshot: &S, batch: &WriteBatch) -> Result<StagedWrites> {
    let mut staged = StagedWrites::default();
    let now = Utc::now();

    for mutation in batch.mutations() {
        match mutation {
            Mutation::InsertRoom(room) => {
                if room.capacity == 0 {
                    return Err(Error::InvalidInput("room capacity must be positive".into()));
                }
                if room.occupied > room.capacity {
                    return Err(Error::InvalidInput(format!(
                        "room {} occupied {} exceeds capacity {}",
                        room.id, room.occupied, room.capacity
                    )));
                }
                if staged.room(snapshot, &room.id)?.is_some() {
                    return Err(Error::Conflict(format!("room {} already exists", room.id)));
                }
                staged.rooms.insert(room.id.clone(), room.clone());
            }

            Mutation::InsertApplication(app) => {
                if staged.application(snapshot, &app.id)?.is_some() {
                    return Err(Error::Conflict(format!(
                        "application {} already exists",
                        app.id
                    )));
                }
                staged.applications.insert(app.id.clone(), app.clone());
            }

            Mutation::CompareAndSwapOccupied {
                room_id,
                expected,
                new,
            } => {
                let mut room = staged
                    .room(snapshot, room_id)?
                    .ok_or_else(|| Error::not_found(Entity::Room, room_id.as_str()))?;
                if room.occupied != *expected {
                    return Err(Error::Conflict(format!(
                        "room {} occupancy is {}, expected {}",
                        room_id, room.occupied, expected
                    )));
                }
                if *new > room.capacity {
                    return Err(Error::Full(room_id.clone()));
                }
                room.occupied = *new;
                room.updated_at = now;
                staged.rooms.insert(room_id.clone(), room);
            }

            Mutation::SetApplicationStatus {
                application_id,
                expected,
                new,
                review,
                room_id,
            } => {
                let mut app = staged
                    .application(snapshot, application_id)?
                    .ok_or_else(|| Error::not_found(Entity::Application, application_id.as_str()))?;
                if app.status != *expected {
                    return Err(Error::Conflict(format!(
                        "application {} is {}, expected {}",
                        application_id, app.status, expected
                    )));
                }
                if !expected.can_transition_to(*new, false) {
                    return Err(Error::invalid_state(
                        Entity::Application,
                        application_id.as_str(),
                        format!("cannot move from {} to {}", expected, new),
                    ));
                }
                app.status = *new;
                if review.is_some() {
                    app.review = review.clone();
                }
                if room_id.is_some() {
                    app.room_id = room_id.clone();
                }
                staged.applications.insert(application_id.clone(), app);
            }

            Mutation::CreateAllocation(allocation) => {
                if staged.allocation(snapshot, &allocation.id)?.is_some() {
                    return Err(Error::Conflict(format!(
                        "allocation {} already exists",
                        allocation.id
                    )));
                }
                staged
                    .allocations
                    .insert(allocation.id.clone(), allocation.clone());
            }

            Mutation::SetAllocationStatus {
                allocation_id,
                expected,
                new,
                changed_by,
                changed_at,
            } => {
                let mut allocation = staged
                    .allocation(snapshot, allocation_id)?
                    .ok_or_else(|| Error::not_found(Entity::Allocation, allocation_id.as_str()))?;
                if allocation.status != *expected {
                    return Err(Error::Conflict(format!(
                        "allocation {} is {}, expected {}",
                        allocation_id, allocation.status, expected
                    )));
                }
                allocation.status = *new;
                if *new == AllocationStatus::Cancelled {
                    allocation.cancelled_by = Some(changed_by.clone());
                    allocation.cancelled_at = Some(*changed_at);
                }
                staged.allocations.insert(allocation_id.clone(), allocation);
            }

            Mutation::EnsureNoActiveAllocation {
                student_id,
                semester,
            } => {
                if staged.holds_active(snapshot, student_id, semester)? {
                    return Err(Error::Conflict(format!(
                        "student {} already holds an active allocation for {}",
                        student_id, semester
                    )));
                }
            }
        }
    }

    Ok(staged)
}
