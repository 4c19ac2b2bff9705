//! Allocation coordinator
//!
//! Owns the capacity invariant: a room's `occupied` never exceeds its
//! `capacity`, and the number of active allocations referencing a room
//! always equals `occupied`.
//!
//! Every attempt is read → check → conditional commit:
//!   1. Read the room and the application.
//!   2. Check eligibility, then capacity (cheap early refusal).
//!   3. Submit one `WriteBatch`: occupancy CAS, application status CAS,
//!      allocation insert. The store re-validates every expectation while
//!      committing, so a racing writer turns into `Conflict` instead of an
//!      overshoot.
//!
//! A `Conflict` restarts the whole attempt after a jittered backoff; every
//! other outcome goes straight back to the caller.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use crate::common::audit::{AuditEventType, AuditLogger};
use crate::common::config::AllocationPolicy;
use crate::common::metrics::MetricsRegistry;
use crate::common::utils::{generate_id, retry_with_backoff, validate_id, Backoff};
use crate::common::{Entity, Error, Result};
use crate::coordinator::events::{ChangeEvent, ChangeKind, EventBus};
use crate::coordinator::records::{
    Allocation, AllocationDetails, AllocationStatus, Application, ApplicationStatus,
};
use crate::coordinator::store::{Store, WriteBatch};

pub struct AllocationCoordinator {
    store: Arc<dyn Store>,
    events: EventBus,
    metrics: Arc<MetricsRegistry>,
    audit: Arc<AuditLogger>,
    policy: AllocationPolicy,
}

impl AllocationCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        events: EventBus,
        metrics: Arc<MetricsRegistry>,
        audit: Arc<AuditLogger>,
        policy: AllocationPolicy,
    ) -> Self {
        Self {
            store,
            events,
            metrics,
            audit,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    fn backoff(&self) -> Backoff {
        Backoff {
            max_attempts: self.policy.max_attempts,
            initial_delay: self.policy.initial_backoff(),
            max_delay: self.policy.max_backoff(),
        }
    }

    /// Assign one bed of `room_id` to an approved application.
    pub async fn allocate_room(
        &self,
        application_id: &str,
        room_id: &str,
        details: AllocationDetails,
    ) -> Result<Allocation> {
        validate_id("application_id", application_id)?;
        validate_id("room_id", room_id)?;

        let start = Instant::now();
        let result = retry_with_backoff(
            |attempt| self.try_allocate(application_id, room_id, &details, attempt),
            self.backoff(),
        )
        .await;
        self.metrics
            .allocation_latency
            .observe(start.elapsed().as_secs_f64() * 1000.0);

        match &result {
            Ok(allocation) => {
                self.metrics.allocations_committed.inc();
                tracing::info!(
                    allocation_id = %allocation.id,
                    application_id,
                    room_id,
                    student_id = %allocation.student_id,
                    "room allocated"
                );
                self.audit.log_event(
                    AuditEventType::RoomAllocated,
                    allocation.allocated_by.clone(),
                    Some(allocation.id.clone()),
                    format!("room {} allocated to {}", room_id, allocation.student_id),
                    Some(serde_json::json!({
                        "application_id": application_id,
                        "room_id": room_id,
                    })),
                );
            }
            Err(e) => {
                self.record_refusal(e);
                tracing::warn!(application_id, room_id, error = %e, "allocation refused");
                self.audit.log_event(
                    AuditEventType::AllocationRefused,
                    actor_or_system(&details.allocated_by),
                    Some(application_id.to_string()),
                    e.to_string(),
                    Some(serde_json::json!({ "room_id": room_id, "kind": e.kind() })),
                );
            }
        }
        result
    }

    async fn try_allocate(
        &self,
        application_id: &str,
        room_id: &str,
        details: &AllocationDetails,
        attempt: usize,
    ) -> Result<Allocation> {
        if attempt > 1 {
            self.metrics.conflict_retries.inc();
        }

        let room = self
            .store
            .get_room(room_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Room, room_id))?;
        let application = self
            .store
            .get_application(application_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Application, application_id))?;

        // eligibility before capacity: an allocated application is
        // InvalidState even when its own bed filled the room
        self.check_eligible(&application, details)?;
        if !room.gender_policy.admits(application.gender) {
            return Err(Error::invalid_state(
                Entity::Application,
                application_id,
                format!(
                    "gender mismatch: hostel {} is for {} students only",
                    room.hostel_id, room.gender_policy
                ),
            ));
        }

        let mut batch = WriteBatch::new();
        if self.policy.one_active_per_semester {
            let held = self
                .store
                .list_allocations_for_student(&application.student_id)
                .await?
                .into_iter()
                .any(|a| a.is_active() && a.semester == application.semester);
            if held {
                return Err(Error::invalid_state(
                    Entity::Application,
                    application_id,
                    format!(
                        "student {} already holds an active allocation for {}",
                        application.student_id, application.semester
                    ),
                ));
            }
            batch = batch
                .ensure_no_active_allocation(&application.student_id, &application.semester);
        }

        if room.is_full() {
            return Err(Error::Full(room_id.to_string()));
        }

        let allocation = Allocation {
            id: generate_id(),
            application_id: application.id.clone(),
            room_id: room.id.clone(),
            student_id: application.student_id.clone(),
            semester: application.semester.clone(),
            bed_label: details.bed_label.clone(),
            status: AllocationStatus::Active,
            allocated_by: actor_or_system(&details.allocated_by),
            created_at: Utc::now(),
            room: room.snapshot(),
            cancelled_by: None,
            cancelled_at: None,
        };

        let batch = batch
            .compare_and_swap_occupied(room_id, room.occupied, room.occupied + 1)
            .set_application_status(
                application_id,
                application.status,
                ApplicationStatus::Allocated,
                None,
                Some(room.id.clone()),
            )
            .create_allocation(allocation.clone());
        self.commit(batch).await?;

        self.events.publish(
            ChangeEvent::new(ChangeKind::RoomAllocated, allocation.id.as_str())
                .room(room_id)
                .student(allocation.student_id.as_str())
                .occupied(room.occupied + 1),
        );
        Ok(allocation)
    }

    fn check_eligible(&self, application: &Application, details: &AllocationDetails) -> Result<()> {
        if !details.student_id.is_empty() && details.student_id != application.student_id {
            return Err(Error::invalid_state(
                Entity::Application,
                application.id.as_str(),
                format!(
                    "application belongs to student {}, not {}",
                    application.student_id, details.student_id
                ),
            ));
        }

        let reason = match application.status {
            ApplicationStatus::Approved => return Ok(()),
            ApplicationStatus::Pending if !self.policy.strict_approval => return Ok(()),
            ApplicationStatus::Pending => "application has not been approved",
            ApplicationStatus::Rejected => "application was rejected",
            ApplicationStatus::Allocated => "application is already allocated",
        };
        Err(Error::invalid_state(
            Entity::Application,
            application.id.as_str(),
            reason,
        ))
    }

    /// Release the bed held by an active allocation.
    ///
    /// The application keeps its `allocated` status; statuses never move backwards.
    pub async fn cancel_allocation(&self, allocation_id: &str, cancelled_by: &str) -> Result<Allocation> {
        validate_id("allocation_id", allocation_id)?;
        let actor = actor_or_system(cancelled_by);

        let result = retry_with_backoff(
            |attempt| self.try_cancel(allocation_id, &actor, attempt),
            self.backoff(),
        )
        .await;

        match &result {
            Ok(allocation) => {
                self.metrics.allocations_cancelled.inc();
                tracing::info!(
                    allocation_id,
                    room_id = %allocation.room_id,
                    "allocation cancelled"
                );
                self.audit.log_event(
                    AuditEventType::AllocationCancelled,
                    actor.as_str(),
                    Some(allocation_id.to_string()),
                    format!("bed in room {} released", allocation.room_id),
                    None,
                );
            }
            Err(e) => {
                if matches!(e, Error::Conflict(_)) {
                    self.metrics.conflicts_exhausted.inc();
                }
                tracing::warn!(allocation_id, error = %e, "cancellation refused");
            }
        }
        result
    }

    async fn try_cancel(&self, allocation_id: &str, actor: &str, attempt: usize) -> Result<Allocation> {
        if attempt > 1 {
            self.metrics.conflict_retries.inc();
        }

        let mut allocation = self
            .store
            .get_allocation(allocation_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Allocation, allocation_id))?;
        if !allocation.is_active() {
            return Err(Error::invalid_state(
                Entity::Allocation,
                allocation_id,
                "allocation is already cancelled",
            ));
        }

        let room = self
            .store
            .get_room(&allocation.room_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Room, allocation.room_id.as_str()))?;
        if room.occupied == 0 {
            return Err(Error::Corrupted(format!(
                "room {} holds active allocation {} but reports zero occupancy",
                room.id, allocation_id
            )));
        }

        let now = Utc::now();
        let batch = WriteBatch::new()
            .set_allocation_status(
                allocation_id,
                AllocationStatus::Active,
                AllocationStatus::Cancelled,
                actor,
                now,
            )
            .compare_and_swap_occupied(&room.id, room.occupied, room.occupied - 1);
        self.commit(batch).await?;

        allocation.status = AllocationStatus::Cancelled;
        allocation.cancelled_by = Some(actor.to_string());
        allocation.cancelled_at = Some(now);

        self.events.publish(
            ChangeEvent::new(ChangeKind::AllocationCancelled, allocation_id)
                .room(room.id.as_str())
                .student(allocation.student_id.as_str())
                .occupied(room.occupied - 1),
        );
        Ok(allocation)
    }

    /// Commit with a bounded wait; an unacknowledged commit applies nothing.
    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let timeout = self.policy.commit_timeout();
        match tokio::time::timeout(timeout, self.store.apply(batch)).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.commit_timeouts.inc();
                Err(Error::Timeout(format!(
                    "commit not acknowledged within {:?}",
                    timeout
                )))
            }
        }
    }

    fn record_refusal(&self, e: &Error) {
        match e {
            Error::Full(_) => self.metrics.rejected_full.inc(),
            Error::InvalidState { .. } => self.metrics.rejected_invalid_state.inc(),
            Error::Conflict(_) => self.metrics.conflicts_exhausted.inc(),
            _ => {}
        }
    }
}

fn actor_or_system(actor: &str) -> String {
    if actor.trim().is_empty() {
        "system".to_string()
    } else {
        actor.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::memory::MemStore;
    use crate::coordinator::records::{Gender, GenderPolicy, Room};

    async fn seeded(capacity: u32, occupied: u32) -> (AllocationCoordinator, Arc<MemStore>) {
        let store = Arc::new(MemStore::new());
        let now = Utc::now();
        let room = Room {
            id: "r1".into(),
            room_number: "101".into(),
            hostel_id: "h1".into(),
            capacity,
            occupied,
            block: None,
            floor: None,
            condition: None,
            amenities: vec![],
            gender_policy: GenderPolicy::Mixed,
            created_at: now,
            updated_at: now,
        };
        let app = Application {
            id: "a1".into(),
            student_id: "s1".into(),
            semester: "2024-S1".into(),
            preferences: vec![],
            gender: None,
            status: ApplicationStatus::Approved,
            submitted_at: now,
            review: None,
            room_id: None,
        };
        store
            .apply(WriteBatch::new().insert_room(room).insert_application(app))
            .await
            .unwrap();

        let coordinator = AllocationCoordinator::new(
            store.clone(),
            EventBus::default(),
            Arc::new(MetricsRegistry::new()),
            Arc::new(AuditLogger::disabled()),
            AllocationPolicy::default(),
        );
        (coordinator, store)
    }

    fn details() -> AllocationDetails {
        AllocationDetails {
            student_id: "s1".into(),
            bed_label: Some("B".into()),
            allocated_by: "warden".into(),
        }
    }

    #[tokio::test]
    async fn test_allocate_updates_all_three_records() {
        let (coordinator, store) = seeded(2, 0).await;
        let mut feed = coordinator.events.subscribe();

        let allocation = coordinator
            .allocate_room("a1", "r1", details())
            .await
            .unwrap();

        assert_eq!(allocation.status, AllocationStatus::Active);
        assert_eq!(allocation.room.room_number, "101");
        assert_eq!(store.get_room("r1").await.unwrap().unwrap().occupied, 1);
        let app = store.get_application("a1").await.unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::Allocated);
        assert_eq!(app.room_id.as_deref(), Some("r1"));
        assert!(store.get_allocation(&allocation.id).await.unwrap().is_some());

        let event = feed.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::RoomAllocated);
        assert_eq!(event.occupied, Some(1));
        assert_eq!(coordinator.metrics.allocations_committed.get(), 1);
    }

    #[tokio::test]
    async fn test_student_mismatch() {
        let (coordinator, store) = seeded(2, 0).await;
        let err = coordinator
            .allocate_room(
                "a1",
                "r1",
                AllocationDetails {
                    student_id: "someone-else".into(),
                    ..details()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(store.get_room("r1").await.unwrap().unwrap().occupied, 0);
    }

    #[tokio::test]
    async fn test_cancel_twice() {
        let (coordinator, store) = seeded(2, 0).await;
        let allocation = coordinator
            .allocate_room("a1", "r1", details())
            .await
            .unwrap();

        let cancelled = coordinator
            .cancel_allocation(&allocation.id, "warden")
            .await
            .unwrap();
        assert_eq!(cancelled.status, AllocationStatus::Cancelled);
        assert_eq!(store.get_room("r1").await.unwrap().unwrap().occupied, 0);

        let err = coordinator
            .cancel_allocation(&allocation.id, "warden")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(store.get_room("r1").await.unwrap().unwrap().occupied, 0);
    }

    #[tokio::test]
    async fn test_invalid_ids() {
        let (coordinator, _) = seeded(2, 0).await;
        assert!(matches!(
            coordinator.allocate_room("", "r1", details()).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            coordinator.cancel_allocation("missing", "warden").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_repeat_on_last_bed_is_invalid_state() {
        let (coordinator, store) = seeded(1, 0).await;
        coordinator
            .allocate_room("a1", "r1", details())
            .await
            .unwrap();

        let err = coordinator
            .allocate_room("a1", "r1", details())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }), "got {:?}", err);
        assert_eq!(store.get_room("r1").await.unwrap().unwrap().occupied, 1);
        assert_eq!(store.list_allocations().await.unwrap().len(), 1);
        assert_eq!(coordinator.metrics.rejected_full.get(), 0);
    }

    #[tokio::test]
    async fn test_gender_policy_refusal() {
        let (coordinator, store) = seeded(2, 0).await;
        let now = Utc::now();
        let female_only = Room {
            id: "r2".into(),
            room_number: "201".into(),
            hostel_id: "h2".into(),
            capacity: 2,
            occupied: 0,
            block: None,
            floor: None,
            condition: None,
            amenities: vec![],
            gender_policy: GenderPolicy::Female,
            created_at: now,
            updated_at: now,
        };
        let female_app = Application {
            id: "a2".into(),
            student_id: "s2".into(),
            semester: "2024-S1".into(),
            preferences: vec![],
            gender: Some(Gender::Female),
            status: ApplicationStatus::Approved,
            submitted_at: now,
            review: None,
            room_id: None,
        };
        store
            .apply(
                WriteBatch::new()
                    .insert_room(female_only)
                    .insert_application(female_app),
            )
            .await
            .unwrap();

        // a1 has no recorded gender
        let err = coordinator
            .allocate_room("a1", "r2", details())
            .await
            .unwrap_err();
        match err {
            Error::InvalidState { reason, .. } => assert!(reason.contains("gender mismatch")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.get_room("r2").await.unwrap().unwrap().occupied, 0);

        coordinator
            .allocate_room("a2", "r2", AllocationDetails::default())
            .await
            .unwrap();
        assert_eq!(store.get_room("r2").await.unwrap().unwrap().occupied, 1);
    }
}
