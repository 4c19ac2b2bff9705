//! Application intake and review
//!
//! Status changes go through the same compare-and-swap commit as
//! allocation, so a review racing an allocation cannot both win.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::common::audit::{AuditEventType, AuditLogger};
use crate::common::config::AllocationPolicy;
use crate::common::utils::{generate_id, retry_with_backoff, validate_id, Backoff};
use crate::common::{Entity, Error, Result};
use crate::coordinator::events::{ChangeEvent, ChangeKind, EventBus};
use crate::coordinator::records::{Application, ApplicationStatus, Gender, Review};
use crate::coordinator::store::{Store, WriteBatch};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewApplication {
    pub student_id: String,
    pub semester: String,
    /// Preferred hostels or rooms, most wanted first
    #[serde(default)]
    pub preferences: Vec<String>,
    /// Checked against restricted hostels at allocation time
    #[serde(default)]
    pub gender: Option<Gender>,
}

pub struct ApplicationDesk {
    store: Arc<dyn Store>,
    events: EventBus,
    audit: Arc<AuditLogger>,
    backoff: Backoff,
}

impl ApplicationDesk {
    pub fn new(
        store: Arc<dyn Store>,
        events: EventBus,
        audit: Arc<AuditLogger>,
        policy: &AllocationPolicy,
    ) -> Self {
        Self {
            store,
            events,
            audit,
            backoff: Backoff {
                max_attempts: policy.max_attempts,
                initial_delay: policy.initial_backoff(),
                max_delay: policy.max_backoff(),
            },
        }
    }

    pub async fn submit_application(&self, new: NewApplication) -> Result<Application> {
        validate_id("student_id", &new.student_id)?;
        if new.semester.trim().is_empty() {
            return Err(Error::InvalidInput("semester cannot be empty".into()));
        }
        if new.semester.chars().any(char::is_control) {
            return Err(Error::InvalidInput("semester contains invalid characters".into()));
        }

        let application = Application {
            id: generate_id(),
            student_id: new.student_id,
            semester: new.semester,
            preferences: new.preferences,
            gender: new.gender,
            status: ApplicationStatus::Pending,
            submitted_at: Utc::now(),
            review: None,
            room_id: None,
        };
        self.store
            .apply(WriteBatch::new().insert_application(application.clone()))
            .await?;

        tracing::info!(
            application_id = %application.id,
            student_id = %application.student_id,
            semester = %application.semester,
            "application submitted"
        );
        self.audit.log_event(
            AuditEventType::ApplicationSubmitted,
            application.student_id.as_str(),
            Some(application.id.clone()),
            format!("application for {}", application.semester),
            None,
        );
        self.events.publish(
            ChangeEvent::new(ChangeKind::ApplicationSubmitted, application.id.as_str())
                .student(application.student_id.as_str()),
        );
        Ok(application)
    }

    pub async fn approve_application(&self, id: &str, reviewer: &str) -> Result<Application> {
        let application = self
            .review(id, reviewer, ApplicationStatus::Approved, None)
            .await?;
        self.audit.log_event(
            AuditEventType::ApplicationApproved,
            reviewer,
            Some(id.to_string()),
            format!("application of {} approved", application.student_id),
            None,
        );
        self.events.publish(
            ChangeEvent::new(ChangeKind::ApplicationApproved, id)
                .student(application.student_id.as_str()),
        );
        Ok(application)
    }

    pub async fn reject_application(
        &self,
        id: &str,
        reviewer: &str,
        reason: &str,
    ) -> Result<Application> {
        if reason.trim().is_empty() {
            return Err(Error::InvalidInput("rejection reason is required".into()));
        }
        let application = self
            .review(
                id,
                reviewer,
                ApplicationStatus::Rejected,
                Some(reason.trim().to_string()),
            )
            .await?;
        self.audit.log_event(
            AuditEventType::ApplicationRejected,
            reviewer,
            Some(id.to_string()),
            format!("application of {} rejected", application.student_id),
            Some(serde_json::json!({ "reason": reason.trim() })),
        );
        self.events.publish(
            ChangeEvent::new(ChangeKind::ApplicationRejected, id)
                .student(application.student_id.as_str()),
        );
        Ok(application)
    }

    async fn review(
        &self,
        id: &str,
        reviewer: &str,
        next: ApplicationStatus,
        rejection_reason: Option<String>,
    ) -> Result<Application> {
        validate_id("application_id", id)?;
        let reviewer = if reviewer.trim().is_empty() {
            "system"
        } else {
            reviewer
        };

        let application = retry_with_backoff(
            |_| self.try_review(id, reviewer, next, rejection_reason.clone()),
            self.backoff,
        )
        .await?;
        tracing::info!(application_id = id, status = %next, reviewer, "application reviewed");
        Ok(application)
    }

    async fn try_review(
        &self,
        id: &str,
        reviewer: &str,
        next: ApplicationStatus,
        rejection_reason: Option<String>,
    ) -> Result<Application> {
        let mut application = self.get_application(id).await?;
        if !application.status.can_transition_to(next, true) {
            return Err(Error::invalid_state(
                Entity::Application,
                id,
                format!("cannot move from {} to {}", application.status, next),
            ));
        }

        let review = Review {
            reviewed_by: reviewer.to_string(),
            reviewed_at: Utc::now(),
            rejection_reason,
        };
        self.store
            .set_application_status(id, application.status, next, Some(review.clone()))
            .await?;

        application.status = next;
        application.review = Some(review);
        Ok(application)
    }

    pub async fn get_application(&self, id: &str) -> Result<Application> {
        self.store
            .get_application(id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Application, id))
    }

    /// Newest first
    pub async fn list_applications(
        &self,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<Application>> {
        let mut applications: Vec<Application> = self
            .store
            .list_applications()
            .await?
            .into_iter()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .collect();
        applications.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(applications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::memory::MemStore;

    fn desk() -> ApplicationDesk {
        ApplicationDesk::new(
            Arc::new(MemStore::new()),
            EventBus::default(),
            Arc::new(AuditLogger::disabled()),
            &AllocationPolicy::default(),
        )
    }

    fn new_application(student: &str) -> NewApplication {
        NewApplication {
            student_id: student.to_string(),
            semester: "2024-S1".to_string(),
            preferences: vec!["north".to_string()],
            gender: None,
        }
    }

    #[tokio::test]
    async fn test_approve_then_reject_refused() {
        let desk = desk();
        let app = desk.submit_application(new_application("s1")).await.unwrap();
        assert_eq!(app.status, ApplicationStatus::Pending);

        let approved = desk.approve_application(&app.id, "warden").await.unwrap();
        assert_eq!(approved.status, ApplicationStatus::Approved);
        assert_eq!(approved.review.unwrap().reviewed_by, "warden");

        let err = desk
            .reject_application(&app.id, "warden", "late")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(
            desk.get_application(&app.id).await.unwrap().status,
            ApplicationStatus::Approved
        );
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let desk = desk();
        let app = desk.submit_application(new_application("s1")).await.unwrap();

        assert!(matches!(
            desk.reject_application(&app.id, "warden", "  ").await,
            Err(Error::InvalidInput(_))
        ));

        let rejected = desk
            .reject_application(&app.id, "warden", "incomplete documents")
            .await
            .unwrap();
        assert_eq!(rejected.status, ApplicationStatus::Rejected);
        assert_eq!(
            rejected.review.unwrap().rejection_reason.as_deref(),
            Some("incomplete documents")
        );
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let desk = desk();
        let a = desk.submit_application(new_application("s1")).await.unwrap();
        desk.submit_application(new_application("s2")).await.unwrap();
        desk.approve_application(&a.id, "warden").await.unwrap();

        assert_eq!(desk.list_applications(None).await.unwrap().len(), 2);
        let pending = desk
            .list_applications(Some(ApplicationStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].student_id, "s2");

        assert!(matches!(
            desk.approve_application("missing", "warden").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_keeps_gender_and_checks_semester() {
        let desk = desk();
        let app = desk
            .submit_application(NewApplication {
                gender: Some(Gender::Female),
                ..new_application("s1")
            })
            .await
            .unwrap();
        assert_eq!(
            desk.get_application(&app.id).await.unwrap().gender,
            Some(Gender::Female)
        );

        let err = desk
            .submit_application(NewApplication {
                semester: "2024\0S1".to_string(),
                ..new_application("s2")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
