//! Utility functions for roomalloc

use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generate a record identifier
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validate an externally supplied identifier (non-empty, reasonable length)
pub fn validate_id(field: &str, id: &str) -> crate::Result<()> {
    if id.trim().is_empty() {
        return Err(crate::Error::InvalidInput(format!(
            "{} cannot be empty",
            field
        )));
    }

    if id.len() > 256 {
        return Err(crate::Error::InvalidInput(format!(
            "{} too long (max 256 bytes)",
            field
        )));
    }

    if id.chars().any(|c| c.is_control() || c == '/') {
        return Err(crate::Error::InvalidInput(format!(
            "{} contains invalid characters",
            field
        )));
    }

    Ok(())
}

/// Exponential backoff schedule with full jitter
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    /// Upper bound of the sleep after `attempt` (1-based) failed
    pub fn ceiling(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        self.initial_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    fn jittered(&self, attempt: usize) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Retry with exponential backoff
///
/// Only errors reporting `is_retryable()` are retried; the last error is
/// returned unchanged once attempts run out.
pub async fn retry_with_backoff<F, Fut, T>(mut f: F, backoff: Backoff) -> crate::Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let max_attempts = backoff.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match f(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff.jittered(attempt);
                tracing::debug!(
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after conflict"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> Backoff {
        Backoff {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_generate_id() {
        let id1 = generate_id();
        let id2 = generate_id();
        assert_ne!(id1, id2);
        assert!(uuid::Uuid::parse_str(&id1).is_ok());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("room_id", "A-101").is_ok());
        assert!(validate_id("room_id", "").is_err());
        assert!(validate_id("room_id", "   ").is_err());
        assert!(validate_id("room_id", "a/b").is_err());
        assert!(validate_id("room_id", &"x".repeat(300)).is_err());
    }

    #[test]
    fn test_backoff_ceiling() {
        let b = Backoff {
            max_attempts: 10,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        assert_eq!(b.ceiling(1), Duration::from_millis(10));
        assert_eq!(b.ceiling(2), Duration::from_millis(20));
        assert_eq!(b.ceiling(3), Duration::from_millis(40));
        assert_eq!(b.ceiling(4), Duration::from_millis(50));
        assert_eq!(b.ceiling(40), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = retry_with_backoff(
            move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Conflict("busy".into()))
                } else {
                    Ok(7)
                }
            },
            fast(),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_surfaces_last_conflict() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: crate::Result<()> = retry_with_backoff(
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Conflict("busy".into()))
            },
            fast(),
        )
        .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_is_immediate() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: crate::Result<()> = retry_with_backoff(
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Full("r1".into()))
            },
            fast(),
        )
        .await;
        assert!(matches!(result, Err(Error::Full(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
