//! Run-wide deadline
//!
//! A single `Deadline` is created when a worker starts coordinating and is
//! handed to every later step: rendezvous waits, bootstrap calls and each
//! backend operation. Exceeding it drops the in-flight future, which is the
//! only cancellation mechanism the scenario uses.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Returned when a future did not finish before the deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("context deadline exceeded")]
pub struct DeadlineExceeded;

/// Upper bound on any deadline (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now, capped at `FAR_FUTURE`
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout.min(FAR_FUTURE),
        }
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Drive `fut` to completion unless the deadline passes first
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, DeadlineExceeded>
    where
        F: Future,
    {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_before_deadline() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let out = deadline.run(async { 42 }).await;
        assert_eq!(out, Ok(42));
        assert!(!deadline.is_expired());
    }

    #[tokio::test]
    async fn test_run_fails_after_deadline() {
        let deadline = Deadline::after(Duration::from_millis(50));
        let out = deadline
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(out, Err(DeadlineExceeded));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_huge_timeout_saturates() {
        let deadline = Deadline::after(Duration::from_secs(u64::MAX));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(86400 * 365));
        assert!(deadline.remaining() <= FAR_FUTURE);
        assert_eq!(deadline.run(async { 7 }).await, Ok(7));
    }

    #[test]
    fn test_deadline_exceeded_message() {
        assert_eq!(DeadlineExceeded.to_string(), "context deadline exceeded");
    }
}
