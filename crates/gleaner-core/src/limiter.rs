//! Bounded-capacity gate for in-flight backend calls.
//!
//! One limiter is owned per orchestrator instance and shared by every
//! extraction request it serves. Permits release on drop, so no exit path
//! (error, timeout, cancellation) can leak capacity.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A counting gate: at most `capacity` permits outstanding at once.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// The right to have one in-flight backend call. Released on drop.
#[derive(Debug)]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Create a limiter with the given capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Acquire a permit, suspending until capacity is available.
    pub async fn acquire(&self) -> Permit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("limiter semaphore is never closed");
        Permit { _inner: permit }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_up_to_capacity_without_blocking() {
        let limiter = ConcurrencyLimiter::new(3);
        let p1 = limiter.acquire().await;
        let p2 = limiter.acquire().await;
        let p3 = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 3);
        assert_eq!(limiter.available(), 0);
        drop((p1, p2, p3));
        assert_eq!(limiter.available(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn over_capacity_caller_waits_for_release() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await;

        // The second acquire must not complete while the permit is held.
        let second = tokio::time::timeout(Duration::from_secs(5), limiter.acquire());
        assert!(second.await.is_err(), "acquire should still be waiting");

        drop(held);
        let permit = tokio::time::timeout(Duration::from_secs(1), limiter.acquire())
            .await
            .expect("acquire should complete after release");
        assert_eq!(limiter.in_flight(), 1);
        drop(permit);
    }

    #[tokio::test]
    async fn permit_released_on_drop_in_error_path() {
        let limiter = ConcurrencyLimiter::new(2);
        {
            let _p = limiter.acquire().await;
            assert_eq!(limiter.in_flight(), 1);
            // Simulated early return: permit dropped with the scope.
        }
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped_to_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        let _p = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 1);
    }
}
