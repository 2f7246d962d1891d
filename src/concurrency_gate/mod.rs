//! ConcurrencyGate - Process-Wide Inference Permit Pool
//!
//! ## Responsibilities
//!
//! - Cap simultaneous detector calls across all sources
//! - Suspend (never block) callers while the pool is saturated
//! - Release permits on every exit path, including cancellation
//!
//! Independent of per-breaker state: the gate protects the detector's own
//! concurrency limits even while its breaker is closed.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting permit pool over a tokio semaphore
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    /// Create gate with a fixed permit count
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            capacity: permits,
        }
    }

    /// Acquire a permit, waiting until one is free.
    ///
    /// The returned permit releases on drop, so an abandoned call can never
    /// leak pool capacity.
    pub async fn acquire(&self) -> InferencePermit {
        // acquire_owned only fails if the semaphore is closed, which we never do
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("inference gate semaphore closed");
        tracing::trace!(available = self.semaphore.available_permits(), "Inference permit acquired");
        InferencePermit { _permit: permit }
    }

    /// Acquire without waiting; None while the pool is saturated
    pub fn try_acquire(&self) -> Option<InferencePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| InferencePermit { _permit: permit })
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total pool size
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Inference permit - released automatically on drop
pub struct InferencePermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_release() {
        let gate = ConcurrencyGate::new(2);
        assert_eq!(gate.available(), 2);

        let permit = gate.acquire().await;
        assert_eq!(gate.available(), 1);

        drop(permit);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn test_try_acquire_saturated() {
        let gate = ConcurrencyGate::new(1);
        let _held = gate.acquire().await;
        assert!(gate.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_waiter_resumes_after_release() {
        let gate = Arc::new(ConcurrencyGate::new(1));
        let held = gate.acquire().await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = gate.acquire().await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaks_nothing() {
        let gate = Arc::new(ConcurrencyGate::new(1));
        let held = gate.acquire().await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = gate.acquire().await;
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            })
        };
        tokio::task::yield_now().await;

        waiter.abort();
        let _ = waiter.await;

        drop(held);
        assert_eq!(gate.available(), 1);
    }
}
