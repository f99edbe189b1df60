//! Counting admission gate bounding the number of probes in flight.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::budget::ConcurrencyBudget;
use crate::error::ScanError;

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Hands out at most `capacity` permits at a time.
///
/// Cloning yields another handle onto the same gate.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl ConcurrencyLimiter {
    /// Builds a gate sized to `budget`.
    pub fn new(budget: ConcurrencyBudget) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(budget.get())),
            capacity: budget.get(),
            counters: Arc::default(),
        }
    }

    /// Waits until a permit is free.
    ///
    /// Fails with [`ScanError::PermitAcquisitionFailed`] once `cancel` fires
    /// or the gate has been closed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, ScanError> {
        if cancel.is_cancelled() {
            return Err(ScanError::PermitAcquisitionFailed);
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::PermitAcquisitionFailed),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| ScanError::PermitAcquisitionFailed)?
            }
        };

        let in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(in_flight, Ordering::SeqCst);

        Ok(Permit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Refuses every pending and future acquisition.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Total number of permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at once since the gate was built.
    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

/// One unit of concurrency capacity, returned to the gate on drop.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        // runs before the semaphore permit itself is released
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::ConcurrencyLimiter;
    use crate::budget::ConcurrencyBudget;
    use crate::error::ScanError;
    use std::time::Duration;
    use tokio::time;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn permits_are_returned_on_drop() {
        let limiter = ConcurrencyLimiter::new(ConcurrencyBudget::new(2));
        let cancel = CancellationToken::new();

        let first = limiter.acquire(&cancel).await.unwrap();
        let second = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(limiter.in_flight(), 2);

        drop(first);
        assert_eq!(limiter.in_flight(), 1);
        drop(second);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn acquire_waits_for_capacity() {
        let limiter = ConcurrencyLimiter::new(ConcurrencyBudget::new(1));
        let cancel = CancellationToken::new();

        let held = limiter.acquire(&cancel).await.unwrap();
        let blocked = time::timeout(Duration::from_millis(50), limiter.acquire(&cancel)).await;
        assert!(blocked.is_err());

        drop(held);
        let granted = time::timeout(Duration::from_millis(50), limiter.acquire(&cancel)).await;
        assert!(matches!(granted, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn cancellation_wakes_waiters() {
        let limiter = ConcurrencyLimiter::new(ConcurrencyBudget::new(1));
        let cancel = CancellationToken::new();
        let _held = limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ScanError::PermitAcquisitionFailed)));
    }

    #[tokio::test]
    async fn closed_gate_refuses_permits() {
        let limiter = ConcurrencyLimiter::new(ConcurrencyBudget::new(4));
        limiter.close();

        let result = limiter.acquire(&CancellationToken::new()).await;
        assert!(matches!(result, Err(ScanError::PermitAcquisitionFailed)));
        assert_eq!(limiter.in_flight(), 0);
    }
}
