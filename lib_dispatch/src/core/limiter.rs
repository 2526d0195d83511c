//! # Outbound Request Limiter
//!
//! A counting permit pool shared by every availability check and dispatch
//! commit in a run, across all in-flight calls and requests. It keeps the
//! number of concurrent coordinator calls at a fixed ceiling.
//!
//! A permit is an RAII guard: it is released when dropped, so every exit
//! path of the guarded operation (success, error, early return) gives it
//! back. Acquisition races the run's cancellation token, so a cancelled
//! scan never stays parked waiting for a permit.
//!
//! In-flight and peak counters use `Ordering::Relaxed`; they are
//! diagnostics only and synchronize nothing else.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Fixed-size permit pool for outbound coordinator operations.
#[derive(Debug)]
pub struct RequestLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Proof of a held permit. Dropping it frees the slot.
#[derive(Debug)]
pub struct RequestPermit<'a> {
    _permit: OwnedSemaphorePermit,
    in_flight: &'a AtomicUsize,
}

impl Drop for RequestPermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl RequestLimiter {
    /// Creates a pool of `max_permits` permits. A zero count is raised to one.
    pub fn new(max_permits: usize) -> Self {
        let max_permits = max_permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Waits for a permit, or returns `None` once `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<RequestPermit<'_>> {
        if cancel.is_cancelled() {
            return None;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok()?,
        };

        Some(self.track(permit))
    }

    #[cfg(test)]
    fn try_acquire(&self) -> Option<RequestPermit<'_>> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.track(permit))
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> RequestPermit<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::Relaxed);
        RequestPermit { _permit: permit, in_flight: &self.in_flight }
    }

    /// Pool size.
    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Highest number of permits held at once so far.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_are_released_on_drop() {
        let limiter = RequestLimiter::new(2);
        let cancel = CancellationToken::new();

        let first = limiter.acquire(&cancel).await.unwrap();
        let second = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(limiter.in_flight(), 2);
        assert!(limiter.try_acquire().is_none());

        drop(first);
        assert_eq!(limiter.in_flight(), 1);
        assert!(limiter.try_acquire().is_some());

        drop(second);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_waiting_acquire() {
        let limiter = Arc::new(RequestLimiter::new(1));
        let cancel = CancellationToken::new();
        let _held = limiter.try_acquire().unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await.is_none() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_token_never_acquires() {
        let limiter = RequestLimiter::new(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(limiter.acquire(&cancel).await.is_none());
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn zero_permits_is_raised_to_one() {
        assert_eq!(RequestLimiter::new(0).max_permits(), 1);
    }
}
