//! Bounded semaphore with a cap on waiters.
//!
//! `tokio::sync::Semaphore` has no native "max waiters" concept or waiter
//! count, so this wraps it with an `AtomicUsize` counter: an `acquire` that
//! would push the waiter count over the configured maximum fails fast,
//! before ever calling into the underlying semaphore, instead of blocking
//! only to time out later.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The per-acquire timeout elapsed before a permit became available.
    TimedOut,
    /// The waiter count was already at the configured maximum.
    TooManyWaiters,
}

pub struct BoundedSemaphore {
    inner: Arc<Semaphore>,
    max_waiters: Option<usize>,
    waiters: AtomicUsize,
}

/// A held permit; dropping it releases the slot back to the semaphore.
pub struct Permit(#[allow(dead_code)] OwnedSemaphorePermit);

impl BoundedSemaphore {
    pub fn new(capacity: usize, max_waiters: Option<usize>) -> Self {
        BoundedSemaphore {
            inner: Arc::new(Semaphore::new(capacity)),
            max_waiters,
            waiters: AtomicUsize::new(0),
        }
    }

    /// Blocks until a permit is available or `timeout` elapses. A `None`
    /// timeout waits indefinitely (modulo the waiters cap).
    ///
    /// An immediately-available permit is taken via a non-blocking
    /// fast path that never touches the waiter count — spec §4.5 scopes
    /// "waiters" to callers already blocked, so an `acquire` that never
    /// blocks must not count against `max_waiters`.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<Permit, AcquireError> {
        if let Ok(permit) = self.inner.clone().try_acquire_owned() {
            return Ok(Permit(permit));
        }

        if let Some(max) = self.max_waiters {
            let reserved = self.waiters.fetch_add(1, Ordering::SeqCst) + 1;
            if reserved > max {
                self.waiters.fetch_sub(1, Ordering::SeqCst);
                return Err(AcquireError::TooManyWaiters);
            }
        } else {
            self.waiters.fetch_add(1, Ordering::SeqCst);
        }

        let result = match timeout {
            Some(d) => tokio::time::timeout(d, self.inner.clone().acquire_owned())
                .await
                .map_err(|_| AcquireError::TimedOut)
                .and_then(|r| r.map_err(|_| AcquireError::TimedOut)),
            None => self
                .inner
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| AcquireError::TimedOut),
        };

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        result.map(Permit)
    }

    #[cfg(test)]
    fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_drop_returns_the_permit() {
        let sem = BoundedSemaphore::new(1, None);
        let permit = sem.acquire(None).await.unwrap();
        assert_eq!(sem.available_permits(), 0);
        drop(permit);
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn second_acquire_times_out_when_capacity_is_one() {
        let sem = BoundedSemaphore::new(1, None);
        let _held = sem.acquire(None).await.unwrap();
        let err = sem.acquire(Some(Duration::from_millis(20))).await.unwrap_err();
        assert_eq!(err, AcquireError::TimedOut);
    }

    #[tokio::test]
    async fn waiters_cap_fails_fast_without_waiting_for_the_timeout() {
        let sem = Arc::new(BoundedSemaphore::new(1, Some(1)));
        let _held = sem.acquire(None).await.unwrap();

        // One waiter is allowed to queue...
        let sem2 = sem.clone();
        let waiter = tokio::spawn(async move { sem2.acquire(Some(Duration::from_secs(5))).await });
        tokio::task::yield_now().await;

        // ...a second must fail immediately, not after any timeout.
        let start = tokio::time::Instant::now();
        let err = sem.acquire(Some(Duration::from_secs(5))).await.unwrap_err();
        assert_eq!(err, AcquireError::TooManyWaiters);
        assert!(start.elapsed() < Duration::from_millis(50));

        waiter.abort();
    }

    /// Regression: acquires that are satisfied immediately must not count
    /// against `max_waiters`, since no caller actually blocked.
    #[tokio::test]
    async fn immediately_satisfied_acquires_do_not_count_as_waiters() {
        let sem = BoundedSemaphore::new(1, Some(1));
        for _ in 0..5 {
            let permit = sem.acquire(Some(Duration::from_millis(50))).await.unwrap();
            drop(permit);
        }
    }

    #[tokio::test]
    async fn releasing_wakes_exactly_one_waiter() {
        let sem = Arc::new(BoundedSemaphore::new(1, None));
        let held = sem.acquire(None).await.unwrap();

        let sem2 = sem.clone();
        let waiter = tokio::spawn(async move { sem2.acquire(Some(Duration::from_secs(5))).await });
        tokio::task::yield_now().await;

        drop(held);
        let permit = waiter.await.unwrap().unwrap();
        assert_eq!(sem.available_permits(), 0);
        drop(permit);
        assert_eq!(sem.available_permits(), 1);
    }
}
