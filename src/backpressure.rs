//! Bounded accounting for frames queued towards one socket.
//!
//! Every connection's writer owns a [`BackpressureController`]. A slot is
//! reserved before a frame enters the outbound channel and released once
//! the writer task has flushed it, so a slow reader cannot make the server
//! buffer unbounded responses and pushes on its behalf.
//!
//! - Responses wait for a slot, up to the controller's timeout.
//! - Pushes to other connections only try once; on failure the caller falls
//!   back to the recipient's offline backlog.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{RelayError, Result};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Default time a response may wait for a free slot.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between backpressure checks.
const CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// Lock-free pending-frame counter shared by a writer handle and its task.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl BackpressureController {
    pub fn new(max_pending: usize) -> Self {
        Self::with_timeout(max_pending, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(max_pending: usize, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending,
            timeout,
        }
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Reserve a slot without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` if the queue is at capacity.
    pub fn try_reserve(&self) -> Result<()> {
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            if current >= self.max_pending {
                return Err(RelayError::BackpressureTimeout);
            }
            match self.pending.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Reserve a slot, waiting up to the configured timeout.
    pub async fn reserve(&self) -> Result<()> {
        if self.try_reserve().is_ok() {
            return Ok(());
        }

        let start = Instant::now();
        loop {
            tokio::time::sleep(CHECK_INTERVAL).await;

            if self.try_reserve().is_ok() {
                return Ok(());
            }
            if start.elapsed() > self.timeout {
                return Err(RelayError::BackpressureTimeout);
            }
        }
    }

    /// Release one slot.
    #[inline]
    pub fn release(&self) {
        self.pending.fetch_sub(1, Ordering::Release);
    }

    /// Release the slots of a whole written batch.
    #[inline]
    pub fn release_many(&self, count: usize) {
        self.pending.fetch_sub(count, Ordering::Release);
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_creation() {
        let ctrl = BackpressureController::new(100);
        assert_eq!(ctrl.max_pending, 100);
        assert_eq!(ctrl.pending_count(), 0);
    }

    #[test]
    fn test_try_reserve_at_capacity() {
        let ctrl = BackpressureController::new(5);

        for _ in 0..5 {
            ctrl.try_reserve().unwrap();
        }

        assert_eq!(ctrl.pending_count(), ctrl.max_pending);
        assert!(matches!(
            ctrl.try_reserve(),
            Err(RelayError::BackpressureTimeout)
        ));
        assert_eq!(ctrl.pending_count(), 5);
    }

    #[test]
    fn test_release_and_capacity() {
        let ctrl = BackpressureController::new(100);

        for _ in 0..50 {
            ctrl.try_reserve().unwrap();
        }
        assert_eq!(ctrl.pending_count(), 50);

        ctrl.release();
        ctrl.release_many(29);
        assert_eq!(ctrl.pending_count(), 20);
    }

    #[test]
    fn test_clone_shares_state() {
        let ctrl1 = BackpressureController::new(10);
        let ctrl2 = ctrl1.clone();

        ctrl1.try_reserve().unwrap();
        assert_eq!(ctrl2.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_reserve_timeout() {
        let ctrl = BackpressureController::with_timeout(1, Duration::from_millis(10));
        ctrl.try_reserve().unwrap();

        let start = Instant::now();
        let result = ctrl.reserve().await;

        assert!(matches!(result, Err(RelayError::BackpressureTimeout)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_reserve_wait_success() {
        let ctrl = BackpressureController::with_timeout(1, Duration::from_secs(1));
        ctrl.try_reserve().unwrap();

        let ctrl_clone = ctrl.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctrl_clone.release();
        });

        assert!(ctrl.reserve().await.is_ok());
        assert_eq!(ctrl.pending_count(), 1);
    }
}
