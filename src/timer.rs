//! Deferred one-shot callbacks and the per-connection timeout guard
//!
//! [`schedule`] is the timer primitive: run a callback after a duration
//! unless the returned token cancels it first. [`TimeoutGuard`] wraps it
//! with the arm/disarm lifecycle a pooled connection needs: armed only
//! while a request is outstanding, disarmed on any terminal event,
//! idempotent disarm.

use std::time::Duration;
use tokio::sync::oneshot;
use tracing::trace;

/// Cancellation token for a scheduled callback
///
/// Dropping the token without calling [`CancelToken::cancel`] lets the
/// callback fire.
#[derive(Debug)]
pub struct CancelToken {
    cancel: Option<oneshot::Sender<()>>,
}

impl CancelToken {
    /// Cancel the pending callback if it has not fired yet
    ///
    /// Cancelling after the callback fired is a no-op.
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

/// Schedule `callback` to run once after `duration`
///
/// The callback runs on a spawned task; use the returned token to cancel.
pub fn schedule<F>(duration: Duration, callback: F) -> CancelToken
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(duration) => callback(),
            _ = rx => trace!("Scheduled callback cancelled"),
        }
    });
    CancelToken { cancel: Some(tx) }
}

/// Per-connection request timeout
///
/// Enabled only while a request is outstanding on the connection. The
/// armed callback races the response assembler for the request's completion
/// slot; firing after the slot is already resolved must be a no-op, which
/// the callback guarantees by claiming the slot before acting (see
/// `assembler`).
#[derive(Debug, Default)]
pub struct TimeoutGuard {
    token: Option<CancelToken>,
}

impl TimeoutGuard {
    /// Create a disarmed guard
    #[must_use]
    pub fn new() -> Self {
        Self { token: None }
    }

    /// Arm the guard for `duration`, unless the duration is zero
    ///
    /// A zero duration means the timeout is disabled for this request.
    pub fn enable<F>(&mut self, duration: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        debug_assert!(self.token.is_none(), "guard armed twice without disable");
        if duration.is_zero() {
            return;
        }
        self.token = Some(schedule(duration, on_fire));
    }

    /// Disarm the guard; idempotent, a no-op when nothing is armed
    pub fn disable(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    /// Whether the guard currently holds an armed timer
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_duration() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _token = schedule(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let token = schedule(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });

        token.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let token = schedule(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fired.load(Ordering::SeqCst));
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_zero_duration_never_arms() {
        let mut guard = TimeoutGuard::new();
        guard.enable(Duration::ZERO, || panic!("must not fire"));
        assert!(!guard.is_armed());

        tokio::time::sleep(Duration::from_secs(3600)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_disable_idempotent() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let mut guard = TimeoutGuard::new();
        guard.enable(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(guard.is_armed());

        guard.disable();
        assert!(!guard.is_armed());
        guard.disable(); // Repeated disable with nothing armed
        guard.disable();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_fires_when_not_disabled() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let mut guard = TimeoutGuard::new();
        guard.enable(Duration::from_millis(30), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
