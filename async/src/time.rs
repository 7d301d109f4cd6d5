//! Time utilities for runtime-agnostic async operations.
//!
//! Besides [`sleep`], this module owns the timer pool behind clock promises:
//! every [`schedule`]d callback is one tracked task, so [`pending`] reports
//! exactly how many timers are still alive.
//!
//! # Example
//!
//! ```no_run
//! use core::time::Duration;
//! use tether_async::time;
//!
//! let timer = time::schedule(Duration::from_secs(5), || println!("fired"));
//!
//! // Changed our mind: the callback never runs.
//! timer.cancel();
//! ```

use crate::join_handle::JoinHandle;
use crate::sync::spin::Once;
use crate::task_pool::TaskPool;
use core::time::Duration;
use tracing::debug;

/// Sleeps for the specified duration.
///
/// A zero duration still yields to the runtime once, it never completes
/// without a scheduling round trip.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
        return;
    }
    tokio::time::sleep(duration).await;
}

fn timers() -> &'static TaskPool {
    static TIMERS: Once<TaskPool> = Once::new();
    TIMERS.call_once(TaskPool::new)
}

/// Handle to a scheduled callback.
///
/// Dropping the handle does not cancel the timer.
#[derive(Debug)]
pub struct Timer {
    handle: JoinHandle<()>,
    delay: Duration,
}

impl Timer {
    /// Stops the timer if it has not fired yet.
    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            debug!(delay = ?self.delay, "Cancelling timer");
            self.handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Runs `callback` on the timer pool once `delay` has elapsed.
///
/// The callback always runs on a runtime thread, never inline, even for a
/// zero delay.
pub fn schedule<F>(delay: Duration, callback: F) -> Timer
where
    F: FnOnce() + Send + 'static,
{
    let handle = timers().spawn(async move {
        sleep(delay).await;
        debug!(?delay, "Timer fired");
        callback();
    });
    Timer { handle, delay }
}

/// Number of scheduled timers that have neither fired nor been cancelled.
pub fn pending() -> usize {
    timers().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[tokio::test]
    async fn test_sleep_zero_returns() {
        sleep(Duration::ZERO).await;
    }

    #[test]
    fn test_schedule_fires_after_delay() {
        let (tx, rx) = std::sync::mpsc::channel();
        let start = Instant::now();
        let timer = schedule(Duration::from_millis(50), move || {
            let _ = tx.send(Instant::now());
        });
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(50));
        assert!(wait_until(|| timer.is_finished()));
    }

    #[test]
    fn test_zero_delay_is_not_inline() {
        let caller = std::thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();
        schedule(Duration::ZERO, move || {
            let _ = tx.send(std::thread::current().id());
        });
        assert_ne!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), caller);
    }

    #[test]
    fn test_cancel_prevents_callback() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = schedule(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        });
        timer.cancel();
        assert!(wait_until(|| timer.is_finished()));
        std::thread::sleep(Duration::from_millis(150));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
