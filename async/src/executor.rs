//! Execution resources for offloaded promise work.
//!
//! Promises do not schedule anything themselves: offloaded continuations are
//! handed to an [`Executor`] as a boxed closure. Anything that can run a
//! closure, now or later, on some thread, can be an executor.
//!
//! # Example
//!
//! ```no_run
//! use tether_async::executor::{self, Executor};
//!
//! executor::default_executor().submit(Box::new(|| println!("offloaded")));
//! ```

use alloc::sync::Arc;

/// A unit of work submitted to an [`Executor`].
pub type Work = alloc::boxed::Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a unit of work, possibly asynchronously.
///
/// Implementations must eventually run every submitted closure exactly once;
/// promises waiting on that work never settle otherwise.
pub trait Executor: Send + Sync {
    fn submit(&self, work: Work);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn submit(&self, work: Work) {
        (**self).submit(work)
    }
}

impl<E: Executor + ?Sized> Executor for &'static E {
    fn submit(&self, work: Work) {
        (**self).submit(work)
    }
}

/// Runs work immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Executor for Inline {
    fn submit(&self, work: Work) {
        work()
    }
}

#[cfg(feature = "tokio")]
impl Executor for tokio::runtime::Handle {
    fn submit(&self, work: Work) {
        self.spawn_blocking(work);
    }
}

/// The executor used when a promise is created without an explicit one: the
/// global [`TaskPool`](crate::TaskPool).
#[cfg(feature = "tokio")]
pub fn default_executor() -> Arc<dyn Executor> {
    use crate::sync::spin::Once;

    static DEFAULT: Once<Arc<dyn Executor>> = Once::new();
    DEFAULT
        .call_once(|| Arc::new(crate::TaskPool::global()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn inline_runs_on_caller() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let caller = std::thread::current().id();
        Inline.submit(Box::new(move || {
            assert_eq!(std::thread::current().id(), caller);
            flag.store(true, Ordering::SeqCst);
        }));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn default_executor_is_shared() {
        let a = default_executor();
        let b = default_executor();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn default_executor_runs_work() {
        let (tx, rx) = std::sync::mpsc::channel();
        default_executor().submit(Box::new(move || {
            let _ = tx.send(std::thread::current().id());
        }));
        let worker = rx
            .recv_timeout(core::time::Duration::from_secs(5))
            .unwrap();
        assert_ne!(worker, std::thread::current().id());
    }
}
