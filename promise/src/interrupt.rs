//! Interruption of threads blocked on a promise.
//!
//! A blocking [`Promise::get`](crate::Promise::get) parks the calling thread.
//! Another thread holding that thread's [`Interrupter`] can wake it early;
//! the wait then fails with [`Error::Interrupted`](crate::Error::Interrupted)
//! and the interrupt flag is cleared.
//!
//! ```
//! use tether_promise::{Error, Promise, interrupt::Interrupter};
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! let waiter = std::thread::spawn(move || {
//!     tx.send(Interrupter::current()).unwrap();
//!     Promise::<u32>::new().get()
//! });
//!
//! rx.recv().unwrap().interrupt();
//! assert!(matches!(waiter.join().unwrap(), Err(Error::Interrupted)));
//! ```

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::Thread;

std::thread_local! {
    static FLAG: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

/// A handle that can interrupt one particular thread.
#[derive(Clone, Debug)]
pub struct Interrupter {
    flag: Arc<AtomicBool>,
    thread: Thread,
}

impl Interrupter {
    /// Handle for the calling thread.
    pub fn current() -> Self {
        Self {
            flag: FLAG.with(Arc::clone),
            thread: std::thread::current(),
        }
    }

    /// Sets the thread's interrupt flag and wakes it if parked.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
        self.thread.unpark();
    }

    /// Whether the flag is set, without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Tests and clears the calling thread's interrupt flag.
pub fn interrupted() -> bool {
    FLAG.with(|flag| flag.swap(false, Ordering::AcqRel))
}
