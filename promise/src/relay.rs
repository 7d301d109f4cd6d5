//! Carrying context values into continuations.
//!
//! A [`Relay`] snapshots a set of [`ContextSlot`]s once, when it is built.
//! Applied to a promise, it yields a handle to the same promise whose
//! continuations run with the snapshot installed, on whatever thread runs
//! them. The previous slot values are put back afterwards, even if the
//! continuation panics.
//!
//! ```
//! use std::cell::RefCell;
//! use tether_promise::{ContextVar, Promise, Relay};
//!
//! thread_local! {
//!     static REQUEST: RefCell<Option<u64>> = const { RefCell::new(None) };
//! }
//!
//! let request = ContextVar::from_thread_local("request", &REQUEST);
//! request.set(42);
//!
//! let source = Promise::<()>::new();
//! let relayed = Relay::capture(&[&request]).apply(&source);
//! let seen = relayed
//!     .dependent()
//!     .offload()
//!     .then_apply(move |()| REQUEST.with(|r| *r.borrow()));
//!
//! source.complete(());
//! assert_eq!(seen.get().unwrap(), Some(42));
//! ```

use super::*;
use crate::context::{Captured, ContextSlot, Restore};

/// An ordered snapshot of context slot values.
#[derive(Clone, Debug, Default)]
pub struct Relay {
    captured: Arc<[Captured]>,
}

impl Relay {
    /// Captures the current values of `slots` on the calling thread.
    pub fn capture(slots: &[&dyn ContextSlot]) -> Self {
        Self {
            captured: slots.iter().map(|slot| slot.capture()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.captured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }

    /// A handle to `promise` whose continuations run under this relay.
    pub fn apply<T: Clone + Send + 'static>(&self, promise: &Promise<T>) -> Promise<T> {
        promise.relay(self)
    }

    /// Runs `f` with the captured values installed.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = self.install();
        f()
    }

    /// This relay's slots followed by `other`'s.
    pub(crate) fn merged(&self, other: &Relay) -> Relay {
        Self {
            captured: self
                .captured
                .iter()
                .chain(other.captured.iter())
                .cloned()
                .collect(),
        }
    }

    fn install(&self) -> RelayScope {
        let mut restore = Vec::with_capacity(self.captured.len());
        for captured in self.captured.iter() {
            trace!(slot = captured.slot_name(), "Installing relayed context value");
            restore.push(captured.install());
        }
        RelayScope { restore }
    }
}

// Restores slots in reverse installation order when dropped.
struct RelayScope {
    restore: Vec<Restore>,
}

impl Drop for RelayScope {
    fn drop(&mut self) {
        while let Some(restore) = self.restore.pop() {
            restore.run();
        }
    }
}

/// Captures `slots` now and returns a transform applying the relay to any
/// promise later.
pub fn relay<T: Clone + Send + 'static>(
    slots: &[&dyn ContextSlot],
) -> impl Fn(&Promise<T>) -> Promise<T> + Send + Sync + use<T> {
    let relay = Relay::capture(slots);
    move |promise| relay.apply(promise)
}
