use super::*;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::thread::Thread;

// =============================================================================
// Promise State Cell
// =============================================================================
//
// Every promise handle points at one of these. The cell is the only shared
// mutable structure in the engine and guarantees:
//
// - Exactly-once settlement: the first `settle()` wins, every later call is a
//   no-op that reports `false`.
// - Every continuation runs exactly once, with the recorded outcome, whether
//   it was registered before or after settlement.
// - Continuations registered before settlement run in registration order, on
//   the settling thread, after the lock has been released.
//
// ## State Transitions
//
// ```text
//     ┌──────────┐  CAS   ┌──────────┐  store  ┌─────────────────────────────┐
//     │ Pending  │ ─────► │ Settling │ ──────► │ Resolved | Failed | Cancelled│
//     └──────────┘        └──────────┘         └─────────────────────────────┘
// ```
//
// The CAS elects the single settling thread. Registration and the hand-over
// of the continuation list are serialized by the slot lock, so a registration
// racing a settlement either lands in the list that is about to be drained or
// observes the recorded outcome and runs immediately.
//
// =============================================================================

#[repr(usize)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CellState {
    Pending = 0,
    Settling = 1,
    Resolved = 2,
    Failed = 3,
    Cancelled = 4,
}

impl CellState {
    #[inline]
    const fn from_usize(value: usize) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Settling,
            2 => Self::Resolved,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    #[inline]
    const fn as_usize(self) -> usize {
        self as usize
    }

    fn of<T>(outcome: &Result<T, Error>) -> Self {
        match outcome {
            Ok(_) => Self::Resolved,
            Err(Error::Cancelled) => Self::Cancelled,
            Err(_) => Self::Failed,
        }
    }

    pub(crate) fn is_settled(self) -> bool {
        !matches!(self, Self::Pending | Self::Settling)
    }
}

pub(crate) type Continuation<T> = Box<dyn FnOnce(Result<T, Error>) + Send>;

enum Slot<T> {
    Pending(Vec<Continuation<T>>),
    Settled(Result<T, Error>),
}

/// Something whose pending computation can be asked to stop.
pub trait Cancellable: Send + Sync {
    /// Cancels if still pending; returns `true` if this call settled it.
    fn cancel(&self) -> bool;

    fn is_done(&self) -> bool;

    fn is_cancelled(&self) -> bool;
}

pub(crate) struct Cell<T> {
    state: AtomicUsize,
    slot: Mutex<Slot<T>>,
    // Upstream promises cancelled along with this one. Weak, so a derived
    // promise never keeps an abandoned computation alive.
    upstream: Mutex<Vec<Weak<dyn Cancellable>>>,
    // Threads blocked in a wait, unparked once the final state is published.
    waiters: Mutex<Vec<Thread>>,
}

impl<T> Cell<T> {
    #[inline]
    pub(crate) fn state(&self) -> CellState {
        CellState::from_usize(self.state.load(Ordering::Acquire))
    }

    /// Registers the calling thread to be unparked on settlement.
    pub(crate) fn add_waiter(&self) {
        self.waiters.lock().push(std::thread::current());
    }

    pub(crate) fn remove_waiter(&self) {
        let id = std::thread::current().id();
        let mut waiters = self.waiters.lock();
        if let Some(index) = waiters.iter().position(|waiter| waiter.id() == id) {
            waiters.swap_remove(index);
        }
    }

    #[cfg(test)]
    pub(crate) fn registered(&self) -> (usize, usize) {
        let continuations = match &*self.slot.lock() {
            Slot::Pending(continuations) => continuations.len(),
            Slot::Settled(_) => 0,
        };
        (continuations, self.waiters.lock().len())
    }
}

impl<T: Clone + Send + 'static> Cell<T> {
    pub(crate) fn new(upstream: Vec<Weak<dyn Cancellable>>) -> Self {
        Self {
            state: AtomicUsize::new(CellState::Pending.as_usize()),
            slot: Mutex::new(Slot::Pending(Vec::new())),
            upstream: Mutex::new(upstream),
            waiters: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn settled(outcome: Result<T, Error>) -> Self {
        Self {
            state: AtomicUsize::new(CellState::of(&outcome).as_usize()),
            slot: Mutex::new(Slot::Settled(outcome)),
            upstream: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Attempts the Pending → settled transition.
    pub(crate) fn settle(&self, outcome: Result<T, Error>) -> bool {
        self.transition(outcome).is_some()
    }

    // Returns the upstream list on success so `cancel` can walk it.
    fn transition(&self, outcome: Result<T, Error>) -> Option<Vec<Weak<dyn Cancellable>>> {
        if self
            .state
            .compare_exchange(
                CellState::Pending.as_usize(),
                CellState::Settling.as_usize(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            trace!("Settlement ignored, promise already settled");
            return None;
        }

        let next = CellState::of(&outcome);
        let continuations = {
            let mut slot = self.slot.lock();
            match core::mem::replace(&mut *slot, Slot::Settled(outcome.clone())) {
                Slot::Pending(continuations) => continuations,
                Slot::Settled(_) => Vec::new(),
            }
        };
        self.state.store(next.as_usize(), Ordering::Release);

        let upstream = core::mem::take(&mut *self.upstream.lock());
        for waiter in core::mem::take(&mut *self.waiters.lock()) {
            waiter.unpark();
        }

        for continuation in continuations {
            continuation(outcome.clone());
        }
        Some(upstream)
    }

    /// Registers `continuation`, running it right away if already settled.
    pub(crate) fn subscribe(&self, continuation: Continuation<T>) {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Pending(continuations) => continuations.push(continuation),
            Slot::Settled(outcome) => {
                let outcome = outcome.clone();
                drop(slot);
                continuation(outcome);
            }
        }
    }

    /// The recorded outcome, if settled.
    pub(crate) fn outcome(&self) -> Option<Result<T, Error>> {
        match &*self.slot.lock() {
            Slot::Pending(_) => None,
            Slot::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// Records an extra upstream edge. If this cell is already settled, the
    /// edge is dropped, or walked immediately when the cell was cancelled.
    pub(crate) fn enlist(&self, upstream: Weak<dyn Cancellable>) {
        {
            // `transition` takes the list only after publishing the final
            // state, so an edge pushed while Settling is still walked.
            let mut list = self.upstream.lock();
            if !self.state().is_settled() {
                list.push(upstream);
                return;
            }
        }
        if self.state() == CellState::Cancelled {
            if let Some(upstream) = upstream.upgrade() {
                upstream.cancel();
            }
        }
    }
}

impl<T: Clone + Send + 'static> Cancellable for Cell<T> {
    fn cancel(&self) -> bool {
        let Some(upstream) = self.transition(Err(Error::Cancelled)) else {
            return false;
        };
        for origin in upstream.iter().filter_map(Weak::upgrade) {
            if origin.cancel() {
                trace!("Cancellation propagated upstream");
            }
        }
        true
    }

    fn is_done(&self) -> bool {
        self.state().is_settled()
    }

    fn is_cancelled(&self) -> bool {
        self.state() == CellState::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Continuation<u32>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let make = move |tag: u32| -> Continuation<u32> {
            let sink = sink.clone();
            Box::new(move |outcome: Result<u32, Error>| {
                sink.lock().push(tag * 100 + outcome.unwrap_or(0));
            })
        };
        (seen, make)
    }

    #[test]
    fn first_settlement_wins() {
        let cell = Cell::<u32>::new(Vec::new());
        assert!(cell.settle(Ok(1)));
        assert!(!cell.settle(Ok(2)));
        assert!(!cell.cancel());
        assert_eq!(cell.outcome().unwrap().unwrap(), 1);
        assert_eq!(cell.state(), CellState::Resolved);
    }

    #[test]
    fn continuations_run_in_registration_order() {
        let cell = Cell::<u32>::new(Vec::new());
        let (seen, make) = recorder();
        cell.subscribe(make(1));
        cell.subscribe(make(2));
        cell.subscribe(make(3));
        assert!(seen.lock().is_empty());

        cell.settle(Ok(7));
        assert_eq!(*seen.lock(), [107, 207, 307]);
    }

    #[test]
    fn late_subscriber_runs_immediately() {
        let cell = Cell::<u32>::new(Vec::new());
        cell.settle(Ok(5));
        let (seen, make) = recorder();
        cell.subscribe(make(4));
        assert_eq!(*seen.lock(), [405]);
    }

    #[test]
    fn cancel_walks_upstream_once() {
        let upstream = Arc::new(Cell::<u32>::new(Vec::new()));
        let weak: Weak<dyn Cancellable> = Arc::downgrade(&upstream) as Weak<dyn Cancellable>;
        let cell = Cell::<u32>::new(vec![weak]);

        assert!(cell.cancel());
        assert!(upstream.is_cancelled());
        assert!(cell.is_cancelled());
        assert!(!cell.cancel());
    }

    #[test]
    fn cancel_stops_at_settled_upstream() {
        let upstream = Arc::new(Cell::<u32>::new(Vec::new()));
        upstream.settle(Ok(3));
        let cell = Cell::<u32>::new(vec![Arc::downgrade(&upstream) as Weak<dyn Cancellable>]);

        assert!(cell.cancel());
        assert_eq!(upstream.state(), CellState::Resolved);
    }

    #[test]
    fn enlist_after_cancel_cancels_immediately() {
        let cell = Cell::<u32>::new(Vec::new());
        cell.cancel();
        let late = Arc::new(Cell::<u32>::new(Vec::new()));
        cell.enlist(Arc::downgrade(&late) as Weak<dyn Cancellable>);
        assert!(late.is_cancelled());
    }

    #[test]
    fn settlement_releases_waiters() {
        let cell = Cell::<u32>::new(Vec::new());
        cell.add_waiter();
        assert_eq!(cell.registered(), (0, 1));
        cell.settle(Ok(1));
        assert_eq!(cell.registered(), (0, 0));
    }

    #[test]
    fn remove_waiter_only_drops_own_thread() {
        let cell = Arc::new(Cell::<u32>::new(Vec::new()));
        let other = cell.clone();
        std::thread::spawn(move || other.add_waiter())
            .join()
            .unwrap();
        cell.add_waiter();
        cell.remove_waiter();
        cell.remove_waiter();
        assert_eq!(cell.registered(), (0, 1));
    }

    #[test]
    fn concurrent_settlement_has_one_winner() {
        for _ in 0..200 {
            let cell = Arc::new(Cell::<u32>::new(Vec::new()));
            let runs = Arc::new(AtomicUsize::new(0));
            let winners = Arc::new(AtomicUsize::new(0));

            let threads: Vec<_> = (0..8u32)
                .map(|i| {
                    let cell = cell.clone();
                    let runs = runs.clone();
                    let winners = winners.clone();
                    std::thread::spawn(move || {
                        let runs = runs.clone();
                        cell.subscribe(Box::new(move |_| {
                            runs.fetch_add(1, Ordering::SeqCst);
                        }));
                        let won = if i % 3 == 0 {
                            cell.cancel()
                        } else {
                            cell.settle(Ok(i))
                        };
                        if won {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }

            assert_eq!(winners.load(Ordering::SeqCst), 1);
            assert_eq!(runs.load(Ordering::SeqCst), 8);
            assert!(cell.is_done());
        }
    }
}
