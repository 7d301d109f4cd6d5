use super::*;
use crate::cell::{Cell, CellState};
use crate::dependent::{CancelPolicy, Dependent, Dispatch, Origin};
use core::time::Duration;
use std::time::Instant;

/// A single-assignment handle to an eventual `Result<T, Error>`.
///
/// Cloning a `Promise` clones the handle, not the outcome: all clones observe
/// and settle the same state cell. Every promise remembers the executor used
/// for offloaded continuations and, if it was relayed, the context values to
/// install around them; both are inherited by promises derived from it.
///
/// # Example
///
/// ```
/// use tether_promise::Promise;
///
/// let promise = Promise::<u32>::new();
/// let doubled = promise.then_apply(|v| v * 2);
///
/// assert!(promise.complete(21));
/// assert!(!promise.complete(0));
/// assert_eq!(doubled.get().unwrap(), 42);
/// ```
pub struct Promise<T> {
    pub(crate) cell: Arc<Cell<T>>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) relay: Option<Relay>,
    origin: Origin,
    policy: CancelPolicy,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            executor: self.executor.clone(),
            relay: self.relay.clone(),
            origin: self.origin,
            policy: self.policy,
        }
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// A pending promise using the default executor.
    pub fn new() -> Self {
        Self::with_executor(default_executor())
    }

    /// A pending promise whose offloaded continuations run on `executor`.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self::from_cell(Cell::new(Vec::new()), executor)
    }

    /// An already resolved promise.
    pub fn resolved(value: T) -> Self {
        Self::from_cell(Cell::settled(Ok(value)), default_executor())
    }

    /// An already failed promise.
    pub fn failed(error: Error) -> Self {
        Self::from_cell(Cell::settled(Err(error)), default_executor())
    }

    /// Runs `f` on the default executor and resolves with its result.
    pub fn supply_async<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::supply_on(default_executor(), f)
    }

    /// Runs `f` on `executor` and resolves with its result.
    ///
    /// If the promise is cancelled before the executor gets to it, `f` never
    /// runs.
    pub fn supply_on<F>(executor: Arc<dyn Executor>, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let promise = Self::with_executor(executor.clone());
        let target = promise.clone();
        executor.submit(Box::new(move || {
            if !target.is_done() {
                target.settle(guarded(f));
            }
        }));
        promise
    }

    fn from_cell(cell: Cell<T>, executor: Arc<dyn Executor>) -> Self {
        Self {
            cell: Arc::new(cell),
            executor,
            relay: None,
            origin: Origin::NONE,
            policy: CancelPolicy::None,
        }
    }

    /// A pending promise that cancels `upstream` when cancelled itself.
    pub(crate) fn pending_with(
        executor: Arc<dyn Executor>,
        upstream: Vec<Weak<dyn Cancellable>>,
    ) -> Self {
        Self::from_cell(Cell::new(upstream), executor)
    }

    /// A pending promise derived from `self`: same executor, same relay.
    pub(crate) fn derive<U: Clone + Send + 'static>(
        &self,
        origin: Origin,
        policy: CancelPolicy,
        upstream: Vec<Weak<dyn Cancellable>>,
    ) -> Promise<U> {
        Promise {
            cell: Arc::new(Cell::new(upstream)),
            executor: self.executor.clone(),
            relay: self.relay.clone(),
            origin,
            policy,
        }
    }

    /// Resolves the promise. Returns `false` if it was already settled.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Fails the promise. Returns `false` if it was already settled.
    pub fn fail(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    /// Cancels the promise and, if this call settled it, the upstream
    /// promises selected by its cancel policy.
    pub fn cancel(&self) -> bool {
        self.cell.cancel()
    }

    pub(crate) fn settle(&self, outcome: Result<T, Error>) -> bool {
        self.cell.settle(outcome)
    }

    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cell.is_cancelled()
    }

    /// The recorded outcome, without blocking.
    pub fn outcome(&self) -> Option<Result<T, Error>> {
        self.cell.outcome()
    }

    /// Blocks the calling thread until the promise settles.
    ///
    /// Fails with [`Error::Interrupted`] if the thread is interrupted while
    /// waiting (see [`interrupt`](crate::interrupt)).
    pub fn get(&self) -> Result<T, Error> {
        self.wait(None)
    }

    /// Like [`get`](Promise::get), but gives up with [`Error::WaitElapsed`]
    /// after `bound`.
    pub fn get_timeout(&self, bound: Duration) -> Result<T, Error> {
        self.wait(Some(bound))
    }

    /// The outcome if settled, else `fallback`.
    pub fn get_now(&self, fallback: T) -> Result<T, Error> {
        self.get_now_with(|| fallback)
    }

    pub fn get_now_with<F: FnOnce() -> T>(&self, fallback: F) -> Result<T, Error> {
        self.outcome().unwrap_or_else(|| Ok(fallback()))
    }

    fn wait(&self, bound: Option<Duration>) -> Result<T, Error> {
        if let Some(outcome) = self.outcome() {
            return outcome;
        }
        if interrupt::interrupted() {
            return Err(Error::Interrupted);
        }

        let deadline = bound.map(|bound| (Instant::now() + bound, bound));
        self.cell.add_waiter();
        let _waiting = Waiting(&self.cell);

        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            if interrupt::interrupted() {
                return Err(Error::Interrupted);
            }
            match deadline {
                None => std::thread::park(),
                Some((deadline, bound)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::WaitElapsed(bound));
                    }
                    std::thread::park_timeout(deadline - now);
                }
            }
        }
    }

    /// The executor used for offloaded continuations.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Which operands this promise was derived from.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Which upstream promises a `cancel()` of this promise reaches.
    pub fn cancel_policy(&self) -> CancelPolicy {
        self.policy
    }

    /// Starts building a derived promise, choosing how its continuation is
    /// dispatched and which upstream promises it cancels.
    pub fn dependent(&self) -> Dependent<'_, T> {
        Dependent::new(self)
    }

    pub(crate) fn as_upstream(&self) -> Weak<dyn Cancellable> {
        let weak: Weak<Cell<T>> = Arc::downgrade(&self.cell);
        weak
    }

    /// Registers an inline continuation that ignores any relay.
    pub(crate) fn subscribe_raw<F>(&self, continuation: F)
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.cell.subscribe(Box::new(continuation));
    }

    /// Wraps `job` so that it runs under this handle's relay, on the
    /// executor selected by `dispatch`.
    pub(crate) fn schedule<A, F>(&self, dispatch: &Dispatch, job: F) -> Box<dyn FnOnce(A) + Send>
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        let relay = self.relay.clone();
        let job = move |arg: A| match relay {
            Some(relay) => relay.scope(|| job(arg)),
            None => job(arg),
        };
        match dispatch.executor(&self.executor) {
            None => Box::new(job),
            Some(executor) => Box::new(move |arg| executor.submit(Box::new(move || job(arg)))),
        }
    }

    /// Registers a user continuation dispatched per `dispatch`.
    pub(crate) fn on_settle<F>(&self, dispatch: &Dispatch, continuation: F)
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.cell.subscribe(self.schedule(dispatch, continuation));
    }

    /// Maps the value inline on the settling thread.
    pub fn then_apply<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.dependent().then_apply(f)
    }

    /// Maps the value inline, with a fallible function.
    pub fn then_try_apply<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        self.dependent().then_try_apply(f)
    }

    /// Maps the value on the default executor.
    pub fn then_apply_async<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.dependent().offload().then_apply(f)
    }

    /// Chains a computation that itself returns a promise.
    pub fn then_compose<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.dependent().then_compose(f)
    }

    /// Maps the full outcome, recovering from failures.
    pub fn handle<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T, Error>) -> U + Send + 'static,
    {
        self.dependent().handle(f)
    }

    /// Substitutes a value for a failure.
    pub fn exceptionally<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.dependent().exceptionally(f)
    }

    /// Observes the outcome without changing it.
    pub fn when_complete<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(&Result<T, Error>) + Send + 'static,
    {
        self.dependent().when_complete(f)
    }

    /// Runs `f` inline once both promises have resolved.
    pub fn run_after_both<U, F>(&self, other: &Promise<U>, f: F) -> Promise<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.dependent().run_after_both(other, f)
    }

    /// Runs `f` inline once either promise has resolved.
    pub fn run_after_either<U, F>(&self, other: &Promise<U>, f: F) -> Promise<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.dependent().run_after_either(other, f)
    }

    /// A handle to the same promise whose continuations run with `relay`'s
    /// captured context installed.
    pub fn relay(&self, relay: &Relay) -> Promise<T> {
        let mut relayed = self.clone();
        relayed.relay = Some(match &self.relay {
            Some(existing) => existing.merged(relay),
            None => relay.clone(),
        });
        relayed
    }
}

// Deregisters the waiting thread however the wait ends.
struct Waiting<'a, T>(&'a Cell<T>);

impl<T> Drop for Waiting<'_, T> {
    fn drop(&mut self) {
        self.0.remove_waiter();
    }
}

impl<T> core::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = match self.cell.state() {
            CellState::Pending | CellState::Settling => "pending",
            CellState::Resolved => "resolved",
            CellState::Failed => "failed",
            CellState::Cancelled => "cancelled",
        };
        f.debug_struct("Promise")
            .field("state", &state)
            .field("origin", &self.origin)
            .field("policy", &self.policy)
            .field("relayed", &self.relay.is_some())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Cancellable for Promise<T> {
    fn cancel(&self) -> bool {
        Promise::cancel(self)
    }

    fn is_done(&self) -> bool {
        Promise::is_done(self)
    }

    fn is_cancelled(&self) -> bool {
        Promise::is_cancelled(self)
    }
}
