//! The combinator algebra over promises.
//!
//! Every combinator allocates a new promise, registers a continuation on its
//! operand(s) and records weak edges back to them. Which edges a `cancel()`
//! of the derived promise follows is its [`CancelPolicy`]; where the user
//! function runs is its [`Dispatch`].
//!
//! ```
//! use tether_promise::{CancelPolicy, Promise};
//!
//! let source = Promise::<u32>::new();
//! let other = Promise::<u32>::new();
//!
//! let sum = source
//!     .dependent()
//!     .with_policy(CancelPolicy::SourceOnly)
//!     .then_combine(&other, |a, b| a + b);
//!
//! sum.cancel();
//! assert!(source.is_cancelled());
//! assert!(!other.is_done());
//! ```

use super::*;
use core::fmt;

/// Which upstream promises a derived promise was built from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Origin {
    source: bool,
    param: bool,
}

impl Origin {
    pub const NONE: Self = Self {
        source: false,
        param: false,
    };
    pub const SOURCE: Self = Self {
        source: true,
        param: false,
    };
    pub const ALL: Self = Self {
        source: true,
        param: true,
    };

    pub fn has_source(self) -> bool {
        self.source
    }

    pub fn has_param(self) -> bool {
        self.param
    }
}

/// Which recorded upstream promises are cancelled along with a derived one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelPolicy {
    None,
    SourceOnly,
    ParamOnly,
    All,
}

impl CancelPolicy {
    pub fn cancels_source(self) -> bool {
        matches!(self, Self::SourceOnly | Self::All)
    }

    pub fn cancels_param(self) -> bool {
        matches!(self, Self::ParamOnly | Self::All)
    }
}

/// Where a combinator's function runs.
#[derive(Clone, Default)]
pub enum Dispatch {
    /// On the thread that settles the operand, or on the registering thread
    /// if the operand is already settled.
    #[default]
    Inline,
    /// On the source promise's executor.
    Default,
    /// On the given executor.
    On(Arc<dyn Executor>),
}

impl Dispatch {
    pub(crate) fn executor(&self, default: &Arc<dyn Executor>) -> Option<Arc<dyn Executor>> {
        match self {
            Self::Inline => None,
            Self::Default => Some(default.clone()),
            Self::On(executor) => Some(executor.clone()),
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("Inline"),
            Self::Default => f.write_str("Default"),
            Self::On(_) => f.write_str("On(..)"),
        }
    }
}

/// Builder for a promise derived from `source`.
///
/// Defaults to inline dispatch and the combinator's own cancel policy.
#[derive(Debug)]
pub struct Dependent<'a, T> {
    source: &'a Promise<T>,
    dispatch: Dispatch,
    policy: Option<CancelPolicy>,
}

type Job<A> = Box<dyn FnOnce(A) + Send>;

impl<'a, T: Clone + Send + 'static> Dependent<'a, T> {
    pub(crate) fn new(source: &'a Promise<T>) -> Self {
        Self {
            source,
            dispatch: Dispatch::Inline,
            policy: None,
        }
    }

    /// Runs the function on the source's executor.
    pub fn offload(self) -> Self {
        self.dispatch(Dispatch::Default)
    }

    /// Runs the function on `executor`.
    pub fn offload_to(self, executor: Arc<dyn Executor>) -> Self {
        self.dispatch(Dispatch::On(executor))
    }

    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Overrides the combinator's default cancel policy.
    pub fn with_policy(mut self, policy: CancelPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    fn derive<U: Clone + Send + 'static>(
        &self,
        param: Option<Weak<dyn Cancellable>>,
        default: CancelPolicy,
    ) -> Promise<U> {
        let policy = self.policy.unwrap_or(default);
        let origin = if param.is_some() {
            Origin::ALL
        } else {
            Origin::SOURCE
        };

        let mut upstream = Vec::new();
        if policy.cancels_source() {
            upstream.push(self.source.as_upstream());
        }
        if let Some(param) = param.filter(|_| policy.cancels_param()) {
            upstream.push(param);
        }
        self.source.derive(origin, policy, upstream)
    }

    pub fn then_apply<U, F>(self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then_try_apply(move |value| Ok(f(value)))
    }

    pub fn then_try_apply<U, F>(self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        let result = self.derive::<U>(None, CancelPolicy::SourceOnly);
        let target = result.clone();
        self.source.on_settle(&self.dispatch, move |outcome| {
            if target.is_done() {
                return;
            }
            target.settle(outcome.and_then(|value| guarded(|| f(value)).and_then(|r| r)));
        });
        result
    }

    pub fn then_accept<F>(self, f: F) -> Promise<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.then_apply(f)
    }

    pub fn then_run<F>(self, f: F) -> Promise<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_apply(move |_| f())
    }

    /// Chains a function returning another promise; the result adopts the
    /// nested promise's outcome.
    ///
    /// The nested promise becomes an upstream of the result, so cancelling
    /// the result cancels the nested computation too.
    pub fn then_compose<U, F>(self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let result = self.derive::<U>(None, CancelPolicy::SourceOnly);
        let target = result.clone();
        self.source.on_settle(&self.dispatch, move |outcome| {
            if target.is_done() {
                return;
            }
            match outcome.and_then(|value| guarded(|| f(value))) {
                Ok(nested) => adopt(target, &nested),
                Err(e) => {
                    target.settle(Err(e));
                }
            }
        });
        result
    }

    pub fn handle<U, F>(self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T, Error>) -> U + Send + 'static,
    {
        let result = self.derive::<U>(None, CancelPolicy::SourceOnly);
        let target = result.clone();
        self.source.on_settle(&self.dispatch, move |outcome| {
            if !target.is_done() {
                target.settle(guarded(|| f(outcome)));
            }
        });
        result
    }

    pub fn exceptionally<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        let result = self.derive::<T>(None, CancelPolicy::SourceOnly);
        let target = result.clone();
        self.source.on_settle(&self.dispatch, move |outcome| {
            if !target.is_done() {
                target.settle(outcome.or_else(|e| guarded(|| f(e))));
            }
        });
        result
    }

    /// Runs `f` for its side effect; the result keeps the source outcome
    /// unless `f` panics on a successful source.
    pub fn when_complete<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(&Result<T, Error>) + Send + 'static,
    {
        let result = self.derive::<T>(None, CancelPolicy::SourceOnly);
        let target = result.clone();
        self.source.on_settle(&self.dispatch, move |outcome| {
            if target.is_done() {
                return;
            }
            let outcome = match (guarded(|| f(&outcome)), outcome) {
                (Err(panic), Ok(_)) => Err(panic),
                (_, outcome) => outcome,
            };
            target.settle(outcome);
        });
        result
    }

    /// Waits for both operands and applies `f` to their values.
    ///
    /// If both fail, the source's error wins.
    pub fn then_combine<U, V, F>(self, other: &Promise<U>, f: F) -> Promise<V>
    where
        U: Clone + Send + 'static,
        V: Clone + Send + 'static,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        let result = self.derive::<V>(Some(other.as_upstream()), CancelPolicy::All);
        let target = result.clone();
        let run = self.source.schedule(
            &self.dispatch,
            move |(left, right): (Result<T, Error>, Result<U, Error>)| {
                if target.is_done() {
                    return;
                }
                target.settle(left.and_then(|l| right.and_then(|r| guarded(|| f(l, r)))));
            },
        );

        let join = Arc::new(Mutex::new(Join {
            left: None,
            right: None,
            run: Some(run),
        }));
        let right = join.clone();
        self.source
            .subscribe_raw(move |outcome| Join::arrive(&*join, |j| j.left = Some(outcome)));
        other.subscribe_raw(move |outcome| Join::arrive(&*right, |j| j.right = Some(outcome)));
        result
    }

    pub fn then_accept_both<U, F>(self, other: &Promise<U>, f: F) -> Promise<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T, U) + Send + 'static,
    {
        self.then_combine(other, f)
    }

    /// Applies `f` to whichever operand settles first.
    ///
    /// The winner is claimed when it settles, before `f` is dispatched. When
    /// both are already settled the source wins.
    pub fn apply_to_either<U, F>(self, other: &Promise<T>, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let result = self.derive::<U>(Some(other.as_upstream()), CancelPolicy::All);
        let target = result.clone();
        let run = self
            .source
            .schedule(&self.dispatch, move |outcome: Result<T, Error>| {
                if !target.is_done() {
                    target.settle(outcome.and_then(|value| guarded(|| f(value))));
                }
            });

        let claim = Arc::new(Mutex::new(Some(run)));
        let rival = claim.clone();
        self.source.subscribe_raw(move |outcome| race(&*claim, outcome));
        other.subscribe_raw(move |outcome| race(&*rival, outcome));
        result
    }

    pub fn accept_either<F>(self, other: &Promise<T>, f: F) -> Promise<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.apply_to_either(other, f)
    }

    /// Runs `f` once both operands have resolved.
    pub fn run_after_both<U, F>(self, other: &Promise<U>, f: F) -> Promise<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.then_combine(other, move |_, _| f())
    }

    /// Runs `f` once either operand has resolved.
    ///
    /// The operands may carry different value types; only the first
    /// settlement matters. If it is a failure, `f` does not run and the
    /// result fails with it.
    pub fn run_after_either<U, F>(self, other: &Promise<U>, f: F) -> Promise<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let result = self.derive::<()>(Some(other.as_upstream()), CancelPolicy::All);
        let target = result.clone();
        let run = self
            .source
            .schedule(&self.dispatch, move |outcome: Result<(), Error>| {
                if !target.is_done() {
                    target.settle(outcome.and_then(|()| guarded(f)));
                }
            });

        let claim = Arc::new(Mutex::new(Some(run)));
        let rival = claim.clone();
        self.source
            .subscribe_raw(move |outcome: Result<T, Error>| race(&*claim, outcome.map(drop)));
        other.subscribe_raw(move |outcome: Result<U, Error>| race(&*rival, outcome.map(drop)));
        result
    }
}

// The joined continuation with both outcomes, once both have arrived.
type Ready<A, B> = (
    Job<(Result<A, Error>, Result<B, Error>)>,
    Result<A, Error>,
    Result<B, Error>,
);

struct Join<A, B> {
    left: Option<Result<A, Error>>,
    right: Option<Result<B, Error>>,
    run: Option<Job<(Result<A, Error>, Result<B, Error>)>>,
}

impl<A, B> Join<A, B> {
    fn arrive(join: &Mutex<Self>, record: impl FnOnce(&mut Self)) {
        let ready = {
            let mut join = join.lock();
            record(&mut join);
            join.ready()
        };
        if let Some((run, left, right)) = ready {
            run((left, right));
        }
    }

    fn ready(&mut self) -> Option<Ready<A, B>> {
        if self.left.is_none() || self.right.is_none() {
            return None;
        }
        Some((self.run.take()?, self.left.take()?, self.right.take()?))
    }
}

fn race<T>(claim: &Mutex<Option<Job<Result<T, Error>>>>, outcome: Result<T, Error>) {
    let run = claim.lock().take();
    match run {
        Some(run) => run(outcome),
        None => trace!("Race already decided, outcome discarded"),
    }
}

fn adopt<U: Clone + Send + 'static>(target: Promise<U>, nested: &Promise<U>) {
    // Walked immediately if `target` was cancelled in the meantime.
    target.cell.enlist(nested.as_upstream());
    let adoption = Adoption(Some(target));
    nested.subscribe_raw(move |outcome| adoption.settle(outcome));
}

// Settles the compose result with the nested outcome, or with
// `Error::Composition` if the nested promise is dropped unsettled.
struct Adoption<U: Clone + Send + 'static>(Option<Promise<U>>);

impl<U: Clone + Send + 'static> Adoption<U> {
    fn settle(mut self, outcome: Result<U, Error>) {
        if let Some(target) = self.0.take() {
            target.settle(outcome);
        }
    }
}

impl<U: Clone + Send + 'static> Drop for Adoption<U> {
    fn drop(&mut self) {
        if let Some(target) = self.0.take() {
            debug!("Nested promise dropped before settling");
            target.settle(Err(Error::Composition));
        }
    }
}
