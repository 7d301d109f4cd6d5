//! Time-based promises and the timeout combinators built on them.
//!
//! A clock promise settles purely as a function of elapsed time. Each one
//! owns a single timer on the shared timer pool, and cancelling it before it
//! fires removes that timer without surfacing any error. The combinators in
//! this module always clean up the clock they race against, so a source that
//! wins leaves no timer behind.

use super::*;
use crate::dependent::CancelPolicy;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use tether_async::time;

/// A promise that fails with [`Error::Timeout`] after `duration`.
pub fn fail_after<T: Clone + Send + 'static>(duration: Duration) -> Promise<T> {
    clock(default_executor(), duration, move || {
        Err(Error::Timeout(duration))
    })
}

/// A promise that resolves with `value` after `duration`.
pub fn resolve_after<T: Clone + Send + 'static>(duration: Duration, value: T) -> Promise<T> {
    clock(default_executor(), duration, move || Ok(value))
}

/// A promise that resolves after `duration`.
pub fn delay_for(duration: Duration) -> Promise<()> {
    resolve_after(duration, ())
}

fn clock<T, F>(executor: Arc<dyn Executor>, duration: Duration, outcome: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    let promise = Promise::with_executor(executor);
    let fired = Arc::new(AtomicBool::new(false));

    let target = promise.clone();
    let firing = fired.clone();
    let timer = time::schedule(duration, move || {
        firing.store(true, Ordering::Release);
        target.settle(outcome());
    });

    promise.subscribe_raw(move |_| {
        if !fired.load(Ordering::Acquire) {
            timer.cancel();
        }
    });
    promise
}

#[derive(Clone)]
enum Race<T> {
    Value(T),
    Fallback,
}

// Run once a timeout race has settled: a clock still pending lost and is
// cancelled; a clock that won may take the source down with it.
fn clean_up<A, B>(source: &Promise<A>, clock: &Promise<B>, cancel_on_timeout: bool)
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    if !clock.is_done() {
        clock.cancel();
    } else if cancel_on_timeout && source.cancel() {
        debug!("Cancelled source after timeout");
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Fails with [`Error::Timeout`] if the promise does not settle within
    /// `duration`.
    ///
    /// With `cancel_on_timeout`, a timeout also cancels `self`. Cancelling
    /// the returned promise cancels both `self` and the clock.
    pub fn or_timeout(&self, duration: Duration, cancel_on_timeout: bool) -> Promise<T> {
        let timeout = clock(self.executor.clone(), duration, move || {
            Err(Error::Timeout(duration))
        });
        let result = self
            .dependent()
            .offload()
            .with_policy(CancelPolicy::All)
            .apply_to_either(&timeout, |value| value);

        let source = self.clone();
        result.subscribe_raw(move |_| clean_up(&source, &timeout, cancel_on_timeout));
        result
    }

    /// Resolves with `value` if the promise does not settle within `duration`.
    pub fn on_timeout(&self, value: T, duration: Duration, cancel_on_timeout: bool) -> Promise<T> {
        self.on_timeout_with(move || value, duration, cancel_on_timeout)
    }

    /// Like [`on_timeout`](Promise::on_timeout), but only calls `fallback`
    /// when the clock wins.
    pub fn on_timeout_with<F>(
        &self,
        fallback: F,
        duration: Duration,
        cancel_on_timeout: bool,
    ) -> Promise<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let timeout = clock(self.executor.clone(), duration, || Ok(()))
            .then_apply(|()| Race::<T>::Fallback);
        let value = self.then_apply(Race::Value);
        let result = value
            .dependent()
            .offload()
            .with_policy(CancelPolicy::All)
            .apply_to_either(&timeout, move |won| match won {
                Race::Value(value) => value,
                Race::Fallback => fallback(),
            });

        let source = self.clone();
        result.subscribe_raw(move |_| clean_up(&source, &timeout, cancel_on_timeout));
        result
    }

    /// Resolves with the promise's value no earlier than `duration` after it
    /// settled.
    ///
    /// Failures are delayed too if `delay_on_error`, otherwise they pass
    /// through immediately.
    pub fn delay(&self, duration: Duration, delay_on_error: bool) -> Promise<T> {
        let gate = Promise::<()>::with_executor(self.executor.clone());
        let opener = gate.clone();
        let executor = self.executor.clone();

        self.subscribe_raw(move |outcome| {
            if outcome.is_err() && !delay_on_error {
                opener.complete(());
                return;
            }
            let clock = clock(executor, duration, || Ok(()));
            let stop = clock.clone();
            opener.subscribe_raw(move |_| {
                stop.cancel();
            });
            clock.subscribe_raw(move |outcome| {
                opener.settle(outcome);
            });
        });

        self.dependent()
            .offload()
            .with_policy(CancelPolicy::ParamOnly)
            .then_combine(&gate, |value, ()| value)
    }
}
