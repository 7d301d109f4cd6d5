//! Value-shape adapters.

use super::*;
use core::num::NonZeroUsize;

impl<T: Clone + Send + 'static> Promise<T> {
    /// `Some(value)` on success, `None` on any failure.
    pub fn optional(&self) -> Promise<Option<T>> {
        self.handle(Result::ok)
    }

    /// A one-element vector on success, empty on any failure.
    pub fn to_vec(&self) -> Promise<Vec<T>> {
        self.handle(|outcome| outcome.into_iter().collect())
    }

    /// Wraps the value in an already resolved promise.
    pub fn lift(&self) -> Promise<Promise<T>> {
        self.then_apply(Promise::resolved)
    }
}

impl<T: Clone + Send + 'static> Promise<Promise<T>> {
    /// Adopts the outcome of the inner promise.
    pub fn flatten(&self) -> Promise<T> {
        self.then_compose(|inner| inner)
    }
}

/// A transform feeding a promised `Vec` through
/// [`partitioned`](crate::partition::partitioned).
pub fn partitioned_items<T, R, A, S, F>(
    batch_size: NonZeroUsize,
    spawner: S,
    init: A,
    fold: F,
) -> impl FnOnce(&Promise<Vec<T>>) -> Promise<A>
where
    T: Clone + Send + 'static,
    R: Clone + Send + 'static,
    A: Clone + Send + 'static,
    S: FnMut(T) -> Promise<R> + Send + 'static,
    F: FnMut(A, R) -> A + Send + 'static,
{
    move |items| {
        items.then_compose(move |values| {
            crate::partition::partitioned(values, batch_size, spawner, init, fold)
        })
    }
}
