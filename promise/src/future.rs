//! Interop with `async` code.
//!
//! A promise can be awaited directly, and a future can be turned into a
//! promise with [`Promise::spawn`].
//!
//! ```
//! use tether_promise::Promise;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let source = Promise::<u32>::new();
//! let doubled = source.then_apply(|v| v * 2);
//! source.complete(4);
//! assert_eq!(doubled.await.unwrap(), 8);
//! # }
//! ```

use super::*;
use core::future::{Future, IntoFuture};
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::FutureExt;
use futures::task::AtomicWaker;
use tether_async::TaskPool;

/// Future returned by awaiting a [`Promise`].
#[derive(Debug)]
pub struct Settled<T> {
    promise: Promise<T>,
    waker: Option<Arc<AtomicWaker>>,
}

impl<T: Clone + Send + 'static> Future for Settled<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.promise.outcome() {
            return Poll::Ready(outcome);
        }

        match &self.waker {
            Some(waker) => waker.register(cx.waker()),
            None => {
                // One continuation per future, whatever the number of polls.
                let waker = Arc::new(AtomicWaker::new());
                waker.register(cx.waker());
                let wake = waker.clone();
                self.promise.subscribe_raw(move |_| wake.wake());
                self.waker = Some(waker);
            }
        }

        match self.promise.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<T: Clone + Send + 'static> IntoFuture for Promise<T> {
    type Output = Result<T, Error>;
    type IntoFuture = Settled<T>;

    fn into_future(self) -> Self::IntoFuture {
        Settled {
            promise: self,
            waker: None,
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Runs `future` on the global task pool and settles with its output.
    ///
    /// Cancelling the promise aborts the task; a panic in the future fails
    /// the promise with [`Error::Panicked`].
    pub fn spawn<F>(future: F) -> Promise<T>
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let promise = Promise::new();
        let target = promise.clone();
        let task = TaskPool::global().spawn(async move {
            let outcome = match core::panic::AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(Error::from_panic(payload)),
            };
            target.settle(outcome);
        });
        promise.subscribe_raw(move |_| task.abort());
        promise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[tokio::test]
    async fn await_pending_promise() {
        let source = Promise::<u32>::new();
        let completer = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.complete(3);
        });
        assert_eq!(source.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn await_failure() {
        let source = Promise::<u32>::failed(Error::message("nope"));
        assert_eq!(source.await.unwrap_err().to_string(), "nope");
    }

    #[test]
    fn spawn_settles_with_output() {
        let promise = Promise::spawn(async { Ok::<_, Error>(5u32) });
        assert_eq!(promise.get().unwrap(), 5);
    }

    async fn explode() -> Result<u32, Error> {
        panic!("in task")
    }

    #[test]
    fn spawn_captures_panic() {
        let promise = Promise::spawn(explode());
        assert!(matches!(promise.get(), Err(Error::Panicked(m)) if &*m == "in task"));
    }

    #[test]
    fn cancel_aborts_spawned_task() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let promise = Promise::<u32>::spawn(async move {
            tether_async::time::sleep(Duration::from_secs(30)).await;
            let _ = tx.send(());
            Ok(1)
        });
        assert!(promise.cancel());
        // The aborted task drops its sender without sending.
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected)
        ));
    }
}
