//! Task pool for running promise work with graceful shutdown.
//!
//! This module provides [`TaskPool`], which encapsulates the common pattern of:
//! - Spawning tasks (async futures or blocking closures) on a runtime
//! - Tracking active tasks, so callers can ask how many are still alive
//! - Graceful shutdown with guaranteed task completion
//!
//! A `TaskPool` is also an [`Executor`](crate::executor::Executor): submitted
//! work runs on the runtime's blocking pool, which is where offloaded promise
//! continuations execute.
//!
//! # Pattern
//!
//! The task pool implements a three-phase shutdown:
//! 1. **Signal**: Cancel all tasks via the cancellation token
//! 2. **Close**: Mark the tracker closed
//! 3. **Wait**: Block until all tasks complete
//!
//! # Example
//!
//! ```no_run
//! use tether_async::task_pool::TaskPool;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let pool = TaskPool::new();
//! let cancel = pool.cancel_token().clone();
//!
//! pool.spawn(async move {
//!     cancel.cancelled().await;
//! });
//!
//! pool.shutdown().await;
//! # });
//! ```

use crate::executor::{Executor, Work};
use crate::join_handle::JoinHandle;
use crate::sync::spin::Once;
use crate::CancellationToken;
use tracing::warn;

/// Manages a group of tracked tasks bound to one runtime.
///
/// `TaskPool` combines a [`CancellationToken`] and
/// [`tokio_util::task::TaskTracker`] with the runtime handle the tasks are
/// spawned on, so it can be used from threads that are not runtime workers.
pub struct TaskPool {
    cancel_token: CancellationToken,
    task_tracker: tokio_util::task::TaskTracker,
    handle: tokio::runtime::Handle,
}

impl TaskPool {
    /// Creates a new task pool on the global runtime.
    pub fn new() -> Self {
        Self::with_handle(crate::runtime::handle().clone())
    }

    /// Creates a new task pool spawning onto `handle`.
    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            task_tracker: tokio_util::task::TaskTracker::new(),
            handle,
        }
    }

    /// The process-wide pool used by default executors.
    pub fn global() -> &'static TaskPool {
        static GLOBAL: Once<TaskPool> = Once::new();
        GLOBAL.call_once(TaskPool::new)
    }

    /// Returns a reference to the cancellation token.
    ///
    /// Use this to check cancellation status or pass to tasks that need
    /// to listen for shutdown signals.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Spawns a future tracked by this pool.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: core::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.task_tracker.spawn_on(task, &self.handle)
    }

    /// Runs a blocking closure on the runtime's blocking pool, tracked by
    /// this pool.
    pub fn spawn_blocking<F, R>(&self, task: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.task_tracker.spawn_blocking_on(task, &self.handle)
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn len(&self) -> usize {
        self.task_tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_tracker.is_empty()
    }

    /// Initiates graceful shutdown and waits for all tasks to complete.
    ///
    /// 1. Cancels all tasks via the cancellation token
    /// 2. Closes the tracker
    /// 3. Waits for all currently running tasks to complete
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    /// Checks if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for TaskPool {
    fn submit(&self, work: Work) {
        if self.is_cancelled() {
            // Promises waiting on this work must still settle.
            warn!("Work submitted to a shut down task pool, running it inline");
            work();
            return;
        }
        self.spawn_blocking(work);
    }
}
