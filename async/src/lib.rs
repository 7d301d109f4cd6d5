//! Runtime-agnostic async primitives for tether promises.
//!
//! This crate provides the execution resources the promise engine builds on,
//! abstracted over the async runtime (currently tokio):
//!
//! - **Executor**: where offloaded continuations run
//! - **TaskPool**: tracked tasks on the global runtime, also the default executor
//! - **time**: sleeping and cancellable one-shot timers for clock promises
//! - **runtime**: configuration of the process-wide runtime
//! - **sync**: spinlock primitives for short critical sections
//!
//! # Example
//!
//! ```no_run
//! use tether_async::{TaskPool, executor::Executor};
//!
//! let pool = TaskPool::global();
//! pool.submit(Box::new(|| println!("running on the blocking pool")));
//! ```

extern crate alloc;

pub mod executor;
pub mod join_handle;
pub mod sync;

#[cfg(feature = "tokio")]
pub mod runtime;
#[cfg(feature = "tokio")]
pub mod task_pool;
#[cfg(feature = "tokio")]
pub mod time;

pub use executor::{Executor, Work};
#[cfg(feature = "tokio")]
pub use join_handle::JoinHandle;
#[cfg(feature = "tokio")]
pub use task_pool::TaskPool;

/// A token for cooperative cancellation of pool tasks.
///
/// Type alias over the runtime's cancellation primitive.
#[cfg(feature = "tokio")]
pub type CancellationToken = tokio_util::sync::CancellationToken;

/// Returns the number of available hardware threads.
///
/// With the `std` feature enabled, this queries the OS via
/// `std::thread::available_parallelism()`. Without `std`, returns 1.
#[cfg(feature = "std")]
pub fn available_parallelism() -> core::num::NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(core::num::NonZeroUsize::MIN)
}

/// Returns the number of available hardware threads.
///
/// With the `std` feature enabled, this queries the OS via
/// `std::thread::available_parallelism()`. Without `std`, returns 1.
#[cfg(not(feature = "std"))]
pub fn available_parallelism() -> core::num::NonZeroUsize {
    core::num::NonZeroUsize::MIN
}
