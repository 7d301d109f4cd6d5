//! JoinHandle abstraction for runtime-agnostic task handles.
//!
//! Timers and spawned futures keep one of these so they can be aborted when
//! the promise that owns them settles first.

/// A handle to a spawned task that can be awaited for its result or aborted.
///
/// Type alias over the runtime-specific join handle; currently tokio's.
#[cfg(feature = "tokio")]
pub type JoinHandle<T> = tokio::task::JoinHandle<T>;
