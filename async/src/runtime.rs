//! The process-wide runtime that backs default executors and timers.
//!
//! Promises never own threads. Work that must run "somewhere else" (offloaded
//! continuations, clock promises, spawned futures) lands on a single lazily
//! started multi-threaded runtime. Applications that care about its shape call
//! [`init`] once at startup; everyone else gets [`Config::default()`].
//!
//! # Example
//!
//! ```no_run
//! use tether_async::runtime::{self, Config};
//!
//! runtime::init(&Config::default().with_thread_name("app-worker"))
//!     .expect("runtime already started");
//!
//! let handle = runtime::handle();
//! handle.spawn(async { /* ... */ });
//! ```

use crate::sync::spin::Once;
use core::num::NonZeroUsize;
use thiserror::Error;
use trace_err::*;
use tracing::info;

#[derive(Error, Debug)]
pub enum Error {
    #[error("The runtime has already been started")]
    AlreadyStarted,

    #[error("Failed to build the runtime: {0}")]
    Build(#[from] std::io::Error),
}

/// Shape of the global runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Number of async worker threads (timers and spawned futures).
    pub worker_threads: NonZeroUsize,

    /// Upper bound of the blocking pool that runs offloaded continuations.
    pub max_blocking_threads: NonZeroUsize,

    /// Prefix used to name runtime threads.
    pub thread_name: String,
}

fn default_max_blocking_threads() -> NonZeroUsize {
    NonZeroUsize::new(512).unwrap_or(NonZeroUsize::MIN)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: crate::available_parallelism(),
            max_blocking_threads: default_max_blocking_threads(),
            thread_name: "tether-worker".into(),
        }
    }
}

impl Config {
    pub fn with_worker_threads(mut self, worker_threads: NonZeroUsize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_max_blocking_threads(mut self, max_blocking_threads: NonZeroUsize) -> Self {
        self.max_blocking_threads = max_blocking_threads;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    fn build(&self) -> Result<tokio::runtime::Runtime, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads.get())
            .max_blocking_threads(self.max_blocking_threads.get())
            .thread_name(self.thread_name.clone())
            .enable_time()
            .build()?;

        info!(
            worker_threads = self.worker_threads.get(),
            thread_name = %self.thread_name,
            "Started tether runtime"
        );
        Ok(runtime)
    }
}

static RUNTIME: Once<tokio::runtime::Runtime> = Once::new();

/// Starts the global runtime with `config`.
///
/// Must be called before anything touches the default executor or a timer;
/// afterwards the runtime is already running with the default configuration
/// and this returns [`Error::AlreadyStarted`].
pub fn init(config: &Config) -> Result<(), Error> {
    if RUNTIME.is_completed() {
        return Err(Error::AlreadyStarted);
    }
    RUNTIME.try_call_once(|| config.build()).map(|_| ())
}

/// Returns the global runtime handle, starting the runtime with the default
/// configuration on first use.
pub fn handle() -> &'static tokio::runtime::Handle {
    RUNTIME
        .call_once(|| {
            Config::default()
                .build()
                .trace_expect("Failed to start the default tether runtime")
        })
        .handle()
}

/// Returns `true` once the global runtime is running.
pub fn is_started() -> bool {
    RUNTIME.is_completed()
}
