//! Composable promises with dependency-aware cancellation.
//!
//! A [`Promise`] is a single-assignment cell that eventually holds a value or
//! an [`Error`]. Promises derived from others through the combinators of
//! [`Dependent`] remember where they came from, so cancelling a derived
//! promise can reach back and cancel the work it was waiting on, as selected
//! by its [`CancelPolicy`].
//!
//! On top of the core engine this crate provides:
//!
//! - **timeouts**: `or_timeout`, `on_timeout` and `delay`, backed by clock
//!   promises that never leave timers running
//! - **relay**: carrying thread-local [`ContextVar`]s into continuations that
//!   run on other threads
//! - **partition**: processing a large input in sequential, bounded batches
//! - **future**: awaiting a promise from async code
//!
//! # Example
//!
//! ```
//! use core::time::Duration;
//! use tether_promise::{Error, Promise};
//!
//! let slow = Promise::<u32>::new();
//! let bounded = slow.or_timeout(Duration::from_millis(20), true);
//!
//! assert!(matches!(bounded.get(), Err(Error::Timeout(_))));
//! assert!(matches!(slow.get(), Err(Error::Cancelled)));
//! ```

extern crate alloc;

mod cell;
mod error;
mod promise;

pub mod context;
pub mod dependent;
pub mod future;
pub mod interrupt;
pub mod ops;
pub mod partition;
pub mod relay;
pub mod timeouts;


pub use cell::Cancellable;
pub use context::{ContextSlot, ContextVar};
pub use dependent::{CancelPolicy, Dependent, Dispatch, Origin};
pub use error::Error;
pub use promise::Promise;
pub use relay::Relay;
pub use tether_async::executor::{Executor, default_executor};

use alloc::{
    boxed::Box,
    sync::{Arc, Weak},
    vec::Vec,
};
use error::guarded;
use tether_async::sync::spin::Mutex;
use tracing::{debug, trace};
