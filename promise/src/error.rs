use alloc::sync::Arc;
use core::any::Any;
use core::time::Duration;
use thiserror::Error;

/// Why a promise did not produce a value.
///
/// Errors are shared between every continuation of a promise, so the type is
/// cheap to clone.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Failure reported by application code.
    #[error(transparent)]
    Application(Arc<dyn std::error::Error + Send + Sync>),

    /// A user-supplied function panicked while running as a continuation.
    #[error("Continuation panicked: {0}")]
    Panicked(Arc<str>),

    /// The promise was cancelled, explicitly or by a timeout.
    #[error("Promise was cancelled")]
    Cancelled,

    /// The timeout clock of `or_timeout` fired first.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A blocking wait was aborted by thread interruption.
    #[error("Interrupted while waiting for a promise")]
    Interrupted,

    /// The bound of a blocking wait elapsed before the promise settled.
    #[error("Promise still pending after waiting {0:?}")]
    WaitElapsed(Duration),

    /// The promise returned by a `then_compose` function was dropped before it
    /// could settle.
    #[error("Nested promise was dropped before it settled")]
    Composition,
}

#[derive(Error, Debug)]
#[error("{0}")]
struct Message(String);

impl Error {
    /// Wraps an application error.
    pub fn application<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Application(Arc::new(error))
    }

    /// An application error carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::application(Message(message.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).into()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str().into()
        } else {
            "non-string panic payload".into()
        };
        Self::Panicked(message)
    }
}

/// Runs `f`, turning a panic into [`Error::Panicked`].
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|payload| {
        let error = Error::from_panic(payload);
        tracing::debug!("Captured continuation panic: {error}");
        error
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_displays_text() {
        let e = Error::message("disk on fire");
        assert_eq!(e.to_string(), "disk on fire");
        assert!(!e.is_cancelled());
    }

    #[test]
    fn classification() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!Error::WaitElapsed(Duration::from_secs(1)).is_timeout());
    }

    #[test]
    fn guarded_captures_panics() {
        let err = guarded(|| -> u32 { panic!("bad input") }).unwrap_err();
        assert!(matches!(&err, Error::Panicked(m) if &**m == "bad input"));

        let err = guarded(|| -> u32 { panic!("code {}", 7) }).unwrap_err();
        assert!(matches!(&err, Error::Panicked(m) if &**m == "code 7"));

        assert_eq!(guarded(|| 3).unwrap(), 3);
    }
}
