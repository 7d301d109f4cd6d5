//! Spinlock-based synchronization primitives for O(1) operations.
//!
//! Promise state cells guard their continuation lists with these locks: a
//! registration is a `Vec::push`, a settlement is a single `mem::replace`, and
//! neither ever runs user code while the lock is held.
//!
//! Use these only when:
//!
//! - All operations are O(1) (push, take, state checks)
//! - No blocking, I/O, or syscalls while holding lock
//! - Lock is released before any continuation or callback runs
//! - No nested lock acquisition
//!
//! # Example
//!
//! ```
//! use tether_async::sync::spin::Mutex;
//!
//! let waiting: Mutex<Vec<u32>> = Mutex::new(Vec::new());
//! waiting.lock().push(7);
//!
//! let drained = core::mem::take(&mut *waiting.lock());
//! assert_eq!(drained, [7]);
//! ```

pub use spin::MutexGuard;

/// A spinlock-based mutex for O(1) operations.
///
/// Thin wrapper around `spin::Mutex`, so the lock implementation can change
/// without touching the promise code.
#[derive(Debug, Default)]
pub struct Mutex<T>(spin::Mutex<T>);

impl<T> Mutex<T> {
    /// Creates a new Mutex containing the given value.
    #[inline]
    pub const fn new(value: T) -> Self {
        Self(spin::Mutex::new(value))
    }

    /// Acquires the lock, spinning until it becomes available.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock()
    }

    /// Attempts to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.0.try_lock()
    }
}

/// A one-time initialization cell.
///
/// Used for process-wide singletons such as the default runtime and the
/// shared task pools.
#[derive(Debug, Default)]
pub struct Once<T>(spin::Once<T>);

impl<T> Once<T> {
    /// Creates an uninitialized cell.
    #[inline]
    pub const fn new() -> Self {
        Self(spin::Once::new())
    }

    /// Initializes the cell with `f` if it is empty and returns the value.
    #[inline]
    pub fn call_once<F: FnOnce() -> T>(&self, f: F) -> &T {
        self.0.call_once(f)
    }

    /// Fallible variant of [`call_once`](Once::call_once); the cell stays
    /// empty when `f` fails.
    #[inline]
    pub fn try_call_once<F, E>(&self, f: F) -> Result<&T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.0.try_call_once(f)
    }

    /// Returns the value if the cell has been initialized.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.0.get()
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.0.is_completed()
    }
}
