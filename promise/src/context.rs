//! Context variables that can be carried across threads by a [`Relay`].
//!
//! A [`ContextVar`] is any get/set/remove triple, typically over a
//! thread-local. The relay only needs to capture a variable's current value
//! and later install it around a continuation, which is what [`ContextSlot`]
//! abstracts.

use super::*;
use alloc::borrow::Cow;
use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::thread::LocalKey;

type Reader<T> = Arc<dyn Fn() -> Option<T> + Send + Sync>;
type Writer<T> = Arc<dyn Fn(Option<T>) + Send + Sync>;
type Eraser = Arc<dyn Fn() + Send + Sync>;

/// A named context variable.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use tether_promise::ContextVar;
///
/// thread_local! {
///     static TENANT: RefCell<Option<String>> = const { RefCell::new(None) };
/// }
///
/// let tenant = ContextVar::from_thread_local("tenant", &TENANT);
/// tenant.set("acme".to_string());
/// assert_eq!(tenant.get().as_deref(), Some("acme"));
/// tenant.remove();
/// assert_eq!(tenant.get(), None);
/// ```
pub struct ContextVar<T> {
    name: Cow<'static, str>,
    reader: Reader<T>,
    writer: Writer<T>,
    eraser: Option<Eraser>,
}

impl<T> Clone for ContextVar<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            reader: self.reader.clone(),
            writer: self.writer.clone(),
            eraser: self.eraser.clone(),
        }
    }
}

impl<T> fmt::Debug for ContextVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextVar").field(&self.name).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> ContextVar<T> {
    /// A variable backed by `reader` and `writer`; writing `None` removes the
    /// value unless an eraser is added with [`with_eraser`](Self::with_eraser).
    pub fn define<R, W>(name: impl Into<Cow<'static, str>>, reader: R, writer: W) -> Self
    where
        R: Fn() -> Option<T> + Send + Sync + 'static,
        W: Fn(Option<T>) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            reader: Arc::new(reader),
            writer: Arc::new(writer),
            eraser: None,
        }
    }

    /// Like [`define`](Self::define), named `ctx-var-N`.
    pub fn unnamed<R, W>(reader: R, writer: W) -> Self
    where
        R: Fn() -> Option<T> + Send + Sync + 'static,
        W: Fn(Option<T>) + Send + Sync + 'static,
    {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        Self::define(alloc::format!("ctx-var-{n}"), reader, writer)
    }

    pub fn with_eraser<E>(mut self, eraser: E) -> Self
    where
        E: Fn() + Send + Sync + 'static,
    {
        self.eraser = Some(Arc::new(eraser));
        self
    }

    /// Adapts a `thread_local!` holding an optional value.
    pub fn from_thread_local(
        name: impl Into<Cow<'static, str>>,
        key: &'static LocalKey<RefCell<Option<T>>>,
    ) -> Self {
        Self::define(
            name,
            move || key.with(|cell| cell.borrow().clone()),
            move |value| key.with(|cell| *cell.borrow_mut() = value),
        )
        .with_eraser(move || {
            key.with(|cell| cell.borrow_mut().take());
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Option<T> {
        (self.reader)()
    }

    pub fn set(&self, value: T) {
        (self.writer)(Some(value))
    }

    pub fn remove(&self) {
        match &self.eraser {
            Some(eraser) => eraser(),
            None => (self.writer)(None),
        }
    }

    fn restore(&self, value: Option<T>) {
        match value {
            Some(value) => self.set(value),
            None => self.remove(),
        }
    }
}

/// A context value source a [`Relay`] can capture.
pub trait ContextSlot: Send + Sync {
    fn slot_name(&self) -> &str;

    /// Snapshots the current value on the calling thread.
    fn capture(&self) -> Captured;
}

impl<T: Clone + Send + Sync + 'static> ContextSlot for ContextVar<T> {
    fn slot_name(&self) -> &str {
        self.name()
    }

    fn capture(&self) -> Captured {
        Captured(Arc::new(Snapshot {
            var: self.clone(),
            value: self.get(),
        }))
    }
}

/// A slot value captured by [`ContextSlot::capture`].
#[derive(Clone)]
pub struct Captured(Arc<dyn Install>);

impl Captured {
    pub fn slot_name(&self) -> &str {
        self.0.slot_name()
    }

    /// Installs the captured value, returning a guard that puts back the
    /// value it replaced.
    pub(crate) fn install(&self) -> Restore {
        self.0.install()
    }
}

impl fmt::Debug for Captured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Captured").field(&self.slot_name()).finish()
    }
}

pub(crate) struct Restore(Box<dyn FnOnce()>);

impl Restore {
    pub(crate) fn run(self) {
        (self.0)()
    }
}

trait Install: Send + Sync {
    fn slot_name(&self) -> &str;
    fn install(&self) -> Restore;
}

struct Snapshot<T> {
    var: ContextVar<T>,
    value: Option<T>,
}

impl<T: Clone + Send + Sync + 'static> Install for Snapshot<T> {
    fn slot_name(&self) -> &str {
        self.var.name()
    }

    fn install(&self) -> Restore {
        let ambient = self.var.get();
        self.var.restore(self.value.clone());
        let var = self.var.clone();
        Restore(Box::new(move || var.restore(ambient)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    std::thread_local! {
        static LOCAL: RefCell<Option<u32>> = const { RefCell::new(None) };
    }

    #[test]
    fn thread_local_adapter() {
        let var = ContextVar::from_thread_local("local", &LOCAL);
        assert_eq!(var.name(), "local");
        assert_eq!(var.get(), None);
        var.set(3);
        assert_eq!(LOCAL.with(|c| *c.borrow()), Some(3));
        var.remove();
        assert_eq!(var.get(), None);
    }

    #[test]
    fn unnamed_vars_get_distinct_names() {
        let a = ContextVar::<u32>::unnamed(|| None, |_| {});
        let b = ContextVar::<u32>::unnamed(|| None, |_| {});
        assert!(a.name().starts_with("ctx-var-"));
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn remove_without_eraser_writes_none() {
        let store = Arc::new(Mutex::new(Some(1u32)));
        let (r, w) = (store.clone(), store.clone());
        let var = ContextVar::define("custom", move || *r.lock(), move |v| *w.lock() = v);
        var.remove();
        assert_eq!(*store.lock(), None);
    }

    #[test]
    fn install_and_restore() {
        let var = ContextVar::from_thread_local("local", &LOCAL);
        var.set(1);
        let captured = var.capture();
        var.set(2);

        let restore = captured.install();
        assert_eq!(var.get(), Some(1));
        restore.run();
        assert_eq!(var.get(), Some(2));
        var.remove();
    }
}
