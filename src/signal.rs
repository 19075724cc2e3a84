use std::{
    cell::{Cell, RefCell},
    mem::take,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;
use tracing::debug;

use crate::{
    batch,
    core::{
        schedule_flush, BindKey, BindSink, BindSource, Collector, Dependencies, Dependents, Dirty,
        Flush, Version,
    },
    subscribe_fn::Subscribers,
    Error, SignalContext,
};

mod builder;

pub use builder::SignalBuilder;


pub(crate) type Resolver<T> = Box<dyn Fn(&mut SignalContext) -> Result<T, Error>>;

/// Comparator deciding whether a new value replaces the stored one.
pub(crate) enum Equality<T: 'static> {
    /// Every write and every resolution counts as a change.
    AlwaysChanged,
    /// Returns `true` if the two values are equal.
    Custom(Box<dyn Fn(&T, &T) -> bool>),
}
impl<T: 'static> Equality<T> {
    pub fn by(f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::Custom(Box::new(f))
    }
    fn is_changed(&self, new: &T, old: Option<&T>) -> bool {
        match (self, old) {
            (_, None) | (Equality::AlwaysChanged, _) => true,
            (Equality::Custom(eq), Some(old)) => !eq(new, old),
        }
    }
}

/// Reactive value that tracks dependencies and recomputes lazily.
///
/// A `Signal` is a cheap handle; clones refer to the same node. Derived signals hold strong
/// references to the signals they read, while a signal only holds weak references to the signals
/// that read it, so a derived signal that is no longer referenced is dropped together with its edges.
#[derive_ex(Clone, bound())]
pub struct Signal<T: 'static>(pub(crate) Rc<SignalNode<T>>);

impl<T: Clone + 'static> Signal<T> {
    /// Create a derived signal whose dependencies are the signals `f` reads through its context.
    ///
    /// `f` is not called until the signal is read. A result equal to the previous value does not
    /// count as a change.
    pub fn new(f: impl Fn(&mut SignalContext) -> Result<T, Error> + 'static) -> Self
    where
        T: PartialEq,
    {
        SignalBuilder::new(f).dedup().build()
    }

    /// Create a signal from a resolver that does not read other signals.
    ///
    /// The resolver runs on the first read and again only after [`invalidate`](Self::invalidate).
    pub fn from_fn(f: impl Fn() -> Result<T, Error> + 'static) -> Self
    where
        T: PartialEq,
    {
        SignalBuilder::from_fn(f).dedup().build()
    }

    /// Create a signal that always has the given value.
    pub fn from_value(value: T) -> Self {
        SignalBuilder::from_value(value).build()
    }

    /// Gets the current value and adds a dependency on this signal to the specified `SignalContext`.
    pub fn get(&self, sc: &mut SignalContext) -> Result<T, Error> {
        let value = self.0.read();
        sc.declare(self.0.clone(), self.0.version.get());
        value
    }

    /// Brings the signal up to date and returns its version without tracking.
    pub fn version(&self) -> Version {
        self.0.clone().refresh()
    }

    /// Create a signal that applies `f` to the value of this signal.
    pub fn map<U>(&self, f: impl Fn(&T) -> U + 'static) -> Signal<U>
    where
        U: Clone + PartialEq + 'static,
    {
        let this = self.clone();
        Signal::new(move |sc| Ok(f(&this.get(sc)?)))
    }

    /// Force the signal to be treated as changed.
    ///
    /// A derived signal reruns its resolver on the next read; its dependents are notified.
    pub fn invalidate(&self) -> Result<(), Error> {
        self.0.invalidate()
    }

    /// Number of back-references held by this signal, including ones whose owner was dropped but
    /// not yet reclaimed.
    pub fn dependent_count(&self) -> usize {
        self.0.dependents.borrow().len()
    }

    pub fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal(Rc::downgrade(&self.0))
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt_debug(f)
    }
}

/// A weak handle to a [`Signal`].
#[derive_ex(Clone, bound())]
pub struct WeakSignal<T: 'static>(Weak<SignalNode<T>>);

impl<T: 'static> WeakSignal<T> {
    pub fn upgrade(&self) -> Option<Signal<T>> {
        self.0.upgrade().map(Signal)
    }
}

pub(crate) struct SignalNode<T: 'static> {
    value: RefCell<Option<T>>,
    error: RefCell<Option<Error>>,
    version: Cell<Version>,
    dirty: Cell<Dirty>,
    queued: Cell<bool>,
    pub(crate) deferred_queued: Cell<bool>,
    resolver: Option<Resolver<T>>,
    equality: Equality<T>,
    deps: RefCell<Dependencies>,
    dependents: RefCell<Dependents>,
    pub(crate) subscribers: RefCell<Subscribers<T>>,
}

impl<T: Clone + 'static> SignalNode<T> {
    pub(crate) fn new(
        value: Option<T>,
        resolver: Option<Resolver<T>>,
        equality: Equality<T>,
    ) -> Rc<Self> {
        let dirty = Dirty::from_is_dirty(resolver.is_some());
        Rc::new(Self {
            value: RefCell::new(value),
            error: RefCell::new(None),
            version: Cell::new(Version::new()),
            dirty: Cell::new(dirty),
            queued: Cell::new(false),
            deferred_queued: Cell::new(false),
            resolver,
            equality,
            deps: RefCell::new(Dependencies::new()),
            dependents: RefCell::new(Dependents::new()),
            subscribers: RefCell::new(Subscribers::new()),
        })
    }

    pub(crate) fn version(&self) -> Version {
        self.version.get()
    }

    fn update(self: &Rc<Self>) {
        let dirty = self.dirty.get();
        if dirty.is_clean() {
            return;
        }
        // Cleared before the resolver runs, so that a read of this signal from inside its own
        // resolution sees a clean signal without a value.
        self.dirty.set(Dirty::Clean);
        let Some(resolver) = &self.resolver else {
            return;
        };
        let old = take(&mut *self.deps.borrow_mut());
        if dirty.is_maybe_dirty() && !old.is_changed() {
            *self.deps.borrow_mut() = old;
            return;
        }

        let sink: Weak<dyn BindSink> = Rc::downgrade(self) as Weak<dyn BindSink>;
        let mut collector = Collector::new(sink, old);
        let result = resolver(&mut SignalContext::new(Some(&mut collector)));
        *self.deps.borrow_mut() = collector.finish(false);

        match result {
            Ok(value) => {
                let had_error = self.error.borrow_mut().take().is_some();
                let is_changed =
                    had_error || self.equality.is_changed(&value, self.value.borrow().as_ref());
                if is_changed {
                    *self.value.borrow_mut() = Some(value);
                    self.version.set(Version::new());
                }
            }
            Err(e) => {
                if e.is_cyclic() {
                    debug!("cyclic dependency detected");
                }
                *self.error.borrow_mut() = Some(e);
                self.version.set(Version::new());
                self.dirty.set(self.dirty.get() | Dirty::MaybeDirty);
            }
        }
    }

    pub(crate) fn read(self: &Rc<Self>) -> Result<T, Error> {
        self.update();
        if let Some(e) = &*self.error.borrow() {
            return Err(e.clone());
        }
        match &*self.value.borrow() {
            Some(value) => Ok(value.clone()),
            None => Err(Error::Cyclic),
        }
    }

    /// Replace the stored value of a root signal.
    pub(crate) fn write(self: &Rc<Self>, value: T) -> Result<(), Error> {
        if !self
            .equality
            .is_changed(&value, self.value.borrow().as_ref())
        {
            return Ok(());
        }
        *self.value.borrow_mut() = Some(value);
        self.version.set(Version::new());
        self.notify_changed()
    }

    /// Mutate the stored value of a root signal in place. Always counts as a change.
    pub(crate) fn modify(self: &Rc<Self>, f: impl FnOnce(&mut T)) -> Result<(), Error> {
        if let Some(value) = &mut *self.value.borrow_mut() {
            f(value);
        }
        self.version.set(Version::new());
        self.notify_changed()
    }

    fn invalidate(self: &Rc<Self>) -> Result<(), Error> {
        if self.resolver.is_some() {
            self.dirty.set(Dirty::Dirty);
        } else {
            self.version.set(Version::new());
        }
        self.notify_changed()
    }

    fn notify_changed(self: &Rc<Self>) -> Result<(), Error> {
        batch(|| {
            schedule_flush(self.clone());
            self.notify_dependents();
        })
    }
    fn notify_dependents(&self) {
        let sinks = self.dependents.borrow().sinks();
        for sink in sinks {
            sink.notify();
        }
    }
}
impl<T: std::fmt::Debug> SignalNode<T> {
    pub(crate) fn fmt_debug(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.value.try_borrow() {
            Ok(value) => match &*value {
                Some(value) => std::fmt::Debug::fmt(value, f),
                None => write!(f, "<uninitialized>"),
            },
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}

impl<T: Clone + 'static> BindSink for SignalNode<T> {
    fn notify(self: Rc<Self>) {
        if self.queued.get() && !self.dirty.get().is_clean() {
            return;
        }
        self.dirty.set(self.dirty.get() | Dirty::MaybeDirty);
        schedule_flush(self.clone());
        self.notify_dependents();
    }
}

impl<T: Clone + 'static> BindSource for SignalNode<T> {
    fn refresh(self: Rc<Self>) -> Version {
        self.update();
        self.version.get()
    }
    fn bind(&self, sink: Weak<dyn BindSink>) -> BindKey {
        self.dependents.borrow_mut().bind(sink)
    }
    fn unbind(&self, key: BindKey) {
        self.dependents.borrow_mut().unbind(key);
    }
}

impl<T: Clone + 'static> Flush for SignalNode<T> {
    fn queued(&self) -> &Cell<bool> {
        &self.queued
    }
    fn flush(self: Rc<Self>) -> Result<(), Error> {
        self.flush_subscribers()
    }
}
