use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    mem::{replace, swap, take},
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
    thread::AccessError,
};

use derive_ex::derive_ex;
use futures::future::poll_fn;
use tracing::{debug, trace};

use crate::Error;

mod bindings;
mod dirty;
mod version;

pub use bindings::SignalContext;
pub(crate) use bindings::{BindKey, Collector, Dependencies, Dependency, Dependents};
pub(crate) use dirty::Dirty;
pub use version::Version;


thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
}

struct Globals {
    is_runtime_exists: bool,
    is_batch_active: bool,
    dirty: VecDeque<Rc<dyn Flush>>,
    unbinds: Vec<Vec<Dependency>>,
    deferred: Vec<Weak<dyn Deliver>>,
    waker: Option<Waker>,
}
impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            is_batch_active: false,
            dirty: VecDeque::new(),
            unbinds: Vec::new(),
            deferred: Vec::new(),
            waker: None,
        }
    }
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut()))
    }
    fn swap_vec<T>(f: impl FnOnce(&mut Self) -> &mut Vec<T>, values: &mut Vec<T>) -> bool {
        Self::with(|g| swap(f(g), values));
        !values.is_empty()
    }
    fn push_unbinds(deps: Vec<Dependency>) -> Result<(), Vec<Dependency>> {
        let mut deps = Some(deps);
        let _ = GLOBALS.try_with(|g| {
            if let Ok(mut g) = g.try_borrow_mut() {
                if let Some(deps) = deps.take() {
                    g.unbinds.push(deps);
                    g.wake();
                }
            }
        });
        match deps {
            None => Ok(()),
            Some(deps) => Err(deps),
        }
    }
    fn assert_exists(&self) {
        if !self.is_runtime_exists {
            panic!("`Runtime` is not created.");
        }
    }
    fn push_deferred(&mut self, node: Weak<dyn Deliver>) {
        self.deferred.push(node);
        self.wake();
    }
    fn wait_for_ready(&mut self, cx: &Context) -> Poll<()> {
        if !self.deferred.is_empty() || !self.unbinds.is_empty() {
            return Poll::Ready(());
        }
        self.waker = Some(cx.waker().clone());
        Poll::Pending
    }
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// Reactive runtime.
///
/// Owns the per-thread scheduler state: the batch dirty set, the deferred delivery queue and the queue
/// of dependency edges waiting to be reclaimed. Only one `Runtime` can exist on a thread at a time;
/// dropping it resets all of that state.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime {
    deferred_buffer: Vec<Weak<dyn Deliver>>,
}
impl Runtime {
    pub fn new() -> Self {
        if Globals::with(|g| replace(&mut g.is_runtime_exists, true)) {
            panic!("Only one `Runtime` can exist in the same thread at the same time.");
        };
        Self {
            deferred_buffer: Vec::new(),
        }
    }

    /// Returns a context for reading signals without tracking dependencies.
    pub fn sc(&mut self) -> SignalContext<'_> {
        SignalContext::new(None)
    }

    /// Deliver values to subscribers registered with [`Delivery::Deferred`](crate::Delivery::Deferred).
    ///
    /// Every pending subscriber is called even if some of them fail; the first failure is returned.
    /// Returns `Ok(true)` if any delivery was attempted.
    pub fn dispatch_deferred(&mut self) -> Result<bool, Error> {
        let mut handled = false;
        let mut first_error = None;
        let mut deferred = take(&mut self.deferred_buffer);
        while Globals::swap_vec(|g| &mut g.deferred, &mut deferred) {
            for node in deferred.drain(..) {
                let Some(node) = node.upgrade() else {
                    continue;
                };
                handled = true;
                if let Err(e) = batch(|| node.deliver()).and_then(|r| r) {
                    debug!(error = %e, "deferred delivery failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.deferred_buffer = deferred;
        match first_error {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    /// Apply pending reclamation of dependency edges left by dropped signals and effects.
    ///
    /// Returns the number of edges removed.
    pub fn reclaim(&mut self) -> usize {
        reclaim_edges()
    }

    /// Repeat [`dispatch_deferred`](Self::dispatch_deferred) and [`reclaim`](Self::reclaim)
    /// until there is nothing left to do.
    pub fn update(&mut self) -> Result<(), Error> {
        let mut first_error = None;
        loop {
            match self.dispatch_deferred() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            }
            if self.reclaim() != 0 {
                continue;
            }
            break;
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Wait while there is no process to be executed by [`update`](Self::update).
    pub async fn wait_for_ready(&mut self) {
        poll_fn(|cx| Globals::with(|g| g.wait_for_ready(cx))).await
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        reclaim_edges();
        let (dirty, deferred) = Globals::with(|g| {
            g.is_runtime_exists = false;
            g.is_batch_active = false;
            g.waker = None;
            (take(&mut g.dirty), take(&mut g.deferred))
        });
        for item in &dirty {
            item.queued().set(false);
        }
        drop(dirty);
        drop(deferred);
        reclaim_edges();
    }
}

/// Downstream end of a dependency edge: a signal or an effect that read another signal.
pub(crate) trait BindSink: 'static {
    fn notify(self: Rc<Self>);
}

/// Upstream end of a dependency edge.
pub(crate) trait BindSource: 'static {
    /// Resolves the source if needed and returns its current version.
    fn refresh(self: Rc<Self>) -> Version;
    fn bind(&self, sink: Weak<dyn BindSink>) -> BindKey;
    fn unbind(&self, key: BindKey);
}

/// Item of the batch dirty set.
pub(crate) trait Flush: 'static {
    fn queued(&self) -> &Cell<bool>;
    fn flush(self: Rc<Self>) -> Result<(), Error>;
}

/// Item of the deferred delivery queue.
pub(crate) trait Deliver: 'static {
    fn deliver(self: Rc<Self>) -> Result<(), Error>;
}

pub(crate) fn is_runtime_exists() -> bool {
    Globals::try_with(|g| g.is_runtime_exists).unwrap_or(false)
}

/// Add an item to the dirty set of the active batch unless it is already there.
pub(crate) fn schedule_flush(item: Rc<dyn Flush>) {
    if !item.queued().replace(true) {
        Globals::with(|g| g.dirty.push_back(item));
    }
}

pub(crate) fn schedule_deliver(node: Weak<dyn Deliver>) {
    Globals::with(|g| g.push_deferred(node));
}

/// Remove the back-references left by dependency lists that were dropped.
pub(crate) fn reclaim_edges() -> usize {
    let mut count = 0;
    let mut unbinds = Vec::new();
    while Globals::swap_vec(|g| &mut g.unbinds, &mut unbinds) {
        for deps in unbinds.drain(..) {
            for d in deps {
                d.unbind();
                count += 1;
            }
        }
    }
    if count != 0 {
        trace!(count, "reclaimed dependency edges");
    }
    count
}

/// Open a batch.
///
/// Returns `true` if this call opened the batch and is therefore responsible for flushing it with
/// [`batch_flush`]. Returns `false` if a batch was already active.
pub fn batch_start() -> bool {
    let owner = Globals::with(|g| {
        g.assert_exists();
        !replace(&mut g.is_batch_active, true)
    });
    if owner {
        trace!("batch opened");
    }
    owner
}

/// Close a batch opened by [`batch_start`].
///
/// Does nothing unless `owner` is `true`. The owner delivers every item of the dirty set, including
/// items added while flushing. A failing item does not stop the others; the first failure is returned
/// after the batch is closed.
pub fn batch_flush(owner: bool) -> Result<(), Error> {
    BatchGuard::new(owner).flush()
}

/// Run `f` inside a batch.
///
/// Writes performed by `f` are collected and delivered once when the outermost batch closes.
pub fn batch<T>(f: impl FnOnce() -> T) -> Result<T, Error> {
    let guard = BatchGuard::new(batch_start());
    let value = f();
    guard.flush()?;
    Ok(value)
}

/// Closes the batch if it is dropped without being flushed, e.g. while unwinding.
struct BatchGuard {
    owner: bool,
}
impl BatchGuard {
    fn new(owner: bool) -> Self {
        Self { owner }
    }
    fn flush(mut self) -> Result<(), Error> {
        if !self.owner {
            return Ok(());
        }
        let mut first_error = None;
        let mut count = 0usize;
        while let Some(item) = Globals::with(|g| g.dirty.pop_front()) {
            count += 1;
            item.queued().set(false);
            if let Err(e) = item.flush() {
                debug!(error = %e, "flush failed");
                first_error.get_or_insert(e);
            }
        }
        self.owner = false;
        Globals::with(|g| g.is_batch_active = false);
        trace!(items = count, "batch flushed");
        reclaim_edges();
        first_error.map_or(Ok(()), Err)
    }
}
impl Drop for BatchGuard {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        let dirty = Globals::try_with(|g| {
            g.is_batch_active = false;
            take(&mut g.dirty)
        })
        .unwrap_or_default();
        for item in &dirty {
            item.queued().set(false);
        }
    }
}
