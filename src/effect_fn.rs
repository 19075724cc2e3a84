use std::{
    cell::{Cell, RefCell},
    mem::take,
    rc::{Rc, Weak},
};

use tracing::{debug, warn};

use crate::{
    batch,
    core::{is_runtime_exists, schedule_flush, BindSink, Collector, Dependencies, Dirty, Flush},
    Error, SignalContext, Subscription,
};

#[cfg(test)]
mod tests;

/// Function returned by an effect, called before the next run of the effect or when the effect is
/// disposed.
///
/// It runs inside a batch, so writes it performs are delivered once it returns.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }
    fn run(self) -> Result<(), Error> {
        if is_runtime_exists() {
            batch(self.0)
        } else {
            (self.0)();
            Ok(())
        }
    }
}

/// Values an effect function may return.
pub trait IntoCleanup {
    fn into_cleanup(self) -> Result<Option<Cleanup>, Error>;
}
impl IntoCleanup for () {
    fn into_cleanup(self) -> Result<Option<Cleanup>, Error> {
        Ok(None)
    }
}
impl IntoCleanup for Cleanup {
    fn into_cleanup(self) -> Result<Option<Cleanup>, Error> {
        Ok(Some(self))
    }
}
impl IntoCleanup for Option<Cleanup> {
    fn into_cleanup(self) -> Result<Option<Cleanup>, Error> {
        Ok(self)
    }
}
impl<T: IntoCleanup> IntoCleanup for Result<T, Error> {
    fn into_cleanup(self) -> Result<Option<Cleanup>, Error> {
        self?.into_cleanup()
    }
}

/// Call a function now and again each time a signal it read changes.
///
/// The function runs once before `watch` returns, even inside an enclosing batch. Later runs happen
/// when the batch that changed a dependency is flushed; several changes in one batch cause a single run.
/// If the function returns a [`Cleanup`], it is called before the next run and on disposal.
///
/// Returns an error, and leaves nothing subscribed, if the first run fails. A failure of a later run
/// is returned to the code that flushed the batch, and the effect stays subscribed to the signals it
/// read so far.
///
/// If the [`Subscription`] returned from this function is dropped, the function will not be called again.
pub fn watch<R: IntoCleanup>(
    mut f: impl FnMut(&mut SignalContext) -> R + 'static,
) -> Result<Subscription, Error> {
    let node = EffectNode::new(move |sc| f(sc).into_cleanup());
    match batch(|| node.run()).and_then(|r| r) {
        Ok(()) => {
            debug!(deps = node.deps.borrow().len(), "effect started");
            Ok(Subscription::from_rc_fn(node, EffectNode::dispose))
        }
        Err(e) => {
            debug!(error = %e, "effect failed on first run");
            node.dispose();
            Err(e)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EffectState {
    Idle,
    Running,
    Disposed,
}

struct EffectNode<F> {
    f: RefCell<F>,
    state: Cell<EffectState>,
    dirty: Cell<Dirty>,
    queued: Cell<bool>,
    deps: RefCell<Dependencies>,
    cleanup: RefCell<Option<Cleanup>>,
}

impl<F> EffectNode<F>
where
    F: FnMut(&mut SignalContext) -> Result<Option<Cleanup>, Error> + 'static,
{
    fn new(f: F) -> Rc<Self> {
        Rc::new(Self {
            f: RefCell::new(f),
            state: Cell::new(EffectState::Idle),
            dirty: Cell::new(Dirty::Dirty),
            queued: Cell::new(false),
            deps: RefCell::new(Dependencies::new()),
            cleanup: RefCell::new(None),
        })
    }

    fn run(self: &Rc<Self>) -> Result<(), Error> {
        if self.state.get() != EffectState::Idle {
            return Ok(());
        }
        let dirty = self.dirty.get();
        if dirty.is_clean() {
            return Ok(());
        }
        if dirty.is_maybe_dirty() && !self.deps.borrow().is_changed() {
            self.dirty.set(Dirty::Clean);
            return Ok(());
        }
        self.dirty.set(Dirty::Clean);
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup.run()?;
        }

        let old = take(&mut *self.deps.borrow_mut());
        let sink: Weak<dyn BindSink> = Rc::downgrade(self) as Weak<dyn BindSink>;
        let mut collector = Collector::new(sink, old);
        self.state.set(EffectState::Running);
        let result = (*self.f.borrow_mut())(&mut SignalContext::new(Some(&mut collector)));
        let is_disposed = self.state.get() == EffectState::Disposed;
        if !is_disposed {
            self.state.set(EffectState::Idle);
        }
        *self.deps.borrow_mut() = collector.finish(result.is_err());

        let result = result.map(|cleanup| *self.cleanup.borrow_mut() = cleanup);
        if is_disposed {
            self.release();
        }
        result
    }

    fn dispose(self: Rc<Self>) {
        match self.state.replace(EffectState::Disposed) {
            EffectState::Idle => {
                debug!("effect disposed");
                self.release();
            }
            // The run in progress releases the effect when it returns.
            EffectState::Running => {}
            EffectState::Disposed => {}
        }
    }

    fn release(&self) {
        let mut deps = take(&mut *self.deps.borrow_mut());
        deps.clear();
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            if let Err(e) = cleanup.run() {
                warn!(error = %e, "cleanup of disposed effect failed");
            }
        }
    }
}

impl<F> BindSink for EffectNode<F>
where
    F: FnMut(&mut SignalContext) -> Result<Option<Cleanup>, Error> + 'static,
{
    fn notify(self: Rc<Self>) {
        if self.state.get() == EffectState::Disposed {
            return;
        }
        self.dirty.set(self.dirty.get() | Dirty::MaybeDirty);
        schedule_flush(self);
    }
}

impl<F> Flush for EffectNode<F>
where
    F: FnMut(&mut SignalContext) -> Result<Option<Cleanup>, Error> + 'static,
{
    fn queued(&self) -> &Cell<bool> {
        &self.queued
    }
    fn flush(self: Rc<Self>) -> Result<(), Error> {
        self.run()
    }
}
