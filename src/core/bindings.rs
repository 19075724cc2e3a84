use std::{
    mem::take,
    rc::{Rc, Weak},
};

use slabmap::SlabMap;

use super::{BindSink, BindSource, Globals, Version};


#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BindKey(usize);

/// Weak back-references from an upstream signal to everything that read it.
pub struct Dependents(SlabMap<Weak<dyn BindSink>>);

impl Dependents {
    pub fn new() -> Self {
        Self(SlabMap::new())
    }
    pub fn bind(&mut self, sink: Weak<dyn BindSink>) -> BindKey {
        BindKey(self.0.insert(sink))
    }
    pub fn unbind(&mut self, key: BindKey) {
        self.0.remove(key.0);
    }

    /// Live sinks. Dead entries stay until their owner's reclamation is applied.
    pub fn sinks(&self) -> Vec<Rc<dyn BindSink>> {
        self.0.values().filter_map(Weak::upgrade).collect()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct Dependency {
    source: Rc<dyn BindSource>,
    key: BindKey,
    version: Version,
}
impl Dependency {
    fn is_same(&self, source: &Rc<dyn BindSource>) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.source), Rc::as_ptr(source))
    }
    fn is_changed(&self) -> bool {
        self.source.clone().refresh() != self.version
    }
    pub(crate) fn unbind(self) {
        self.source.unbind(self.key);
    }
}

/// Upstream signals read during the last run, in read order, with the version seen by that run.
#[derive(Default)]
pub struct Dependencies(Vec<Dependency>);

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings every dependency up to date in read order and stops at the first one whose version moved.
    pub fn is_changed(&self) -> bool {
        self.0.iter().any(Dependency::is_changed)
    }
    pub fn clear(&mut self) {
        for d in self.0.drain(..) {
            d.unbind();
        }
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl Drop for Dependencies {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            if let Err(deps) = Globals::push_unbinds(take(&mut self.0)) {
                for d in deps {
                    d.unbind();
                }
            }
        }
    }
}

/// Dependency list being built by one run of a resolver or an effect.
pub struct Collector {
    sink: Weak<dyn BindSink>,
    old: Dependencies,
    new: Dependencies,
}

impl Collector {
    pub fn new(sink: Weak<dyn BindSink>, old: Dependencies) -> Self {
        Self {
            sink,
            old,
            new: Dependencies::new(),
        }
    }

    fn declare(&mut self, source: Rc<dyn BindSource>, version: Version) {
        if std::ptr::addr_eq(Rc::as_ptr(&source), self.sink.as_ptr()) {
            return;
        }
        if self.new.0.iter().any(|d| d.is_same(&source)) {
            return;
        }
        let key = match self.old.0.iter().position(|d| d.is_same(&source)) {
            Some(index) => self.old.0.swap_remove(index).key,
            None => source.bind(self.sink.clone()),
        };
        self.new.0.push(Dependency {
            source,
            key,
            version,
        });
    }

    /// Completes the run.
    ///
    /// Previous dependencies that were not read again are unbound, unless `keep_stale` is set.
    pub fn finish(mut self, keep_stale: bool) -> Dependencies {
        if keep_stale {
            self.new.0.append(&mut self.old.0);
        } else {
            self.old.clear();
        }
        take(&mut self.new)
    }
}

/// Context for retrieving signal values and tracking dependencies.
///
/// Inside a resolver or an effect, every signal read through the context becomes a dependency of the
/// running computation. The context returned by [`Runtime::sc`](super::Runtime::sc) tracks nothing.
pub struct SignalContext<'s> {
    collector: Option<&'s mut Collector>,
}

impl<'s> SignalContext<'s> {
    pub(crate) fn new(collector: Option<&'s mut Collector>) -> Self {
        Self { collector }
    }

    /// Returns true if reads through this context are recorded as dependencies.
    pub fn is_tracking(&self) -> bool {
        self.collector.is_some()
    }

    /// Call a function with a [`SignalContext`] that does not track dependencies.
    pub fn untrack<T>(&mut self, f: impl FnOnce(&mut SignalContext) -> T) -> T {
        f(&mut SignalContext::new(None))
    }

    pub(crate) fn declare(&mut self, source: Rc<dyn BindSource>, version: Version) {
        if let Some(collector) = &mut self.collector {
            collector.declare(source, version);
        }
    }
}
