use crate::{Error, Signal, SignalContext, State};

use super::{Equality, Resolver, SignalNode};

/// A builder for creating a [`Signal`] or a [`State`] with a custom equality.
///
/// Without [`dedup`](Self::dedup) or [`equality`](Self::equality), every resolution counts as a change.
pub struct SignalBuilder<T: 'static> {
    value: Option<T>,
    resolver: Option<Resolver<T>>,
    equality: Equality<T>,
}

impl<T: Clone + 'static> SignalBuilder<T> {
    /// Derived signal with dynamic dependencies.
    pub fn new(f: impl Fn(&mut SignalContext) -> Result<T, Error> + 'static) -> Self {
        Self {
            value: None,
            resolver: Some(Box::new(f)),
            equality: Equality::AlwaysChanged,
        }
    }

    /// Derived signal whose resolver reads no signals.
    pub fn from_fn(f: impl Fn() -> Result<T, Error> + 'static) -> Self {
        Self::new(move |_| f())
    }

    /// Root signal holding `value`.
    pub fn from_value(value: T) -> Self {
        Self {
            value: Some(value),
            resolver: None,
            equality: Equality::AlwaysChanged,
        }
    }

    /// Treat values equal by `PartialEq` as unchanged.
    pub fn dedup(self) -> Self
    where
        T: PartialEq,
    {
        self.equality(|new, old| new == old)
    }

    /// Treat values for which `f` returns `true` as unchanged.
    pub fn equality(mut self, f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equality = Equality::by(f);
        self
    }

    /// Treat every write and every resolution as a change.
    pub fn always_changed(mut self) -> Self {
        self.equality = Equality::AlwaysChanged;
        self
    }

    pub fn build(self) -> Signal<T> {
        Signal(SignalNode::new(self.value, self.resolver, self.equality))
    }

    /// Build a writable root signal.
    ///
    /// # Panics
    ///
    /// Panics if the builder was created from a resolver.
    pub fn build_state(self) -> State<T> {
        assert!(
            self.resolver.is_none(),
            "`build_state` requires a builder created by `from_value`."
        );
        State::from_node(SignalNode::new(self.value, None, self.equality))
    }
}
