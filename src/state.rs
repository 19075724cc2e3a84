use std::rc::Rc;

use derive_ex::derive_ex;
use serde::{Deserialize, Serialize};

use crate::{signal::SignalNode, Error, Signal, SignalBuilder, SignalContext};


/// Writable root of the signal graph.
///
/// Similar to `Rc<RefCell<T>>`, but reads through a [`SignalContext`] are tracked and writes notify
/// every signal and effect that depends on the state.
#[derive_ex(Clone, bound())]
pub struct State<T: 'static>(Rc<SignalNode<T>>);

impl<T: Clone + 'static> State<T> {
    /// Create a new `State` with the given initial value.
    ///
    /// Writing a value equal to the current one does not notify dependents.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        SignalBuilder::from_value(value).dedup().build_state()
    }

    pub(crate) fn from_node(node: Rc<SignalNode<T>>) -> Self {
        Self(node)
    }

    /// Gets the current value and adds a dependency on this `State` to the specified `SignalContext`.
    pub fn get(&self, sc: &mut SignalContext) -> T {
        sc.declare(self.0.clone(), self.0.version());
        self.value()
    }

    fn value(&self) -> T {
        match self.0.read() {
            Ok(value) => value,
            Err(e) => unreachable!("state has no resolver: {e}"),
        }
    }

    /// Sets the value of the state and notifies the dependencies if it changed.
    ///
    /// Outside a batch the notification is delivered before this method returns, and the first
    /// failure of a subscriber or an effect is returned.
    pub fn set(&self, value: T) -> Result<(), Error> {
        self.0.write(value)
    }

    /// Mutates the value in place and notifies the dependencies.
    ///
    /// The state must not be read from inside `f`.
    pub fn modify(&self, f: impl FnOnce(&mut T)) -> Result<(), Error> {
        self.0.modify(f)
    }

    /// Returns a function that sets the value of this state.
    pub fn setter(&self) -> impl Fn(T) -> Result<(), Error> + 'static {
        let this = self.clone();
        move |value| this.set(value)
    }

    /// Returns a `Signal` representing this state.
    pub fn to_signal(&self) -> Signal<T> {
        Signal(self.0.clone())
    }
}
impl<T: std::fmt::Debug> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt_debug(f)
    }
}
impl<T> Serialize for State<T>
where
    T: Serialize + Clone,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        T::serialize(&self.value(), serializer)
    }
}
impl<'de, T> Deserialize<'de> for State<T>
where
    T: Deserialize<'de> + Clone + PartialEq,
{
    fn deserialize<D>(deserializer: D) -> Result<State<T>, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        T::deserialize(deserializer).map(|value| State::new(value))
    }
}
