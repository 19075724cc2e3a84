use std::{any::Any, fmt, rc::Rc};

use parse_display::Display;

#[cfg(test)]
mod tests;

/// Failure produced while resolving a signal or while running a subscriber or an effect.
///
/// Errors are cheap to clone. A signal whose resolver failed keeps the error and returns a clone of it
/// on every read until one of its dependencies changes.
#[non_exhaustive]
#[derive(Clone, Debug, Display)]
pub enum Error {
    /// A signal was read again while it was still computing its first value.
    #[display("detect cyclic dependency")]
    Cyclic,

    /// A value raised by user code.
    #[display("{0}")]
    Thrown(Thrown),
}

impl Error {
    /// Wraps an arbitrary value raised by a resolver or a callback.
    pub fn thrown(value: impl Any + fmt::Debug) -> Self {
        Error::Thrown(Thrown::new(value))
    }

    pub fn is_cyclic(&self) -> bool {
        matches!(self, Error::Cyclic)
    }

    /// Returns the raised value if it is of type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Error::Cyclic => None,
            Error::Thrown(thrown) => thrown.downcast_ref(),
        }
    }
}

impl std::error::Error for Error {}

/// A value raised by user code, passed through the graph without conversion.
#[derive(Clone)]
pub struct Thrown(Rc<dyn ThrownValue>);

impl Thrown {
    pub fn new(value: impl Any + fmt::Debug) -> Self {
        Self(Rc::new(value))
    }
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }

    /// Returns true if both refer to the same raised value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}
impl fmt::Debug for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_value(f)
    }
}
impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_value(f)
    }
}

trait ThrownValue {
    fn as_any(&self) -> &dyn Any;
    fn fmt_value(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}
impl<T: Any + fmt::Debug> ThrownValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn fmt_value(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
