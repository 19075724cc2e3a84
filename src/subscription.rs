use std::{mem::take, rc::Rc};

#[cfg(test)]
mod tests;

/// Handle that detaches a subscriber or disposes an effect.
///
/// Dropping the handle has the same effect as calling [`dispose`](Self::dispose).
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }
    pub(crate) fn from_rc_fn<T: ?Sized + 'static>(
        this: Rc<T>,
        unsubscribe: impl FnOnce(Rc<T>) + 'static,
    ) -> Self {
        Self::from_fn(move || unsubscribe(this))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0, RawSubscription::Empty)
    }

    /// Detach now. Later calls and the eventual drop do nothing.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let RawSubscription::Fn(f) = take(&mut self.0) {
            f()
        }
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "Subscription(empty)")
        } else {
            write!(f, "Subscription(active)")
        }
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
}
