use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use parse_display::Display;
use slabmap::SlabMap;

use crate::{
    core::{schedule_deliver, BindSource, Deliver, Version},
    signal::SignalNode,
    Error, Signal, Subscription,
};


/// When a subscriber receives a changed value.
#[derive(Clone, Copy, Debug, Display, Default, Eq, PartialEq)]
#[display(style = "snake_case")]
pub enum Delivery {
    /// Synchronously, while the batch that changed the value is flushed.
    #[default]
    Eager,
    /// Later, when [`Runtime::dispatch_deferred`](crate::Runtime::dispatch_deferred) runs.
    Deferred,
}

/// Options for [`Signal::subscribe_with`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SubscribeOptions {
    pub delivery: Delivery,
    /// Deliver the current value before `subscribe_with` returns.
    pub immediate: bool,
}
impl SubscribeOptions {
    pub fn eager() -> Self {
        Self::default()
    }
    pub fn deferred() -> Self {
        Self {
            delivery: Delivery::Deferred,
            immediate: false,
        }
    }
    pub fn immediate(self) -> Self {
        Self {
            immediate: true,
            ..self
        }
    }
}

type SubscriberFn<T> = Box<dyn FnMut(&T) -> Result<(), Error>>;

pub(crate) struct Subscriber<T> {
    f: RefCell<SubscriberFn<T>>,
    delivery: Delivery,
    seen: Cell<Option<Version>>,
}
impl<T> Subscriber<T> {
    fn deliver(&self, value: &T, version: Version) -> Result<(), Error> {
        if self.seen.get() == Some(version) {
            return Ok(());
        }
        let Ok(mut f) = self.f.try_borrow_mut() else {
            return Ok(());
        };
        self.seen.set(Some(version));
        (*f)(value)
    }
}

pub(crate) struct Subscribers<T>(SlabMap<Rc<Subscriber<T>>>);

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self(SlabMap::new())
    }
    fn targets(&self, delivery: Delivery) -> Vec<Rc<Subscriber<T>>> {
        self.0
            .values()
            .filter(|s| s.delivery == delivery)
            .cloned()
            .collect()
    }
    fn has(&self, delivery: Delivery) -> bool {
        self.0.values().any(|s| s.delivery == delivery)
    }
}

impl<T: Clone + 'static> SignalNode<T> {
    fn subscribe(
        self: &Rc<Self>,
        f: SubscriberFn<T>,
        delivery: Delivery,
        immediate: bool,
    ) -> (Subscription, Rc<Subscriber<T>>) {
        // Resolving binds the signal to its sources so that later changes reach it.
        let version = self.clone().refresh();
        let seen = (!immediate).then_some(version);
        let subscriber = Rc::new(Subscriber {
            f: RefCell::new(f),
            delivery,
            seen: Cell::new(seen),
        });
        let key = self.subscribers.borrow_mut().0.insert(subscriber.clone());
        let subscription = Subscription::from_rc_fn(self.clone(), move |node| {
            let removed = node.subscribers.borrow_mut().0.remove(key);
            drop(removed);
        });
        (subscription, subscriber)
    }

    /// Delivers to eager subscribers and queues deferred ones.
    pub(crate) fn flush_subscribers(self: &Rc<Self>) -> Result<(), Error> {
        let (eager, has_deferred) = {
            let subscribers = self.subscribers.borrow();
            (
                subscribers.targets(Delivery::Eager),
                subscribers.has(Delivery::Deferred),
            )
        };
        if has_deferred && !self.deferred_queued.replace(true) {
            let node: Weak<dyn Deliver> = Rc::downgrade(self) as Weak<dyn Deliver>;
            schedule_deliver(node);
        }
        self.deliver_to(eager)
    }

    fn deliver_to(self: &Rc<Self>, targets: Vec<Rc<Subscriber<T>>>) -> Result<(), Error> {
        if targets.is_empty() {
            return Ok(());
        }
        let value = self.read()?;
        let version = self.version();
        let mut first_error = None;
        for s in targets {
            if let Err(e) = s.deliver(&value, version) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<T: Clone + 'static> Deliver for SignalNode<T> {
    fn deliver(self: Rc<Self>) -> Result<(), Error> {
        self.deferred_queued.set(false);
        let targets = self.subscribers.borrow().targets(Delivery::Deferred);
        self.deliver_to(targets)
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Call `f` with the new value each time the value of this signal changes.
    ///
    /// `f` is called while the batch that changed the value is flushed. It is not called for the
    /// current value. If the returned [`Subscription`] is dropped, `f` will not be called again.
    pub fn subscribe(&self, mut f: impl FnMut(&T) + 'static) -> Subscription {
        self.try_subscribe(move |value| {
            f(value);
            Ok(())
        })
    }

    /// Same as [`subscribe`](Self::subscribe), but `f` can fail.
    ///
    /// A failure does not prevent other subscribers from being called. It is returned to the code that
    /// triggered the delivery.
    pub fn try_subscribe(
        &self,
        f: impl FnMut(&T) -> Result<(), Error> + 'static,
    ) -> Subscription {
        self.0.subscribe(Box::new(f), Delivery::Eager, false).0
    }

    /// Subscribe with [`SubscribeOptions`].
    ///
    /// Fails only if `options.immediate` is set and reading the current value fails.
    pub fn subscribe_with(
        &self,
        mut f: impl FnMut(&T) + 'static,
        options: SubscribeOptions,
    ) -> Result<Subscription, Error> {
        self.try_subscribe_with(
            move |value| {
                f(value);
                Ok(())
            },
            options,
        )
    }

    pub fn try_subscribe_with(
        &self,
        f: impl FnMut(&T) -> Result<(), Error> + 'static,
        options: SubscribeOptions,
    ) -> Result<Subscription, Error> {
        let (subscription, subscriber) =
            self.0
                .subscribe(Box::new(f), options.delivery, options.immediate);
        if options.immediate {
            let value = self.0.read()?;
            subscriber.deliver(&value, self.0.version())?;
        }
        Ok(subscription)
    }
}
