//! Fine-grained reactive values for single-threaded programs.
//!
//! - [`State`] holds a writable value.
//! - [`Signal`] derives a value from other signals; it is recomputed lazily, only when a signal it read
//!   actually changed.
//! - [`watch`] runs a side effect now and again whenever a signal it read changes.
//! - [`batch`] groups writes so that dependents observe them once, with the final values.
//!
//! A [`Runtime`] must exist on the thread while signals are written.
//!
//! ```
//! use sigver::{Runtime, Signal, State};
//!
//! let mut rt = Runtime::new();
//! let a = State::new(1);
//! let b = Signal::new({
//!     let a = a.clone();
//!     move |sc| Ok(a.get(sc) + 1)
//! });
//! assert_eq!(b.get(&mut rt.sc())?, 2);
//!
//! a.set(2)?;
//! assert_eq!(b.get(&mut rt.sc())?, 3);
//! # Ok::<(), sigver::Error>(())
//! ```

pub mod core;
mod effect_fn;
mod error;
mod signal;
mod state;
mod subscribe_fn;
mod subscription;

pub use crate::core::{batch, batch_flush, batch_start, Runtime, SignalContext, Version};
pub use effect_fn::*;
pub use error::*;
pub use signal::*;
pub use state::*;
pub use subscribe_fn::{Delivery, SubscribeOptions};
pub use subscription::*;
