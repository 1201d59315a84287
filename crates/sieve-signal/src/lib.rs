#![allow(clippy::missing_fields_in_debug)]

//! Sieve Signals
//!
//! A `Signal<A>` is a synchronous, priority-ordered multicast callback
//! registry. It is the only notification primitive used by the reactive
//! index: entities announce structural changes through signals, the engine
//! routes them to queries through signals, and queries notify systems
//! through signals.
//!
//! # Ordering
//!
//! Handlers run in ascending [`Priority`] order. Handlers sharing a priority
//! run in the order they were first connected.
//!
//! # Example
//!
//! ```ignore
//! use std::rc::Rc;
//! use sieve_signal::{Handler, Priority, Signal};
//!
//! let signal = Signal::<u32>::new();
//! let log: Handler<u32> = Rc::new(|value| println!("got {value}"));
//! signal.connect(Rc::clone(&log), Priority::DEFAULT);
//! signal.emit(&42);
//! signal.disconnect(&log);
//! ```

mod error;
mod signal;

pub use error::{SignalError, SignalResult};
pub use signal::{Handler, Priority, Signal};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Handler, Priority, Signal, SignalError};
}
