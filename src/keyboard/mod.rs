//! Keyboard dispatcher for terminal UIs
//!
//! One dispatcher task multiplexes stack updates, key presses, handler acks
//! and cancellation. Every [`Handler`] runs on its own task and talks back
//! over a shared control channel.
//!
//! ```text
//!             stack updates ──┐
//!   keys_from_reader ─► keys ─┼─► Dispatcher ─► Event ─► Handler task (one per key)
//!             cancellation ───┘        ▲                      │
//!                                      └────── Control ◄──────┘
//! ```

mod dispatcher;
mod handler;

pub use dispatcher::{DEFAULT_SHUTDOWN_TIMEOUT, Dispatcher, KeyPress, MenuItem, ShutdownReport, keys_from_reader};
pub use handler::{Control, Event, Handler, Operation, Stack};
