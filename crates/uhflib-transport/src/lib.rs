//! uhflib-transport: Serial transport and connection state machine.
//!
//! [`SerialTransport`] is the tokio-serial implementation of the
//! [`Transport`](uhflib_core::Transport) trait. [`SerialLink`] sits on top
//! of any [`PortOpener`](uhflib_core::PortOpener): it opens the port, powers
//! the module through its enable line, runs the read loop, and publishes
//! connection state and inbound bytes to any number of subscribers.

pub mod link;
pub mod serial;

pub use link::{LinkConfig, SerialLink};
pub use serial::{EnableLine, SerialConfig, SerialOpener, SerialTransport, available_ports};
