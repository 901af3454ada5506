//! uhflib-test-harness: Mock transports and port openers for uhflib.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! serial link and protocol layers without a reader module attached, and
//! [`MockOpener`] for driving the connection state machine through scripted
//! open results.

pub mod mock_opener;
pub mod mock_serial;

pub use mock_opener::MockOpener;
pub use mock_serial::{LineEvent, MockHandle, MockTransport};
