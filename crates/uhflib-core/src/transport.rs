//! Transport traits for reader communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the reader
//! module. The production implementation is the tokio-serial backed
//! `SerialTransport` in `uhflib-transport`; tests use `MockTransport` from
//! `uhflib-test-harness`.
//!
//! [`PortOpener`] is the factory the connection state machine uses to open
//! a transport, so that the same state machine can be driven by real ports
//! or by scripted mocks.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the reader module.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the reader.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the reader into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrived within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drive the DTR control line.
    async fn set_dtr(&mut self, on: bool) -> Result<()>;

    /// Drive the RTS control line.
    async fn set_rts(&mut self, on: bool) -> Result<()>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Opens transports by port name.
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open `port` at `baud_rate` with 8-N-1 framing.
    async fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>>;
}
