//! Mock transport for deterministic testing of the link and protocol layers.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. Because the transport is moved into the link's
//! IO task once connected, all state lives behind a shared handle:
//! [`MockHandle`] stays with the test and can script responses, push
//! unsolicited bytes (tag notices), inspect what was sent, and simulate the
//! device disappearing.
//!
//! # Example
//!
//! ```
//! use uhflib_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! let handle = mock.handle();
//! // When the reader sends GET_POWER, answer with 20 dBm.
//! handle.expect(&[0xBB, 0x00, 0xB7, 0x00, 0x00, 0xB7, 0x7E],
//!               &[0xBB, 0x01, 0xB7, 0x00, 0x03, 0x10, 0x07, 0xD0, 0xA2, 0x7E]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use uhflib_core::error::{Error, Result};
use uhflib_core::transport::Transport;

/// A control-line change or close observed by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    Dtr(bool),
    Rts(bool),
    Closed,
}

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// Chunks to deliver, in order, once the request is seen.
    response: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct MockState {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Chunks waiting to be returned by `receive()`.
    inbound: VecDeque<Vec<u8>>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
    line_log: Vec<LineEvent>,
    fail_control_lines: bool,
    fail_next_send: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MockState>,
    /// Wakes a blocked `receive()` when bytes arrive or the link drops.
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy the next inbound chunk (or part of it) into `buf`.
    fn take_inbound(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        let Some(chunk) = state.inbound.front_mut() else {
            return Ok(None);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n == chunk.len() {
            state.inbound.pop_front();
        } else {
            chunk.drain(..n);
        }
        Ok(Some(n))
    }
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; the
/// corresponding response chunks are queued for `receive()`. Sending data
/// that does not match, or sending with the queue exhausted, returns
/// [`Error::Protocol`].
///
/// `receive()` waits up to its timeout for bytes, so an idle read loop does
/// not spin.
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Test-side handle to a [`MockTransport`] that has been moved elsewhere.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState {
                    expectations: VecDeque::new(),
                    inbound: VecDeque::new(),
                    connected: true,
                    sent_log: Vec::new(),
                    line_log: Vec::new(),
                    fail_control_lines: false,
                    fail_next_send: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// A handle that keeps working after the transport is boxed and moved.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Add an expected request/response pair.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.handle().expect(request, response);
    }

    /// All data sent through this transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.handle().sent_data()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, `response`
    /// becomes readable. An empty response queues nothing.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        let response = if response.is_empty() {
            Vec::new()
        } else {
            vec![response.to_vec()]
        };
        self.expect_chunks(request, response);
    }

    /// Like [`expect`](Self::expect), but the response is delivered as the
    /// given separate chunks, exercising reassembly.
    pub fn expect_chunks(&self, request: &[u8], chunks: Vec<Vec<u8>>) {
        self.shared.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: chunks,
        });
    }

    /// Make `data` readable without any preceding request.
    pub fn push_unsolicited(&self, data: &[u8]) {
        self.shared.lock().inbound.push_back(data.to_vec());
        self.shared.notify.notify_one();
    }

    /// All data sent through this transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent_log.clone()
    }

    /// Successful control-line changes and closes, in order.
    pub fn line_log(&self) -> Vec<LineEvent> {
        self.shared.lock().line_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.shared.lock().expectations.len()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent calls return [`Error::NotConnected`];
    /// a `receive()` already waiting is woken and fails, which is how tests
    /// simulate a cable pull.
    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().connected = connected;
        self.shared.notify.notify_one();
    }

    /// Make DTR/RTS changes fail with [`Error::Transport`].
    pub fn fail_control_lines(&self, fail: bool) {
        self.shared.lock().fail_control_lines = fail;
    }

    /// Make the next `send()` fail with an I/O error.
    pub fn fail_next_send(&self) {
        self.shared.lock().fail_next_send = true;
    }
}

impl MockState {
    fn set_line(&mut self, event: LineEvent) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.fail_control_lines {
            return Err(Error::Transport("mock control line failure".into()));
        }
        self.line_log.push(event);
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.shared.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }

        if state.fail_next_send {
            state.fail_next_send = false;
            return Err(Error::Io(std::io::Error::other("mock send failure")));
        }

        // Record what was sent.
        state.sent_log.push(data.to_vec());

        // Match against the next expectation.
        let Some(expectation) = state.expectations.pop_front() else {
            return Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            ));
        };
        if data != expectation.request.as_slice() {
            return Err(Error::Protocol(format!(
                "unexpected send data: expected {:02X?}, got {:02X?}",
                expectation.request, data
            )));
        }
        let queued = !expectation.response.is_empty();
        state.inbound.extend(expectation.response);
        drop(state);
        if queued {
            self.shared.notify.notify_one();
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if let Some(n) = self.shared.take_inbound(buf)? {
            return Ok(n);
        }
        let _ = tokio::time::timeout(timeout, self.shared.notify.notified()).await;
        match self.shared.take_inbound(buf)? {
            Some(n) => Ok(n),
            None => Err(Error::Timeout),
        }
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        self.shared.lock().set_line(LineEvent::Dtr(on))
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        self.shared.lock().set_line(LineEvent::Rts(on))
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.connected {
            state.connected = false;
            state.inbound.clear();
        }
        state.line_log.push(LineEvent::Closed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}
