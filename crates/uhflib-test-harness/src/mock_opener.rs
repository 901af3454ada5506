//! Scripted [`PortOpener`] for driving the connection state machine.
//!
//! Each call to `open()` consumes the next queued outcome: either a
//! [`MockTransport`] or a failure message. Opening with an empty queue
//! fails, as a missing device would.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use uhflib_core::error::{Error, Result};
use uhflib_core::transport::{PortOpener, Transport};

use crate::mock_serial::MockTransport;

#[derive(Debug)]
enum OpenOutcome {
    Ready(MockTransport),
    Fail(String),
}

#[derive(Debug, Default)]
struct OpenerState {
    outcomes: VecDeque<OpenOutcome>,
    opened: Vec<(String, u32)>,
}

/// A [`PortOpener`] that hands out pre-built mock transports.
///
/// Clones share the same queue, so a test can keep one clone for
/// inspection after boxing another into a link.
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    state: Arc<Mutex<OpenerState>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: an opener whose first `open()` yields `transport`.
    pub fn with_transport(transport: MockTransport) -> Self {
        let opener = Self::new();
        opener.push(transport);
        opener
    }

    fn lock(&self) -> MutexGuard<'_, OpenerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a transport for the next `open()`.
    pub fn push(&self, transport: MockTransport) {
        self.lock().outcomes.push_back(OpenOutcome::Ready(transport));
    }

    /// Queue a failure for the next `open()`.
    pub fn push_failure(&self, message: &str) {
        self.lock()
            .outcomes
            .push_back(OpenOutcome::Fail(message.to_string()));
    }

    /// Every `(port, baud_rate)` pair `open()` was called with.
    pub fn opened_ports(&self) -> Vec<(String, u32)> {
        self.lock().opened.clone()
    }
}

#[async_trait]
impl PortOpener for MockOpener {
    async fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>> {
        let mut state = self.lock();
        state.opened.push((port.to_string(), baud_rate));
        match state.outcomes.pop_front() {
            Some(OpenOutcome::Ready(transport)) => Ok(Box::new(transport)),
            Some(OpenOutcome::Fail(message)) => Err(Error::Transport(format!(
                "Failed to open serial port {port}: {message}"
            ))),
            None => Err(Error::Transport(format!("no such port: {port}"))),
        }
    }
}
