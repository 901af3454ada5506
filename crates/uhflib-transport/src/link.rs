//! Connection state machine for the serial link to the reader module.
//!
//! [`SerialLink`] owns the physical port and the module-enable control line.
//! While connected, a single IO task owns the transport exclusively: it
//! forwards every inbound chunk to a broadcast byte stream and executes
//! write / control-line / shutdown requests sent over an mpsc channel.
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected --disconnect--> Disconnected
//!                           Connecting --fail--> Error --connect--> Connecting
//!                                                Connected --device error--> Error
//! ```
//!
//! State changes are published on a [`watch`] channel, so every subscriber
//! (including late ones) sees the current state immediately.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use uhflib_core::error::{Error, Result};
use uhflib_core::transport::{PortOpener, Transport};
use uhflib_core::types::ConnectionState;

use crate::serial::{EnableLine, SerialOpener};

/// Size of a single read from the transport.
const READ_CHUNK: usize = 256;

/// Timing and wiring for a [`SerialLink`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Control line wired to the module's enable pin.
    pub enable_line: EnableLine,
    /// Wait after raising the enable line before the module accepts commands.
    pub settle_delay: Duration,
    /// Wait after dropping the enable line before the port is released.
    pub power_down_delay: Duration,
    /// Upper bound on a single write, including the trip through the IO task.
    pub write_timeout: Duration,
    /// How long a single transport read waits before the IO task re-checks
    /// its request channel.
    pub read_timeout: Duration,
    /// Capacity of the inbound byte broadcast channel (in chunks).
    pub stream_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            enable_line: EnableLine::Dtr,
            settle_delay: Duration::from_millis(100),
            power_down_delay: Duration::from_millis(50),
            write_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_millis(100),
            stream_capacity: 256,
        }
    }
}

/// A request sent from link methods to the IO task.
enum Request {
    /// Write raw bytes to the port.
    Write {
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Drive the module-enable line.
    SetEnable {
        on: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Power the module down, stop reading, and hand the transport back.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to a running IO task.
struct LinkIo {
    cmd_tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The serial link to one reader module.
///
/// Construct one per physical reader and share it (e.g. in an `Arc`) with
/// whatever needs the byte stream.
pub struct SerialLink {
    opener: Box<dyn PortOpener>,
    config: LinkConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    bytes_tx: broadcast::Sender<Bytes>,
    io: Mutex<Option<LinkIo>>,
}

impl SerialLink {
    /// Create a link that opens ports through `opener`.
    pub fn new(opener: Box<dyn PortOpener>, config: LinkConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::disconnected());
        let (bytes_tx, _) = broadcast::channel(config.stream_capacity.max(1));
        SerialLink {
            opener,
            config,
            state_tx: Arc::new(state_tx),
            bytes_tx,
            io: Mutex::new(None),
        }
    }

    /// Create a link backed by real serial ports.
    pub fn serial(config: LinkConfig) -> Self {
        Self::new(Box::new(SerialOpener), config)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected()
    }

    /// Subscribe to connection state changes.
    ///
    /// The receiver starts out holding the current state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to inbound byte chunks.
    ///
    /// Chunks are delivered exactly as read from the port; frame boundaries
    /// are not preserved.
    pub fn subscribe_bytes(&self) -> broadcast::Receiver<Bytes> {
        self.bytes_tx.subscribe()
    }

    fn publish(&self, state: ConnectionState) {
        debug!(state = %state, "link state change");
        self.state_tx.send_replace(state);
    }

    /// Open `port`, raise the enable line, and wait for the module to boot.
    ///
    /// Any failure leaves the link in [`ConnectionStatus::Error`](uhflib_core::ConnectionStatus::Error)
    /// with the enable line released. Calling `connect` while a port is
    /// already open closes it first.
    pub async fn connect(&self, port: &str, baud_rate: u32) -> Result<()> {
        let mut io = self.io.lock().await;
        if let Some(existing) = io.take() {
            debug!(port = %port, "connect requested while open, closing current port first");
            self.shutdown_io(existing).await;
        }

        self.publish(ConnectionState::connecting(port, baud_rate));

        let mut transport = match self.opener.open(port, baud_rate).await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(port = %port, error = %e, "failed to open reader port");
                self.publish(ConnectionState::error(Some(port), Some(baud_rate), e.to_string()));
                return Err(e);
            }
        };

        if let Err(e) = self.config.enable_line.set(&mut *transport, true).await {
            tracing::error!(port = %port, error = %e, "failed to assert module enable line");
            power_down(&mut *transport, self.config.enable_line, port).await;
            self.publish(ConnectionState::error(Some(port), Some(baud_rate), e.to_string()));
            return Err(e);
        }

        tokio::time::sleep(self.config.settle_delay).await;

        self.publish(ConnectionState::connected(port, baud_rate));
        *io = Some(spawn_io_task(
            transport,
            port.to_string(),
            self.config.clone(),
            self.bytes_tx.clone(),
            Arc::clone(&self.state_tx),
        ));

        tracing::info!(port = %port, baud_rate, "reader link connected");
        Ok(())
    }

    /// Power the module down and close the port.
    ///
    /// The enable line is released before the port handle, so the module is
    /// never left energised. Disconnecting an idle link is a no-op that
    /// still lands in `Disconnected` (clearing a previous error).
    pub async fn disconnect(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        if let Some(existing) = io.take() {
            self.shutdown_io(existing).await;
            tracing::info!("reader link disconnected");
        }
        self.publish(ConnectionState::disconnected());
        Ok(())
    }

    async fn shutdown_io(&self, io: LinkIo) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let transport = match io.cmd_tx.send(Request::Shutdown { reply: reply_tx }).await {
            Ok(()) => reply_rx.await.ok(),
            // IO task already gone (device error); it closed the port itself.
            Err(_) => None,
        };
        if let Some(mut transport) = transport {
            if let Err(e) = transport.close().await {
                tracing::warn!(error = %e, "error closing reader port");
            }
        }
        let _ = io.task.await;
    }

    async fn request_sender(&self) -> Result<mpsc::Sender<Request>> {
        let io = self.io.lock().await;
        io.as_ref()
            .map(|io| io.cmd_tx.clone())
            .ok_or(Error::NotConnected)
    }

    /// Write `data` to the port.
    ///
    /// Fails with [`Error::NotConnected`] without touching the port unless
    /// the link is connected; bounded by [`LinkConfig::write_timeout`].
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            debug!(bytes = data.len(), "write skipped, link not connected");
            return Err(Error::NotConnected);
        }
        let cmd_tx = self.request_sender().await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(Request::Write {
                data: Bytes::copy_from_slice(data),
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match tokio::time::timeout(self.config.write_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Drive the module-enable line without closing the port.
    pub async fn set_module_enabled(&self, on: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let cmd_tx = self.request_sender().await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(Request::SetEnable { on, reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;

        reply_rx.await.map_err(|_| Error::NotConnected)??;
        self.state_tx.send_modify(|state| state.module_enabled = on);
        Ok(())
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        // The IO task powers the module down and closes the port on cancel.
        if let Some(io) = self.io.get_mut().take() {
            io.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// IO task
// ---------------------------------------------------------------------------

fn spawn_io_task(
    transport: Box<dyn Transport>,
    port_name: String,
    config: LinkConfig,
    bytes_tx: broadcast::Sender<Bytes>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
) -> LinkIo {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(io_loop(
        transport,
        port_name,
        config,
        bytes_tx,
        state_tx,
        cmd_rx,
        cancel.clone(),
    ));

    LinkIo {
        cmd_tx,
        cancel,
        task,
    }
}

/// Release the enable line and close the port, ignoring failures.
async fn power_down(transport: &mut dyn Transport, enable_line: EnableLine, port_name: &str) {
    if let Err(e) = enable_line.set(transport, false).await {
        tracing::warn!(port = %port_name, error = %e, "failed to release module enable line");
    }
    if let Err(e) = transport.close().await {
        tracing::warn!(port = %port_name, error = %e, "failed to close reader port");
    }
}

/// The link IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Requests (write, enable line, shutdown)
/// 3. Reading inbound bytes
async fn io_loop(
    mut transport: Box<dyn Transport>,
    port_name: String,
    config: LinkConfig,
    bytes_tx: broadcast::Sender<Bytes>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    mut cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(port = %port_name, "link IO task cancelled");
                power_down(&mut *transport, config.enable_line, &port_name).await;
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Request::Write { data, reply }) => {
                        let result = transport.send(&data).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::SetEnable { on, reply }) => {
                        let result = config.enable_line.set(&mut *transport, on).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!(port = %port_name, "link IO task shutdown requested");
                        if let Err(e) = config.enable_line.set(&mut *transport, false).await {
                            tracing::warn!(port = %port_name, error = %e, "failed to release module enable line");
                        }
                        tokio::time::sleep(config.power_down_delay).await;
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!(port = %port_name, "all link handles dropped, exiting IO task");
                        power_down(&mut *transport, config.enable_line, &port_name).await;
                        break;
                    }
                }
            }

            result = transport.receive(&mut buf, config.read_timeout) => {
                match result {
                    Ok(0) | Err(Error::Timeout) => {}
                    Ok(n) => {
                        // No subscribers is fine; the bytes are simply dropped.
                        let _ = bytes_tx.send(Bytes::copy_from_slice(&buf[..n]));
                    }
                    Err(e) => {
                        tracing::error!(port = %port_name, error = %e, "reader port failed");
                        power_down(&mut *transport, config.enable_line, &port_name).await;
                        let baud_rate = state_tx.borrow().baud_rate;
                        state_tx.send_replace(ConnectionState::error(
                            Some(&port_name),
                            baud_rate,
                            e.to_string(),
                        ));
                        break;
                    }
                }
            }
        }
    }
}
