//! UhfReader -- the tag-operations API for one reader module.
//!
//! This ties the frame codec ([`frame`](crate::frame), [`commands`]) to a
//! [`SerialLink`] to produce a working reader. Outbound commands are
//! written through the link; replies come back through the dispatch task,
//! which resolves the single pending request or publishes tag observations.
//!
//! Only one command awaits a response at a time. A second request issued
//! while one is in flight fails fast with [`Error::Busy`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use uhflib_core::error::{Error, Result};
use uhflib_core::events::ReaderEvent;
use uhflib_core::settings::ACCESS_PASSWORD_LEN;
use uhflib_core::types::{ConnectionState, EPC_LEN, TagPollData};
use uhflib_transport::SerialLink;

use crate::commands;
use crate::dispatch::{Shared, dispatch_loop};
use crate::frame::Frame;

/// Orchestrator configuration assembled by [`ReaderBuilder`](crate::builder::ReaderBuilder).
#[derive(Debug, Clone)]
pub(crate) struct ReaderConfig {
    pub serial_port: Option<String>,
    pub baud_rate: u32,
    pub access_password: [u8; ACCESS_PASSWORD_LEN],
    pub command_timeout: Duration,
    /// Applied after every successful connect.
    pub rf_power: Option<u8>,
}

/// A UHF RFID reader module behind a serial link.
///
/// Constructed via [`ReaderBuilder`](crate::builder::ReaderBuilder). The
/// port is not opened until [`connect`](Self::connect) or
/// [`connect_configured`](Self::connect_configured).
pub struct UhfReader {
    link: SerialLink,
    shared: Arc<Shared>,
    config: ReaderConfig,
    dispatch_cancel: CancellationToken,
    dispatch_task: JoinHandle<()>,
}

impl Drop for UhfReader {
    fn drop(&mut self) {
        self.dispatch_cancel.cancel();
        self.dispatch_task.abort();
    }
}

impl UhfReader {
    /// Wrap `link` and start the dispatch task.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn new(link: SerialLink, config: ReaderConfig) -> Self {
        let shared = Arc::new(Shared::new());
        let dispatch_cancel = CancellationToken::new();
        let dispatch_task = tokio::spawn(dispatch_loop(
            Arc::clone(&shared),
            link.subscribe_bytes(),
            link.subscribe_state(),
            dispatch_cancel.clone(),
        ));
        UhfReader {
            link,
            shared,
            config,
            dispatch_cancel,
            dispatch_task,
        }
    }

    // ---------------------------------------------------------------
    // Connection
    // ---------------------------------------------------------------

    /// Open `port` and power the module up.
    ///
    /// If an RF power level is configured it is applied once connected; a
    /// failure to apply it is logged, not returned.
    pub async fn connect(&self, port: &str, baud_rate: u32) -> Result<()> {
        self.shared.fail_pending();
        self.shared.end_polling();
        self.link.connect(port, baud_rate).await?;

        if let Some(dbm) = self.config.rf_power {
            if let Err(e) = self.set_rf_power(i32::from(dbm)).await {
                warn!(rf_power = dbm, error = %e, "failed to apply configured RF power");
            }
        }
        Ok(())
    }

    /// Connect using the port and baud rate given to the builder.
    pub async fn connect_configured(&self) -> Result<()> {
        let port = self.config.serial_port.clone().ok_or_else(|| {
            Error::InvalidParameter("no serial port configured".into())
        })?;
        self.connect(&port, self.config.baud_rate).await
    }

    /// Stop polling (best effort), power the module down, and close the port.
    ///
    /// Any request still awaiting a response fails with
    /// [`Error::ConnectionLost`].
    pub async fn disconnect(&self) -> Result<()> {
        if self.shared.is_polling() && self.link.is_connected() {
            if let Err(e) = self.stop_polling().await {
                debug!(error = %e, "stop polling before disconnect failed");
            }
        }
        let result = self.link.disconnect().await;
        self.shared.fail_pending();
        self.shared.end_polling();
        result
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Current link state.
    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Subscribe to link state changes; the receiver holds the current state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.subscribe_state()
    }

    /// Subscribe to tag observations.
    pub fn subscribe_tags(&self) -> broadcast::Receiver<TagPollData> {
        self.shared.subscribe_tags()
    }

    /// Subscribe to connection and tag events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ReaderEvent> {
        self.shared.subscribe_events()
    }

    pub fn link(&self) -> &SerialLink {
        &self.link
    }

    pub fn command_timeout(&self) -> Duration {
        self.config.command_timeout
    }

    /// Password sent with tag write operations.
    pub fn access_password(&self) -> [u8; ACCESS_PASSWORD_LEN] {
        self.config.access_password
    }

    // ---------------------------------------------------------------
    // Request/response
    // ---------------------------------------------------------------

    /// Send `bytes` and wait for the response to `command`.
    async fn exchange(&self, command: u8, bytes: &[u8]) -> Result<Frame> {
        if !self.link.is_connected() {
            debug!(command, "command skipped, reader not connected");
            return Err(Error::NotConnected);
        }

        let (_guard, reply_rx) = self.shared.claim(command)?;
        self.link.write(bytes).await?;

        match tokio::time::timeout(self.config.command_timeout, reply_rx).await {
            Ok(Ok(frame)) => {
                debug!(command, frame = %frame.describe(), "response received");
                Ok(frame)
            }
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                warn!(
                    command,
                    timeout_ms = self.config.command_timeout.as_millis() as u64,
                    "no response from reader"
                );
                Err(Error::Timeout)
            }
        }
    }

    // ---------------------------------------------------------------
    // Polling
    // ---------------------------------------------------------------

    /// Start continuous polling until stopped.
    pub async fn start_polling(&self) -> Result<()> {
        self.start_polling_count(0).await
    }

    /// Start continuous polling for `count` inventory rounds (0 = unbounded).
    ///
    /// Returns `Ok` without resending if polling is already active.
    pub async fn start_polling_count(&self, count: u16) -> Result<()> {
        if !self.link.is_connected() {
            return Err(Error::NotConnected);
        }
        let bytes = commands::start_polling(count)?;
        if !self.shared.begin_polling() {
            debug!("already polling");
            return Ok(());
        }
        if let Err(e) = self.link.write(&bytes).await {
            self.shared.end_polling();
            return Err(e);
        }
        info!(count, "polling started");
        Ok(())
    }

    /// Stop continuous polling. Returns `Ok` if polling was not active.
    pub async fn stop_polling(&self) -> Result<()> {
        if !self.link.is_connected() {
            return Err(Error::NotConnected);
        }
        if !self.shared.end_polling() {
            debug!("not polling");
            return Ok(());
        }
        self.link.write(&commands::stop_polling()?).await?;
        info!("polling stopped");
        Ok(())
    }

    pub fn is_polling(&self) -> bool {
        self.shared.is_polling()
    }

    /// Inventory once and return the tags reported (zero or one).
    pub async fn single_poll(&self) -> Result<Vec<TagPollData>> {
        let frame = self
            .exchange(commands::SINGLE_POLL, &commands::single_poll()?)
            .await?;
        commands::parse_single_poll(&frame)
    }

    // ---------------------------------------------------------------
    // RF power
    // ---------------------------------------------------------------

    /// Set RF output power in dBm (0-30).
    pub async fn set_rf_power(&self, dbm: i32) -> Result<()> {
        let bytes = commands::set_rf_power(dbm)?;
        let frame = self.exchange(commands::SET_RF_POWER, &bytes).await?;
        commands::check_response(&frame)?;
        info!(rf_power = dbm, "RF power set");
        Ok(())
    }

    /// Read RF output power in dBm.
    pub async fn get_rf_power(&self) -> Result<u8> {
        let frame = self
            .exchange(commands::GET_RF_POWER, &commands::get_rf_power()?)
            .await?;
        commands::parse_rf_power(&frame)
    }

    // ---------------------------------------------------------------
    // Tag operations
    // ---------------------------------------------------------------

    /// Write a 12-byte EPC to the tag in the field using the configured
    /// access password.
    pub async fn write_epc(&self, epc: &[u8]) -> Result<()> {
        let bytes = commands::write_epc(&self.config.access_password, epc)?;
        let frame = self.exchange(commands::WRITE_EPC, &bytes).await?;
        commands::check_response(&frame)?;
        info!(epc = %uhflib_core::bytes_to_hex(epc), "EPC written");
        Ok(())
    }

    /// Lock tag memory with a 4-byte password and 3-byte lock payload.
    pub async fn lock_tag(&self, password: &[u8], payload: &[u8]) -> Result<()> {
        let bytes = commands::lock_tag(password, payload)?;
        let frame = self.exchange(commands::LOCK_TAG, &bytes).await?;
        commands::check_response(&frame)?;
        info!("tag locked");
        Ok(())
    }

    /// Wait up to `timeout` for a tag with EPC `expected` to be observed.
    ///
    /// Observes tag notices whether or not polling was started through this
    /// reader. Returns `Ok(false)` on timeout.
    pub async fn verify_epc(&self, expected: &[u8], timeout: Duration) -> Result<bool> {
        if expected.len() != EPC_LEN {
            return Err(Error::InvalidParameter(format!(
                "EPC must be {EPC_LEN} bytes, got {}",
                expected.len()
            )));
        }

        let mut tags = self.shared.subscribe_tags();
        let _observer = self.shared.observe();

        let seen = async {
            loop {
                match tags.recv().await {
                    Ok(tag) if tag.epc[..] == *expected => return true,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "verification lagged behind tag stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        std::future::pending::<()>().await;
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, seen).await {
            Ok(found) => {
                debug!(epc = %uhflib_core::bytes_to_hex(expected), "EPC verified");
                Ok(found)
            }
            Err(_) => {
                debug!(epc = %uhflib_core::bytes_to_hex(expected), "EPC not seen before timeout");
                Ok(false)
            }
        }
    }
}
