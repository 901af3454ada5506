//! Serial port transport for the reader module.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for the UART-over-USB bridge the reader module sits
//! behind. Framing is fixed at 8 data bits, 1 stop bit, no parity, no flow
//! control; only the baud rate is configurable.
//!
//! The bridge's DTR or RTS output is wired to the module's enable pin, so
//! both lines are released right after opening and the connection state
//! machine in [`crate::link`] raises the configured one explicitly.
//!
//! # Example
//!
//! ```no_run
//! use uhflib_transport::SerialTransport;
//! use uhflib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> uhflib_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 115_200).await?;
//! transport.set_dtr(true).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_millis(100)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use uhflib_core::error::{Error, Result};
use uhflib_core::settings::DEFAULT_BAUD_RATE;
use uhflib_core::transport::{PortOpener, Transport};

/// Serial control line wired to the reader module's enable pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnableLine {
    /// Data Terminal Ready.
    #[default]
    Dtr,
    /// Request To Send.
    Rts,
}

impl EnableLine {
    /// Drive this line on `transport`.
    pub async fn set(self, transport: &mut dyn Transport, on: bool) -> Result<()> {
        match self {
            EnableLine::Dtr => transport.set_dtr(on).await,
            EnableLine::Rts => transport.set_rts(on).await,
        }
    }
}

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate (9600 to 115200).
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Serial port transport for the reader module.
pub struct SerialTransport {
    port: Option<SerialStream>,
    /// Port name for logging.
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port at the given baud rate, 8-N-1.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_config(port, SerialConfig { baud_rate }).await
    }

    /// Open a serial port with an explicit configuration.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(port = %port, baud_rate = config.baud_rate, "Opening serial port");

        let mut serial_stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::Transport(format!("Failed to open serial port {}: {}", port, e))
            })?;

        // Many drivers assert DTR on open. Release both lines so the module
        // stays unpowered until the link raises the enable line itself.
        if let Err(e) = serial_stream.write_data_terminal_ready(false) {
            tracing::warn!(port = %port, error = %e, "Failed to de-assert DTR");
        }
        if let Err(e) = serial_stream.write_request_to_send(false) {
            tracing::warn!(port = %port, error = %e, "Failed to de-assert RTS");
        }

        tracing::info!(port = %port, baud_rate = config.baud_rate, "Serial port opened");

        Ok(Self {
            port: Some(serial_stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.port_name, bytes = data.len(), data = ?data, "Sending data");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to send data");
            map_io_error(e)
        })?;
        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to flush serial port");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            // A zero-length read on a tty means the device went away.
            Ok(Ok(0)) => Err(Error::ConnectionLost),
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.port_name, bytes = n, data = ?&buf[..n], "Received data");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        tracing::debug!(port = %self.port_name, on, "Setting DTR");
        port.write_data_terminal_ready(on)
            .map_err(|e| Error::Transport(format!("Failed to set DTR on {}: {}", self.port_name, e)))
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        tracing::debug!(port = %self.port_name, on, "Setting RTS");
        port.write_request_to_send(on)
            .map_err(|e| Error::Transport(format!("Failed to set RTS on {}: {}", self.port_name, e)))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }
            tracing::info!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, closing port");
        }
    }
}

/// [`PortOpener`] backed by real serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

#[async_trait]
impl PortOpener for SerialOpener {
    async fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>> {
        let transport = SerialTransport::open(port, baud_rate).await?;
        Ok(Box::new(transport))
    }
}

/// List the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::Transport(format!("Failed to enumerate serial ports: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_default_baud() {
        assert_eq!(SerialConfig::default().baud_rate, 115_200);
    }

    #[test]
    fn enable_line_defaults_to_dtr() {
        assert_eq!(EnableLine::default(), EnableLine::Dtr);
    }

    #[test]
    fn io_error_mapping() {
        let lost = map_io_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(lost, Error::ConnectionLost));
        let other = map_io_error(std::io::Error::new(std::io::ErrorKind::Other, "odd"));
        assert!(matches!(other, Error::Io(_)));
    }

    #[tokio::test]
    async fn open_missing_port_fails() {
        let result = SerialTransport::open("/dev/uhflib-no-such-port", 115_200).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
