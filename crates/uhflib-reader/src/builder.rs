//! ReaderBuilder -- fluent builder for constructing [`UhfReader`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters, the module-enable wiring, the access password,
//! and timeout values before the reader is created. Building does not open
//! the port; call [`UhfReader::connect_configured`] for that.
//!
//! # Example
//!
//! ```no_run
//! use uhflib_reader::builder::ReaderBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> uhflib_core::Result<()> {
//! let reader = ReaderBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .baud_rate(115_200)
//!     .command_timeout(Duration::from_millis(800))
//!     .build()
//!     .await?;
//! reader.connect_configured().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use uhflib_core::error::{Error, Result};
use uhflib_core::settings::{
    ACCESS_PASSWORD_LEN, DEFAULT_BAUD_RATE, MAX_RF_POWER, ReaderSettings, SUPPORTED_BAUD_RATES,
};
use uhflib_core::transport::PortOpener;
use uhflib_transport::{EnableLine, LinkConfig, SerialLink, SerialOpener};

use crate::reader::{ReaderConfig, UhfReader};

/// Fluent builder for [`UhfReader`].
///
/// Defaults: 115200 baud, all-zero access password, 1 s command timeout,
/// 100 ms settle delay, module enable on DTR, RF power left as configured
/// in the module.
pub struct ReaderBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    access_password: [u8; ACCESS_PASSWORD_LEN],
    command_timeout: Duration,
    rf_power: Option<u8>,
    link: LinkConfig,
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderBuilder {
    pub fn new() -> Self {
        ReaderBuilder {
            serial_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            access_password: [0; ACCESS_PASSWORD_LEN],
            command_timeout: Duration::from_secs(1),
            rf_power: None,
            link: LinkConfig::default(),
        }
    }

    /// Start from stored settings.
    pub fn from_settings(settings: &ReaderSettings) -> Self {
        let mut builder = Self::new()
            .baud_rate(settings.baud_rate)
            .access_password(settings.password_or_default())
            .rf_power(settings.rf_power);
        if let Some(port) = &settings.port_name {
            builder = builder.serial_port(port);
        }
        builder
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Password sent with EPC writes (default: `00000000`).
    pub fn access_password(mut self, password: [u8; ACCESS_PASSWORD_LEN]) -> Self {
        self.access_password = password;
        self
    }

    /// Set the timeout for waiting for a response to a single command
    /// (default: 1 s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// RF power (dBm) applied after every connect. Clamped to 0-30.
    pub fn rf_power(mut self, dbm: u8) -> Self {
        self.rf_power = Some(dbm.min(MAX_RF_POWER));
        self
    }

    /// Delay between raising the enable line and the first command
    /// (default: 100 ms).
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.link.settle_delay = delay;
        self
    }

    /// Delay between dropping the enable line and closing the port
    /// (default: 50 ms).
    pub fn power_down_delay(mut self, delay: Duration) -> Self {
        self.link.power_down_delay = delay;
        self
    }

    /// Control line wired to the module's enable pin (default: DTR).
    pub fn enable_line(mut self, line: EnableLine) -> Self {
        self.link.enable_line = line;
        self
    }

    fn into_config(self) -> Result<(ReaderConfig, LinkConfig)> {
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(Error::InvalidParameter(format!(
                "unsupported baud rate {} (expected one of {:?})",
                self.baud_rate, SUPPORTED_BAUD_RATES
            )));
        }
        let link = LinkConfig {
            write_timeout: self.command_timeout,
            ..self.link
        };
        Ok((
            ReaderConfig {
                serial_port: self.serial_port,
                baud_rate: self.baud_rate,
                access_password: self.access_password,
                command_timeout: self.command_timeout,
                rf_power: self.rf_power,
            },
            link,
        ))
    }

    /// Build a [`UhfReader`] that opens ports through `opener`.
    ///
    /// This is the entry point for testing (pass a `MockOpener` from
    /// `uhflib-test-harness`).
    pub async fn build_with_opener(self, opener: Box<dyn PortOpener>) -> Result<UhfReader> {
        let (config, link) = self.into_config()?;
        Ok(UhfReader::new(SerialLink::new(opener, link), config))
    }

    /// Build a [`UhfReader`] backed by real serial ports.
    pub async fn build(self) -> Result<UhfReader> {
        self.build_with_opener(Box::new(SerialOpener)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uhflib_test_harness::{MockOpener, MockTransport};

    #[tokio::test]
    async fn builder_defaults() {
        let reader = ReaderBuilder::new()
            .build_with_opener(Box::new(MockOpener::new()))
            .await
            .unwrap();

        assert_eq!(reader.command_timeout(), Duration::from_secs(1));
        assert_eq!(reader.access_password(), [0, 0, 0, 0]);
        assert_eq!(reader.link().config().enable_line, EnableLine::Dtr);
        assert_eq!(reader.link().config().settle_delay, Duration::from_millis(100));
        assert!(!reader.is_connected());
    }

    #[tokio::test]
    async fn builder_rejects_unsupported_baud() {
        let result = ReaderBuilder::new()
            .baud_rate(12_345)
            .build_with_opener(Box::new(MockOpener::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn builder_fluent_chain() {
        let opener = MockOpener::with_transport(MockTransport::new());
        let reader = ReaderBuilder::new()
            .serial_port("/dev/ttyUSB3")
            .baud_rate(57_600)
            .access_password([1, 2, 3, 4])
            .command_timeout(Duration::from_millis(300))
            .settle_delay(Duration::from_millis(1))
            .power_down_delay(Duration::from_millis(1))
            .enable_line(EnableLine::Rts)
            .build_with_opener(Box::new(opener.clone()))
            .await
            .unwrap();

        assert_eq!(reader.access_password(), [1, 2, 3, 4]);
        assert_eq!(reader.link().config().enable_line, EnableLine::Rts);
        assert_eq!(reader.link().config().write_timeout, Duration::from_millis(300));

        reader.connect_configured().await.unwrap();
        assert_eq!(
            opener.opened_ports(),
            vec![("/dev/ttyUSB3".to_string(), 57_600)]
        );
        reader.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn builder_from_settings() {
        let settings = ReaderSettings {
            port_name: Some("COM7".into()),
            baud_rate: 9600,
            rf_power: 18,
            access_password: Some([0xAA, 0xBB, 0xCC, 0xDD]),
        };
        let reader = ReaderBuilder::from_settings(&settings)
            .build_with_opener(Box::new(MockOpener::new()))
            .await
            .unwrap();
        assert_eq!(reader.access_password(), [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn rf_power_is_clamped() {
        let builder = ReaderBuilder::new().rf_power(99);
        assert_eq!(builder.rf_power, Some(MAX_RF_POWER));
    }
}
