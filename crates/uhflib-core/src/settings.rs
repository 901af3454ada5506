//! Reader settings and the read-only settings store.
//!
//! Settings are owned by an external collaborator (an application
//! preferences store, a config file). This crate only ever reads them:
//! [`SettingsStore`] has no write path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::helpers::{bytes_to_hex, parse_hex};

/// Default serial baud rate of the reader module.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Baud rates the reader module can be configured for.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[9600, 19_200, 38_400, 57_600, 115_200];

/// Lowest RF output power in dBm.
pub const MIN_RF_POWER: u8 = 0;

/// Highest RF output power in dBm.
pub const MAX_RF_POWER: u8 = 30;

/// RF output power applied when nothing is configured.
pub const DEFAULT_RF_POWER: u8 = 20;

/// Length of a tag access password in bytes.
pub const ACCESS_PASSWORD_LEN: usize = 4;

/// Connection and radio settings for one reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderSettings {
    /// Serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    #[serde(default)]
    pub port_name: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// RF output power in dBm, clamped to 0-30.
    #[serde(default = "default_rf_power", deserialize_with = "clamped_rf_power")]
    pub rf_power: u8,
    /// Tag access password as hex (8 digits). Absent means all zeros.
    #[serde(default, with = "password_hex")]
    pub access_password: Option<[u8; ACCESS_PASSWORD_LEN]>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_rf_power() -> u8 {
    DEFAULT_RF_POWER
}

/// Accept any integer and clamp it into the RF power range.
fn clamped_rf_power<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u8, D::Error> {
    let dbm = i64::deserialize(deserializer)?;
    let clamped = dbm.clamp(i64::from(MIN_RF_POWER), i64::from(MAX_RF_POWER));
    if clamped != dbm {
        tracing::warn!(rf_power = dbm, clamped, "RF power out of range, clamping");
    }
    u8::try_from(clamped).map_err(serde::de::Error::custom)
}

impl Default for ReaderSettings {
    fn default() -> Self {
        ReaderSettings {
            port_name: None,
            baud_rate: DEFAULT_BAUD_RATE,
            rf_power: DEFAULT_RF_POWER,
            access_password: None,
        }
    }
}

impl ReaderSettings {
    /// Return a copy with `rf_power` clamped into range.
    pub fn with_rf_power(mut self, dbm: i32) -> Self {
        self.rf_power = dbm.clamp(MIN_RF_POWER as i32, MAX_RF_POWER as i32) as u8;
        self
    }

    /// The password to send with tag operations.
    pub fn password_or_default(&self) -> [u8; ACCESS_PASSWORD_LEN] {
        self.access_password.unwrap_or([0; ACCESS_PASSWORD_LEN])
    }

    /// Reject settings the reader cannot use.
    pub fn normalize(self) -> Result<Self> {
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(Error::Settings(format!(
                "unsupported baud rate {} (expected one of {:?})",
                self.baud_rate, SUPPORTED_BAUD_RATES
            )));
        }
        Ok(self)
    }
}

/// Serde adapter storing the access password as a hex string.
mod password_hex {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<[u8; ACCESS_PASSWORD_LEN]>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&bytes_to_hex(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<[u8; ACCESS_PASSWORD_LEN]>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        let Some(text) = text else {
            return Ok(None);
        };
        let bytes = parse_hex(&text).map_err(serde::de::Error::custom)?;
        let password: [u8; ACCESS_PASSWORD_LEN] = bytes.try_into().map_err(|_| {
            serde::de::Error::custom(format!(
                "access_password must be {ACCESS_PASSWORD_LEN} bytes"
            ))
        })?;
        Ok(Some(password))
    }
}

/// Read-only source of [`ReaderSettings`].
pub trait SettingsStore: Send + Sync {
    /// Load the current settings.
    fn load(&self) -> Result<ReaderSettings>;
}

/// Settings read from a TOML file.
///
/// A missing file yields the defaults; a malformed one is an error.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TomlSettingsStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse settings from TOML text.
    pub fn parse(content: &str) -> Result<ReaderSettings> {
        let settings: ReaderSettings =
            toml::from_str(content).map_err(|e| Error::Settings(e.to_string()))?;
        settings.normalize()
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<ReaderSettings> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "settings file missing, using defaults");
            return Ok(ReaderSettings::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Self::parse(&content)
    }
}

/// Settings held in memory; used by tests and embedding applications that
/// manage persistence themselves.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    settings: ReaderSettings,
}

impl MemorySettingsStore {
    pub fn new(settings: ReaderSettings) -> Self {
        MemorySettingsStore { settings }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<ReaderSettings> {
        Ok(self.settings.clone())
    }
}
