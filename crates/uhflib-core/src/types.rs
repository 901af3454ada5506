//! Core types used throughout uhflib.
//!
//! These are the value types that cross layer boundaries: connection
//! status published by the transport, tag observations published by the
//! orchestrator, and the reader's response codes.

use std::fmt;

use crate::helpers::bytes_to_hex;

/// Length of a 96-bit EPC in bytes.
pub const EPC_LEN: usize = 12;

/// Two-byte prefix stamped on EPCs written by this system.
///
/// Tags whose EPC starts with these bytes are recognised as our own
/// (see [`TagPollData::is_reader_tag`]).
pub const READER_EPC_PREFIX: [u8; 2] = [0x52, 0x46];

// ---------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------

/// Status of the serial link to the reader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// No port open.
    #[default]
    Disconnected,
    /// Port opening and module booting.
    Connecting,
    /// Port open, module powered, read loop running.
    Connected,
    /// Open failed or the device went away.
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of the serial link, published by the transport layer.
///
/// Only the connection state machine mutates this; everyone else reads
/// snapshots from its watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Port the link is (or was last) attached to.
    pub port_name: Option<String>,
    pub baud_rate: Option<u32>,
    /// `true` only while the hardware enable line is asserted.
    pub module_enabled: bool,
    /// Present only in [`ConnectionStatus::Error`].
    pub error_message: Option<String>,
}

impl ConnectionState {
    /// The initial state: nothing open.
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connecting(port_name: &str, baud_rate: u32) -> Self {
        ConnectionState {
            status: ConnectionStatus::Connecting,
            port_name: Some(port_name.to_string()),
            baud_rate: Some(baud_rate),
            module_enabled: false,
            error_message: None,
        }
    }

    pub fn connected(port_name: &str, baud_rate: u32) -> Self {
        ConnectionState {
            status: ConnectionStatus::Connected,
            port_name: Some(port_name.to_string()),
            baud_rate: Some(baud_rate),
            module_enabled: true,
            error_message: None,
        }
    }

    pub fn error(port_name: Option<&str>, baud_rate: Option<u32>, message: impl Into<String>) -> Self {
        ConnectionState {
            status: ConnectionStatus::Error,
            port_name: port_name.map(str::to_string),
            baud_rate,
            module_enabled: false,
            error_message: Some(message.into()),
        }
    }

    /// Returns `true` if the link can carry traffic.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let (Some(port), Some(baud)) = (&self.port_name, self.baud_rate) {
            write!(f, " ({port} @ {baud})")?;
        }
        if let Some(msg) = &self.error_message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------
// Tag observations
// ---------------------------------------------------------------

/// A single tag observation reported by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagPollData {
    /// Received signal strength (raw reader units, 0-255).
    pub rssi: u8,
    /// Protocol-control word preceding the EPC in tag memory.
    pub pc: u16,
    /// The 96-bit EPC.
    pub epc: [u8; EPC_LEN],
}

impl TagPollData {
    /// Decode `rssi(1) + pc(2) + epc(12)` from a payload.
    ///
    /// Returns `None` when fewer than 12 EPC bytes are present. Bytes past
    /// the EPC are ignored.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let rssi = *payload.first()?;
        let pc = u16::from_be_bytes([*payload.get(1)?, *payload.get(2)?]);
        let epc: [u8; EPC_LEN] = payload.get(3..3 + EPC_LEN)?.try_into().ok()?;
        Some(TagPollData { rssi, pc, epc })
    }

    /// The EPC as an uppercase hex string.
    pub fn epc_hex(&self) -> String {
        bytes_to_hex(&self.epc)
    }

    /// Returns `true` if the EPC carries [`READER_EPC_PREFIX`].
    pub fn is_reader_tag(&self) -> bool {
        self.epc.starts_with(&READER_EPC_PREFIX)
    }
}

impl fmt::Display for TagPollData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EPC {} (RSSI {}, PC 0x{:04X})",
            self.epc_hex(),
            self.rssi,
            self.pc
        )
    }
}

// ---------------------------------------------------------------
// Response codes
// ---------------------------------------------------------------

/// First parameter byte of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Success,
    InvalidCommand,
    InvalidParameter,
    MemoryOverrun,
    MemoryLocked,
    TagNotFound,
    ReadFailed,
    WriteFailed,
    LockFailed,
    /// A code outside the documented set.
    Unknown(u8),
}

impl ResponseCode {
    /// Wire value of a successful response.
    pub const SUCCESS_BYTE: u8 = 0x10;

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x10 => ResponseCode::Success,
            0x11 => ResponseCode::InvalidCommand,
            0x12 => ResponseCode::InvalidParameter,
            0x13 => ResponseCode::MemoryOverrun,
            0x14 => ResponseCode::MemoryLocked,
            0x15 => ResponseCode::TagNotFound,
            0x16 => ResponseCode::ReadFailed,
            0x17 => ResponseCode::WriteFailed,
            0x18 => ResponseCode::LockFailed,
            other => ResponseCode::Unknown(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            ResponseCode::Success => 0x10,
            ResponseCode::InvalidCommand => 0x11,
            ResponseCode::InvalidParameter => 0x12,
            ResponseCode::MemoryOverrun => 0x13,
            ResponseCode::MemoryLocked => 0x14,
            ResponseCode::TagNotFound => 0x15,
            ResponseCode::ReadFailed => 0x16,
            ResponseCode::WriteFailed => 0x17,
            ResponseCode::LockFailed => 0x18,
            ResponseCode::Unknown(b) => *b,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == ResponseCode::Success
    }

    /// Human-readable description of the code.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Success => write!(f, "success"),
            ResponseCode::InvalidCommand => write!(f, "invalid command"),
            ResponseCode::InvalidParameter => write!(f, "invalid parameter"),
            ResponseCode::MemoryOverrun => write!(f, "memory overrun"),
            ResponseCode::MemoryLocked => write!(f, "memory locked"),
            ResponseCode::TagNotFound => write!(f, "tag not found"),
            ResponseCode::ReadFailed => write!(f, "read failed"),
            ResponseCode::WriteFailed => write!(f, "write failed"),
            ResponseCode::LockFailed => write!(f, "lock failed"),
            ResponseCode::Unknown(b) => write!(f, "unknown error 0x{b:02X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_epc() -> [u8; EPC_LEN] {
        [
            0x52, 0x46, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x34,
        ]
    }

    // ---------------------------------------------------------------
    // ConnectionState
    // ---------------------------------------------------------------

    #[test]
    fn connection_state_initial_is_disconnected() {
        let state = ConnectionState::default();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert!(!state.module_enabled);
        assert!(state.port_name.is_none());
        assert!(state.error_message.is_none());
        assert!(!state.is_connected());
    }

    #[test]
    fn connection_state_connected_has_module_enabled() {
        let state = ConnectionState::connected("/dev/ttyUSB0", 115_200);
        assert!(state.is_connected());
        assert!(state.module_enabled);
        assert_eq!(state.port_name.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(state.baud_rate, Some(115_200));
    }

    #[test]
    fn connection_state_error_carries_message() {
        let state = ConnectionState::error(Some("COM3"), Some(9600), "access denied");
        assert_eq!(state.status, ConnectionStatus::Error);
        assert!(!state.module_enabled);
        assert_eq!(state.error_message.as_deref(), Some("access denied"));
        assert_eq!(state.to_string(), "error (COM3 @ 9600): access denied");
    }

    // ---------------------------------------------------------------
    // TagPollData
    // ---------------------------------------------------------------

    #[test]
    fn tag_from_payload_full_record() {
        let mut payload = vec![0xC8, 0x30, 0x00];
        payload.extend_from_slice(&reader_epc());
        let tag = TagPollData::from_payload(&payload).unwrap();
        assert_eq!(tag.rssi, 0xC8);
        assert_eq!(tag.pc, 0x3000);
        assert_eq!(tag.epc, reader_epc());
        assert_eq!(tag.epc_hex(), "524600000000000000001234");
        assert!(tag.is_reader_tag());
    }

    #[test]
    fn tag_from_payload_ignores_trailing_bytes() {
        let mut payload = vec![0x40, 0x30, 0x00];
        payload.extend_from_slice(&reader_epc());
        payload.extend_from_slice(&[0xAB, 0xCD]);
        let tag = TagPollData::from_payload(&payload).unwrap();
        assert_eq!(tag.epc, reader_epc());
    }

    #[test]
    fn tag_from_payload_short_epc_is_none() {
        assert!(TagPollData::from_payload(&[0xC8, 0x30, 0x00, 0xE2]).is_none());
        assert!(TagPollData::from_payload(&[0xC8, 0x30]).is_none());
        assert!(TagPollData::from_payload(&[]).is_none());
    }

    #[test]
    fn tag_foreign_prefix_is_not_reader_tag() {
        let tag = TagPollData {
            rssi: 10,
            pc: 0x3000,
            epc: [0xE2; EPC_LEN],
        };
        assert!(!tag.is_reader_tag());
    }

    // ---------------------------------------------------------------
    // ResponseCode
    // ---------------------------------------------------------------

    #[test]
    fn response_code_round_trip() {
        for byte in 0x10..=0x18u8 {
            assert_eq!(ResponseCode::from_byte(byte).as_byte(), byte);
        }
        assert_eq!(ResponseCode::from_byte(0x99), ResponseCode::Unknown(0x99));
        assert_eq!(ResponseCode::Unknown(0x99).as_byte(), 0x99);
    }

    #[test]
    fn response_code_messages() {
        assert!(ResponseCode::from_byte(ResponseCode::SUCCESS_BYTE).is_success());
        assert_eq!(ResponseCode::TagNotFound.message(), "tag not found");
        assert_eq!(ResponseCode::WriteFailed.message(), "write failed");
        assert_eq!(ResponseCode::from_byte(0x7F).message(), "unknown error 0x7F");
    }
}
