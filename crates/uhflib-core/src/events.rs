//! Asynchronous reader event types.
//!
//! Events are emitted by the protocol orchestrator through a
//! `tokio::sync::broadcast` channel. UI layers subscribe to these for a
//! single combined feed of connection changes and tag reads; code that only
//! needs tag reads can subscribe to the dedicated polling stream instead.

use crate::types::TagPollData;

/// An event emitted by the reader orchestrator.
///
/// Delivered best-effort through a bounded broadcast channel; slow
/// consumers may miss events during dense polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// The serial link reached the connected state.
    Connected,

    /// The serial link was closed.
    Disconnected,

    /// The serial link failed.
    ConnectionError {
        /// Description of the failure.
        message: String,
    },

    /// A tag was observed while polling or verifying.
    TagRead(TagPollData),

    /// A frame arrived whose checksum did not match its contents.
    ///
    /// The frame is still dispatched.
    ChecksumMismatch {
        /// Command byte of the offending frame.
        command: u8,
    },
}
