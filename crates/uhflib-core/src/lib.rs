//! uhflib-core: Core traits, types, and error definitions for uhflib.
//!
//! This crate defines the pieces shared by every layer of the UHF RFID
//! reader stack: the serial transport abstraction, connection state, tag
//! observations, reader response codes, and the read-only settings store.
//! Applications that only consume tag reads can depend on these types
//! without pulling in the serial or protocol crates.
//!
//! # Key types
//!
//! - [`Transport`] / [`PortOpener`] -- byte-level link to the reader module
//! - [`ConnectionState`] -- link status published by the transport layer
//! - [`TagPollData`] -- a single decoded tag observation
//! - [`ReaderEvent`] -- asynchronous notifications from the orchestrator
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod helpers;
pub mod settings;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use uhflib_core::*`.
pub use error::{Error, Result};
pub use events::ReaderEvent;
pub use helpers::{bytes_to_hex, parse_hex};
pub use settings::{MemorySettingsStore, ReaderSettings, SettingsStore, TomlSettingsStore};
pub use transport::{PortOpener, Transport};
pub use types::*;
