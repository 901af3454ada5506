//! # uhflib -- UHF RFID reader control over serial
//!
//! `uhflib` is an asynchronous Rust library for UHF RFID reader modules
//! attached through a UART-over-USB bridge. It covers the binary frame
//! protocol, the serial link with its hardware module-enable line, and a
//! tag-operations API: continuous polling, single reads, EPC writes, tag
//! locks, RF power, and EPC verification.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use uhflib::ReaderBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = ReaderBuilder::new()
//!         .serial_port("/dev/ttyUSB0")
//!         .build()
//!         .await?;
//!     reader.connect_configured().await?;
//!
//!     let epc = uhflib::parse_hex("5246 0000 0000 0000 0000 0001")?;
//!     reader.write_epc(&epc).await?;
//!     reader.start_polling().await?;
//!     let seen = reader.verify_epc(&epc, Duration::from_secs(2)).await?;
//!     println!("written EPC seen: {seen}");
//!
//!     reader.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                 | Purpose                                          |
//! |-----------------------|--------------------------------------------------|
//! | `uhflib-core`         | Transport trait, types, errors, settings         |
//! | `uhflib-transport`    | Serial transport and connection state machine    |
//! | `uhflib-reader`       | Frame codec and protocol orchestrator            |
//! | **`uhflib`**          | This facade crate -- re-exports everything       |
//!
//! ## Streams
//!
//! - [`UhfReader::subscribe_tags`] -- tag observations while polling
//! - [`UhfReader::subscribe_events`] -- connection changes and tag reads
//! - [`UhfReader::subscribe_state`] -- link state; new subscribers see the
//!   current state immediately

pub use uhflib_core::*;

pub use uhflib_reader::{Frame, FrameBuffer, FrameType, ReaderBuilder, UhfReader};

/// Frame codec and command builders.
pub mod protocol {
    pub use uhflib_reader::commands;
    pub use uhflib_reader::frame;
}

/// Serial transport and connection state machine.
pub mod transport {
    pub use uhflib_core::transport::{PortOpener, Transport};
    pub use uhflib_transport::*;
}
