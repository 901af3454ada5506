//! uhflib-reader: Frame codec and protocol orchestrator for UHF RFID
//! reader modules.
//!
//! This crate implements the reader's binary framed protocol: frame
//! encoding/decoding and stream re-assembly ([`frame`]), command builders
//! and response parsers ([`commands`]), and [`UhfReader`], which correlates
//! responses with commands, runs continuous polling, and exposes tag
//! write/lock/verify operations with bounded timeouts.
//!
//! # Quick start
//!
//! ```no_run
//! use uhflib_reader::ReaderBuilder;
//!
//! # async fn example() -> uhflib_core::Result<()> {
//! let reader = ReaderBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .build()
//!     .await?;
//! reader.connect_configured().await?;
//!
//! let mut tags = reader.subscribe_tags();
//! reader.start_polling().await?;
//! while let Ok(tag) = tags.recv().await {
//!     println!("{tag}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod commands;
mod dispatch;
pub mod frame;
pub mod reader;

pub use builder::ReaderBuilder;
pub use frame::{Frame, FrameBuffer, FrameType};
pub use reader::UhfReader;
