//! Write a new EPC to the tag in the field and confirm it.
//!
//! Sends the EPC write, then polls and waits for the new EPC to appear in
//! the tag stream.
//!
//! # Requirements
//!
//! - A reader module on a USB serial bridge
//! - A single writable tag in the field
//!
//! # Usage
//!
//! ```sh
//! cargo run -p uhflib --example write_epc -- 524600000000000000000001
//! ```

use std::time::Duration;

use anyhow::Context;
use uhflib::{ReaderBuilder, parse_hex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let epc_arg = std::env::args()
        .nth(1)
        .context("usage: write_epc <24 hex digit EPC>")?;
    let epc = parse_hex(&epc_arg)?;

    let reader = ReaderBuilder::new()
        .serial_port("/dev/ttyUSB0")
        .command_timeout(Duration::from_millis(1500))
        .build()
        .await?;
    reader.connect_configured().await?;

    if let Some(tag) = reader.single_poll().await?.first() {
        println!("Tag in field: {tag}");
    }

    reader.write_epc(&epc).await.context("EPC write failed")?;
    println!("Write acknowledged, verifying...");

    reader.start_polling().await?;
    let seen = reader.verify_epc(&epc, Duration::from_secs(2)).await?;
    reader.stop_polling().await?;

    if seen {
        println!("Verified: {}", uhflib::bytes_to_hex(&epc));
    } else {
        println!("New EPC not observed within 2 s");
    }

    reader.disconnect().await?;
    Ok(())
}
