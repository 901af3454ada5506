//! Monitor tags seen by the reader.
//!
//! Starts continuous polling and prints every tag observation and
//! connection event as it arrives, until the duration elapses.
//!
//! # Requirements
//!
//! - A reader module on a USB serial bridge with its enable pin on DTR
//! - Serial port path adjusted for your system
//!
//! # Usage
//!
//! ```sh
//! cargo run -p uhflib --example monitor_tags
//! ```

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use uhflib::{ReaderBuilder, ReaderEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let serial_port = "/dev/ttyUSB0";
    println!("Connecting to reader on {}...", serial_port);

    let reader = ReaderBuilder::new()
        .serial_port(serial_port)
        .baud_rate(115_200)
        .rf_power(20)
        .build()
        .await?;
    reader.connect_configured().await?;
    println!("Connected: {}\n", reader.connection_state());

    let mut events = reader.subscribe_events();
    reader.start_polling().await?;
    println!("Polling for 30 seconds...\n");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(ReaderEvent::TagRead(tag))) => {
                let marker = if tag.is_reader_tag() { " [reader tag]" } else { "" };
                println!("  {tag}{marker}");
            }
            Ok(Ok(ReaderEvent::ChecksumMismatch { command })) => {
                println!("  checksum mismatch on command 0x{command:02X}");
            }
            Ok(Ok(event)) => println!("  [event] {event:?}"),
            Ok(Err(RecvError::Lagged(n))) => println!("  missed {n} events"),
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => break,
        }
    }

    reader.stop_polling().await?;
    reader.disconnect().await?;
    println!("\nDisconnected.");
    Ok(())
}
