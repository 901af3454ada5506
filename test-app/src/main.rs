// uhflib test application -- CLI tool for exercising a UHF RFID reader
// against real hardware or a scripted mock transport.
//
// Usage:
//   uhflib-test-app ports
//   uhflib-test-app --port /dev/ttyUSB0 read
//   uhflib-test-app --port /dev/ttyUSB0 poll --duration 10
//   uhflib-test-app --port /dev/ttyUSB0 write-epc 524600000000000000000001 --verify-ms 2000
//   uhflib-test-app --port /dev/ttyUSB0 lock --payload 0C0280
//   uhflib-test-app --port /dev/ttyUSB0 power get
//   uhflib-test-app --port /dev/ttyUSB0 power set 26
//   uhflib-test-app --config reader.toml --mock poll --duration 3

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use uhflib::protocol::{commands, frame};
use uhflib::settings::ACCESS_PASSWORD_LEN;
use uhflib::transport::available_ports;
use uhflib::{
    EPC_LEN, ReaderBuilder, ReaderSettings, SettingsStore, TomlSettingsStore, UhfReader,
    bytes_to_hex, parse_hex,
};
use uhflib_test_harness::{MockHandle, MockOpener, MockTransport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// uhflib test application -- exercises a reader from the command line.
#[derive(Parser)]
#[command(name = "uhflib-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    /// Overrides the port from --config. Required unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Override the baud rate (default 115200).
    #[arg(long)]
    baud: Option<u32>,

    /// Load reader settings from a TOML file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Command timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Use a scripted mock transport instead of a real serial port.
    #[arg(long)]
    mock: bool,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports on this machine.
    Ports,

    /// Poll continuously and print tags as they are seen.
    Poll {
        /// Duration in seconds.
        #[arg(long, default_value_t = 5)]
        duration: u64,

        /// Number of poll rounds (0 = until stopped).
        #[arg(long, default_value_t = 0)]
        count: u16,
    },

    /// Run a single poll round.
    Read,

    /// Write a 12-byte EPC (24 hex digits) to the tag in the field.
    WriteEpc {
        /// New EPC as hex.
        epc: String,

        /// Poll for the new EPC for this many milliseconds after writing
        /// (0 = skip verification).
        #[arg(long, default_value_t = 0)]
        verify_ms: u64,
    },

    /// Lock tag memory.
    Lock {
        /// Access password as 8 hex digits (default: configured password).
        #[arg(long)]
        password: Option<String>,

        /// Lock payload as 6 hex digits.
        #[arg(long)]
        payload: String,
    },

    /// RF output power.
    Power {
        #[command(subcommand)]
        action: PowerAction,
    },
}

#[derive(Subcommand)]
enum PowerAction {
    /// Read the current RF power.
    Get,
    /// Set the RF power in dBm (0-30).
    Set {
        #[arg(allow_hyphen_values = true)]
        dbm: i32,
    },
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_settings(cli: &Cli) -> Result<Option<ReaderSettings>> {
    let Some(path) = &cli.config else {
        return Ok(None);
    };
    let store = TomlSettingsStore::new(path);
    let settings = store
        .load()
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    tracing::debug!(path = %path.display(), ?settings, "loaded settings");
    Ok(Some(settings))
}

fn parse_epc(hex: &str) -> Result<[u8; EPC_LEN]> {
    let bytes = parse_hex(hex).context("EPC is not valid hex")?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("EPC must be {EPC_LEN} bytes, got {}", bytes.len()))
}

fn parse_password(hex: &str) -> Result<[u8; ACCESS_PASSWORD_LEN]> {
    let bytes = parse_hex(hex).context("password is not valid hex")?;
    bytes.as_slice().try_into().map_err(|_| {
        anyhow::anyhow!(
            "password must be {ACCESS_PASSWORD_LEN} bytes, got {}",
            bytes.len()
        )
    })
}

async fn create_reader(cli: &Cli, settings: Option<&ReaderSettings>) -> Result<UhfReader> {
    let mut builder = match settings {
        Some(settings) => ReaderBuilder::from_settings(settings),
        None => ReaderBuilder::new(),
    };
    builder = builder.command_timeout(Duration::from_millis(cli.timeout_ms));
    if let Some(port) = &cli.port {
        builder = builder.serial_port(port);
    }
    if let Some(baud) = cli.baud {
        builder = builder.baud_rate(baud);
    }

    if cli.mock {
        let mock = MockTransport::new();
        script_mock(cli, &mock.handle(), settings)?;
        let reader = builder
            .serial_port(cli.port.as_deref().unwrap_or("mock"))
            .settle_delay(Duration::from_millis(10))
            .power_down_delay(Duration::from_millis(10))
            .build_with_opener(Box::new(MockOpener::with_transport(mock)))
            .await
            .context("failed to build reader with mock transport")?;
        reader
            .connect_configured()
            .await
            .context("failed to connect mock reader")?;
        println!("Connected (mock transport)");
        return Ok(reader);
    }

    if cli.port.is_none() && settings.and_then(|s| s.port_name.as_ref()).is_none() {
        bail!("--port (or port_name in --config) is required when not using --mock");
    }
    let reader = builder.build().await.context("failed to build reader")?;
    reader
        .connect_configured()
        .await
        .context("failed to connect to reader")?;
    println!("Connected: {}", reader.connection_state());
    Ok(reader)
}

// ---------------------------------------------------------------------------
// Mock scripting
// ---------------------------------------------------------------------------

const MOCK_EPCS: [[u8; EPC_LEN]; 2] = [
    [0x52, 0x46, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01],
    [0xE2, 0x00, 0x34, 0x12, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF],
];

fn tag_record(rssi: u8, epc: &[u8; EPC_LEN]) -> Vec<u8> {
    let mut record = vec![rssi, 0x30, 0x00];
    record.extend_from_slice(epc);
    record
}

fn success(command: u8) -> Result<Vec<u8>> {
    Ok(frame::build_response(command, &[0x10])?)
}

/// Feed tag notices for `epcs` until the process exits.
fn spawn_notice_feed(handle: MockHandle, epcs: Vec<[u8; EPC_LEN]>) -> Result<()> {
    let notices = epcs
        .iter()
        .enumerate()
        .map(|(i, epc)| frame::build_notice(commands::START_POLL, &tag_record(0xC0 + i as u8, epc)))
        .collect::<uhflib::Result<Vec<_>>>()?;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            ticker.tick().await;
            for notice in &notices {
                handle.push_unsolicited(notice);
            }
        }
    });
    Ok(())
}

/// Queue the exchanges the selected command will perform.
fn script_mock(cli: &Cli, handle: &MockHandle, settings: Option<&ReaderSettings>) -> Result<()> {
    if let Some(settings) = settings {
        handle.expect(
            &commands::set_rf_power(i32::from(settings.rf_power))?,
            &success(commands::SET_RF_POWER)?,
        );
    }
    let password = settings
        .map(ReaderSettings::password_or_default)
        .unwrap_or([0; ACCESS_PASSWORD_LEN]);

    match &cli.command {
        Command::Ports => {}
        Command::Poll { count, .. } => {
            handle.expect(&commands::start_polling(*count)?, &[]);
            handle.expect(&commands::stop_polling()?, &[]);
            spawn_notice_feed(handle.clone(), MOCK_EPCS.to_vec())?;
        }
        Command::Read => {
            let mut params = vec![0x10];
            params.extend(tag_record(0xC8, &MOCK_EPCS[0]));
            handle.expect(
                &commands::single_poll()?,
                &frame::build_response(commands::SINGLE_POLL, &params)?,
            );
        }
        Command::WriteEpc { epc, verify_ms } => {
            let epc = parse_epc(epc)?;
            handle.expect(
                &commands::write_epc(&password, &epc)?,
                &success(commands::WRITE_EPC)?,
            );
            if *verify_ms > 0 {
                handle.expect(&commands::start_polling(0)?, &[]);
                handle.expect(&commands::stop_polling()?, &[]);
                spawn_notice_feed(handle.clone(), vec![epc])?;
            }
        }
        Command::Lock {
            password: lock_password,
            payload,
        } => {
            let lock_password = match lock_password {
                Some(hex) => parse_password(hex)?,
                None => password,
            };
            // A malformed payload is left for the reader to reject.
            if let Ok(request) = commands::lock_tag(&lock_password, &parse_hex(payload)?) {
                handle.expect(&request, &success(commands::LOCK_TAG)?);
            }
        }
        Command::Power { action } => match action {
            PowerAction::Get => handle.expect(
                &commands::get_rf_power()?,
                &frame::build_response(commands::GET_RF_POWER, &[0x10, 0x07, 0xD0])?,
            ),
            PowerAction::Set { dbm } => {
                if let Ok(request) = commands::set_rf_power(*dbm) {
                    handle.expect(&request, &success(commands::SET_RF_POWER)?);
                }
            }
        },
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_ports() -> Result<()> {
    let ports = available_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn cmd_poll(reader: &UhfReader, duration_secs: u64, count: u16) -> Result<()> {
    let mut tags = reader.subscribe_tags();
    reader
        .start_polling_count(count)
        .await
        .context("failed to start polling")?;
    println!("Polling for {duration_secs} s...");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_secs);
    let mut seen = 0usize;
    loop {
        match tokio::time::timeout_at(deadline, tags.recv()).await {
            Ok(Ok(tag)) => {
                seen += 1;
                let marker = if tag.is_reader_tag() { "  [reader tag]" } else { "" };
                println!("  {tag}{marker}");
            }
            Ok(Err(RecvError::Lagged(n))) => {
                println!("[warning] missed {n} tags (consumer too slow)");
            }
            Ok(Err(RecvError::Closed)) => {
                println!("Tag stream closed.");
                break;
            }
            Err(_) => break,
        }
    }

    reader.stop_polling().await.context("failed to stop polling")?;
    println!("{seen} observations.");
    Ok(())
}

async fn cmd_read(reader: &UhfReader) -> Result<()> {
    let tags = reader.single_poll().await.context("single poll failed")?;
    if tags.is_empty() {
        println!("No tag in field.");
    }
    for tag in tags {
        println!("{tag}");
    }
    Ok(())
}

async fn cmd_write_epc(reader: &UhfReader, epc_hex: &str, verify_ms: u64) -> Result<()> {
    let epc = parse_epc(epc_hex)?;
    reader.write_epc(&epc).await.context("EPC write failed")?;
    println!("Wrote EPC {}", bytes_to_hex(&epc));

    if verify_ms == 0 {
        return Ok(());
    }

    reader.start_polling().await.context("failed to start polling")?;
    let verified = reader
        .verify_epc(&epc, Duration::from_millis(verify_ms))
        .await;
    reader.stop_polling().await.context("failed to stop polling")?;

    if verified.context("verification failed")? {
        println!("Verified: new EPC observed.");
    } else {
        bail!("new EPC not observed within {verify_ms} ms");
    }
    Ok(())
}

async fn cmd_lock(reader: &UhfReader, password: Option<&str>, payload_hex: &str) -> Result<()> {
    let password = match password {
        Some(hex) => parse_password(hex)?,
        None => reader.access_password(),
    };
    let payload = parse_hex(payload_hex).context("lock payload is not valid hex")?;
    reader
        .lock_tag(&password, &payload)
        .await
        .context("lock failed")?;
    println!("Lock applied.");
    Ok(())
}

async fn cmd_power_get(reader: &UhfReader) -> Result<()> {
    let dbm = reader
        .get_rf_power()
        .await
        .context("failed to read RF power")?;
    println!("RF power: {dbm} dBm");
    Ok(())
}

async fn cmd_power_set(reader: &UhfReader, dbm: i32) -> Result<()> {
    reader
        .set_rf_power(dbm)
        .await
        .context("failed to set RF power")?;
    println!("RF power set to {dbm} dBm");
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // The `ports` command does not require a reader connection.
    if matches!(cli.command, Command::Ports) {
        return cmd_ports();
    }

    let settings = load_settings(&cli)?;
    let reader = create_reader(&cli, settings.as_ref()).await?;

    let result = match &cli.command {
        Command::Poll { duration, count } => cmd_poll(&reader, *duration, *count).await,
        Command::Read => cmd_read(&reader).await,
        Command::WriteEpc { epc, verify_ms } => cmd_write_epc(&reader, epc, *verify_ms).await,
        Command::Lock { password, payload } => {
            cmd_lock(&reader, password.as_deref(), payload).await
        }
        Command::Power { action } => match action {
            PowerAction::Get => cmd_power_get(&reader).await,
            PowerAction::Set { dbm } => cmd_power_set(&reader, *dbm).await,
        },
        Command::Ports => unreachable!("ports handled above"),
    };

    reader.disconnect().await.ok();
    result
}
