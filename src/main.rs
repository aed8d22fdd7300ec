//! hidock - command-line tool for HiDock recorders
//!
//! Runs one device operation per invocation.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hidock_client::{ClientConfig, Device};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hidock")]
#[command(about = "Command-line tool for HiDock USB audio recorders")]
#[command(version)]
struct Cli {
    /// YAML config file (defaults to $HIDOCK_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print replies as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show model, firmware and serial number
    Info,

    /// Read the device clock
    Time,

    /// Set the device clock to local time
    SyncTime,

    /// Count stored recordings
    Count,

    /// List stored recordings
    List,

    /// Download a recording
    Download {
        /// File name as shown by `list`
        name: String,

        /// File length in bytes as shown by `list`
        length: u32,

        /// Output path (defaults to the file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a recording
    Delete {
        /// File name
        name: String,
    },

    /// Show device settings
    Settings,

    /// Change device settings
    SetSettings {
        #[arg(long)]
        auto_record: Option<bool>,

        #[arg(long)]
        auto_play: Option<bool>,

        #[arg(long)]
        notification: Option<bool>,

        #[arg(long)]
        bluetooth_tone: Option<bool>,
    },

    /// Show storage card usage
    Card,

    /// Format the storage card
    Format {
        /// Confirm erasing every recording
        #[arg(long)]
        yes: bool,
    },

    /// Show the recording in progress
    Recording,

    /// Scan for Bluetooth headsets (P1 only)
    BtScan,

    /// Show the paired Bluetooth device (P1 only)
    BtStatus,

    /// Connect a Bluetooth device (P1 only)
    BtConnect {
        /// MAC address, e.g. AA-BB-CC-DD-EE-FF
        mac: String,
    },

    /// Disconnect the Bluetooth device (P1 only)
    BtDisconnect,

    /// Restore factory settings
    FactoryReset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = ClientConfig::from_file(path)?;
            config.apply_env_overrides();
            config.validate()?;
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => ClientConfig::load()?,
    };

    let device = match open_device(config) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };

    device.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    let result = commands::execute(&device, cli.command, cli.json).await;
    device.disconnect().await;

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "usb")]
fn open_device(config: ClientConfig) -> Result<Device, Box<dyn std::error::Error>> {
    Ok(Device::usb(config)?)
}

#[cfg(not(feature = "usb"))]
fn open_device(_config: ClientConfig) -> Result<Device, Box<dyn std::error::Error>> {
    Err("no transport available: this build has no USB support (rebuild with --features usb)".into())
}
