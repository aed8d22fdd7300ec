//! Command execution.

use crate::Commands;
use bytes::Bytes;
use colored::Colorize;
use hidock_client::Device;
use hidock_protocol::message::{DeleteStatus, SettingsUpdate};
use hidock_protocol::FileRecord;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub async fn execute(device: &Device, cmd: Commands, json: bool) -> CommandResult {
    match cmd {
        Commands::Info => {
            let Some(info) = device.get_device_info().await? else {
                return Ok(no_reply());
            };
            if json {
                return Ok(format_json(&info));
            }
            Ok(format!(
                "{} {}\n  firmware: {} ({})\n  serial:   {}",
                "Model".bold(),
                device.model().to_string().cyan(),
                info.version_code,
                info.version_number,
                info.serial_number
            ))
        }

        Commands::Time => match device.get_time().await? {
            Some(time) if json => Ok(format_json(&time)),
            Some(time) if time.is_unknown() => Ok("Clock not set".yellow().to_string()),
            Some(time) => Ok(match time.datetime {
                Some(datetime) => datetime.to_string(),
                None => time.raw,
            }),
            None => Ok(no_reply()),
        },

        Commands::SyncTime => {
            let now = chrono::Local::now().naive_local();
            status(device.set_time(&now).await?, &format!("Clock set to {}", now))
        }

        Commands::Count => match device.get_file_count().await? {
            Some(count) => Ok(count.to_string()),
            None => Ok(no_reply()),
        },

        Commands::List => {
            let Some(files) = device.list_files().await? else {
                return Ok(no_reply());
            };
            if json {
                return Ok(format_json(&files));
            }
            if files.is_empty() {
                return Ok("No recordings".yellow().to_string());
            }
            Ok(format_files(&files))
        }

        Commands::Download {
            name,
            length,
            output,
        } => {
            let data = Arc::new(Mutex::new(Vec::with_capacity(length as usize)));
            let sink = data.clone();
            let outcome = device
                .download_file(
                    &name,
                    length,
                    move |chunk: Bytes| sink.lock().extend_from_slice(&chunk),
                    |received, total| eprint!("\r{} / {} bytes", received, total),
                )
                .await?;
            eprintln!();

            match outcome {
                Some(outcome) if outcome.is_complete() => {
                    let path = output.unwrap_or_else(|| name.clone().into());
                    let contents = std::mem::take(&mut *data.lock());
                    tokio::fs::write(&path, contents).await?;
                    Ok(format!(
                        "{} {} to {}",
                        "Downloaded".green(),
                        name.cyan(),
                        path.display()
                    ))
                }
                Some(outcome) => Ok(format!("{}: {:?}", "Download failed".red(), outcome)),
                None => Ok(no_reply()),
            }
        }

        Commands::Delete { name } => match device.delete_file(&name).await? {
            Some(DeleteStatus::Success) => Ok(format!("{} {}", "Deleted".green(), name.cyan())),
            Some(DeleteStatus::NotExists) => Ok(format!("{} does not exist", name.cyan())),
            Some(DeleteStatus::Failed) => Ok("Delete failed".red().to_string()),
            None => Ok(no_reply()),
        },

        Commands::Settings => match device.get_settings().await? {
            Some(settings) => Ok(format_json(&settings)),
            None => Ok(unsupported()),
        },

        Commands::SetSettings {
            auto_record,
            auto_play,
            notification,
            bluetooth_tone,
        } => {
            let update = SettingsUpdate {
                auto_record,
                auto_play,
                notification,
                bluetooth_tone,
            };
            status(device.set_settings(&update).await?, "Settings updated")
        }

        Commands::Card => {
            let Some(card) = device.get_card_info().await? else {
                return Ok(unsupported());
            };
            if json {
                return Ok(format_json(&card));
            }
            Ok(format!(
                "used {} / capacity {} (free {}), status {}",
                card.used,
                card.capacity,
                card.free(),
                card.status
            ))
        }

        Commands::Format { yes } => {
            if !yes {
                return Ok(confirm("format", "erases every recording"));
            }
            status(device.format_card().await?, "Card formatted")
        }

        Commands::Recording => match device.get_recording_file().await? {
            Some(recording) => Ok(format_json(&recording)),
            None => Ok("Not recording".yellow().to_string()),
        },

        Commands::BtScan => match device.bluetooth_scan().await? {
            Some(devices) if json => Ok(format_json(&devices)),
            Some(devices) if devices.is_empty() => Ok("No devices found".yellow().to_string()),
            Some(devices) => Ok(devices
                .iter()
                .map(|d| format!("{}  {}", d.mac.cyan(), d.name))
                .collect::<Vec<_>>()
                .join("\n")),
            None => Ok(unsupported()),
        },

        Commands::BtStatus => match device.bluetooth_status().await? {
            Some(status) => Ok(format_json(&status)),
            None => Ok("No Bluetooth device paired".yellow().to_string()),
        },

        Commands::BtConnect { mac } => status(
            device.bluetooth_connect(&mac).await?,
            &format!("Connected {}", mac),
        ),

        Commands::BtDisconnect => status(device.bluetooth_disconnect().await?, "Disconnected"),

        Commands::FactoryReset { yes } => {
            if !yes {
                return Ok(confirm("factory-reset", "restores every setting"));
            }
            status(
                device.restore_factory_settings().await?,
                "Factory settings restored",
            )
        }
    }
}

fn status(reply: Option<bool>, success: &str) -> CommandResult {
    match reply {
        Some(true) => Ok(success.green().to_string()),
        Some(false) => Ok("Device reported failure".red().to_string()),
        None => Ok(no_reply()),
    }
}

fn no_reply() -> String {
    "No reply from device".yellow().to_string()
}

fn unsupported() -> String {
    "Not supported by this model or firmware".yellow().to_string()
}

fn confirm(command: &str, effect: &str) -> String {
    format!(
        "{} {} {}; pass --yes to continue",
        "Refusing:".yellow(),
        command,
        effect
    )
}

fn format_json(value: &impl Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}

fn format_files(files: &[FileRecord]) -> String {
    let mut output = format!(
        "{:<32} {:>12} {:>9} {:<20} {}\n",
        "NAME".bold(),
        "BYTES".bold(),
        "SECONDS".bold(),
        "CREATED".bold(),
        "MODE".bold()
    );
    for file in files {
        let created = file
            .created
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!(
            "{:<32} {:>12} {:>9} {:<20} {:?}\n",
            file.name.cyan(),
            file.length,
            file.duration_ms / 1000,
            created,
            file.mode
        ));
    }
    output.push_str(&format!("{} recording(s)", files.len()));
    output
}
