//! Typed request bodies and reply parsers.
//!
//! Status-only replies carry a single byte where 0 means success. Replies
//! that report richer outcomes (delete, firmware upgrade) are mapped to
//! enums so callers can branch on them instead of treating them as errors.

use crate::bcd;
use crate::command::CommandId;
use crate::error::ProtocolError;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Sentinel reported when the device clock has never been set.
pub const UNKNOWN_TIME: &str = "unknown";

fn require(command: CommandId, body: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if body.len() < needed {
        return Err(ProtocolError::Truncated {
            command: command.code(),
            needed,
            actual: body.len(),
        });
    }
    Ok(())
}

fn be_u32(body: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]])
}

fn ascii_without_zeros(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

/// Returns whether a status-only reply reports success.
pub fn status_ok(body: &[u8]) -> bool {
    body.first() == Some(&0)
}

/// Firmware identity and serial number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Dotted version, e.g. `5.0.42`.
    pub version_code: String,
    /// Packed version used for feature gating.
    pub version_number: u32,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        require(CommandId::DeviceInfo, body, 4)?;
        let version_code = body[1..4]
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(".");
        let serial_end = body.len().min(20);
        Ok(Self {
            version_code,
            version_number: be_u32(body, 0),
            serial_number: ascii_without_zeros(&body[4..serial_end]),
        })
    }
}

/// Device clock reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceTime {
    /// 14-digit `YYYYMMDDHHMMSS` string, or [`UNKNOWN_TIME`].
    pub raw: String,
    pub datetime: Option<NaiveDateTime>,
}

impl DeviceTime {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        require(CommandId::GetTime, body, 7)?;
        let digits = bcd::from_bcd(&body[..7]);
        if digits.bytes().all(|b| b == b'0') {
            return Ok(Self {
                raw: UNKNOWN_TIME.to_string(),
                datetime: None,
            });
        }
        Ok(Self {
            datetime: bcd::parse_time(&digits),
            raw: digits,
        })
    }

    pub fn is_unknown(&self) -> bool {
        self.raw == UNKNOWN_TIME
    }
}

/// Parses a file count reply; an empty body means no files.
pub fn parse_file_count(body: &[u8]) -> Result<u32, ProtocolError> {
    if body.is_empty() {
        return Ok(0);
    }
    require(CommandId::FileCount, body, 4)?;
    Ok(be_u32(body, 0))
}

/// Outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    Success,
    NotExists,
    Failed,
}

impl DeleteStatus {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        require(CommandId::DeleteFile, body, 1)?;
        Ok(match body[0] {
            0 => DeleteStatus::Success,
            1 => DeleteStatus::NotExists,
            _ => DeleteStatus::Failed,
        })
    }
}

/// Outcome of a firmware upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStatus {
    Accepted,
    WrongVersion,
    Busy,
    CardFull,
    CardError,
    Unknown(u8),
}

impl UpgradeStatus {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        require(CommandId::FirmwareUpgradeRequest, body, 1)?;
        Ok(match body[0] {
            0 => UpgradeStatus::Accepted,
            1 => UpgradeStatus::WrongVersion,
            2 => UpgradeStatus::Busy,
            3 => UpgradeStatus::CardFull,
            4 => UpgradeStatus::CardError,
            other => UpgradeStatus::Unknown(other),
        })
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, UpgradeStatus::Accepted)
    }
}

/// Body of a firmware upgrade request: target version and image size.
pub fn encode_upgrade_request(version_number: u32, image_size: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&version_number.to_be_bytes());
    body.extend_from_slice(&image_size.to_be_bytes());
    body
}

/// Device behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub auto_record: bool,
    pub auto_play: bool,
    pub notification: bool,
    pub bluetooth_tone: bool,
}

impl Settings {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        require(CommandId::GetSettings, body, 8)?;
        Ok(Self {
            auto_record: body[3] == 1,
            auto_play: body[7] == 1,
            notification: body.len() >= 12 && body[11] == 1,
            // the tone flag is inverted on the wire
            bluetooth_tone: body.len() >= 16 && body[15] != 1,
        })
    }
}

/// Partial settings change; `None` leaves a switch untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub auto_record: Option<bool>,
    pub auto_play: Option<bool>,
    pub notification: Option<bool>,
    pub bluetooth_tone: Option<bool>,
}

impl SettingsUpdate {
    /// Encodes the 16-byte body: 0 = unchanged, 1 = on, 2 = off.
    pub fn encode(&self) -> Vec<u8> {
        fn flag(value: Option<bool>) -> u8 {
            match value {
                None => 0,
                Some(true) => 1,
                Some(false) => 2,
            }
        }

        let mut body = vec![0u8; 16];
        body[3] = flag(self.auto_record);
        body[7] = flag(self.auto_play);
        body[11] = flag(self.notification);
        body[15] = flag(self.bluetooth_tone.map(|on| !on));
        body
    }
}

/// Storage card usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardInfo {
    pub used: u32,
    pub capacity: u32,
    /// Status word rendered as hex.
    pub status: String,
}

impl CardInfo {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        require(CommandId::CardInfo, body, 12)?;
        Ok(Self {
            used: be_u32(body, 0),
            capacity: be_u32(body, 4),
            status: format!("{:x}", be_u32(body, 8)),
        })
    }

    pub fn free(&self) -> u32 {
        self.capacity.saturating_sub(self.used)
    }
}

/// Body of a card format request.
pub const FORMAT_CARD_BODY: [u8; 4] = [1, 2, 3, 4];

/// The recording currently in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingFile {
    pub name: String,
    pub created: Option<NaiveDateTime>,
}

impl RecordingFile {
    /// Returns `None` when nothing is being recorded.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let name = ascii_without_zeros(body);
        if name.is_empty() {
            return None;
        }
        Some(Self {
            created: crate::files::creation_time(&name),
            name,
        })
    }
}

/// Meeting schedule entry pushed to the device.
///
/// `key_report` is the prebuilt keyboard report the device replays to
/// join the meeting; building it is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingSchedule {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub platform: u8,
    pub key_report: Vec<u8>,
}

impl MeetingSchedule {
    /// Encodes start (7 BCD bytes), end (7 BCD bytes), a reserved byte, the
    /// platform byte and the key report. Missing times are zero-filled.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        fn time(t: &Option<NaiveDateTime>) -> Result<Vec<u8>, ProtocolError> {
            match t {
                Some(t) => bcd::encode_time(t),
                None => Ok(vec![0; 7]),
            }
        }

        let mut body = Vec::with_capacity(16 + self.key_report.len());
        body.extend(time(&self.start)?);
        body.extend(time(&self.end)?);
        body.push(0);
        body.push(self.platform);
        body.extend_from_slice(&self.key_report);
        Ok(body)
    }
}

/// Formats a MAC address as upper-case hex octets joined by `sep`.
pub fn format_mac(bytes: &[u8], sep: &str) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(sep)
}

/// Reads a u16-length-prefixed UTF-8 name followed by a 6-byte MAC.
fn read_named_mac(
    command: CommandId,
    body: &[u8],
    pos: &mut usize,
    sep: &str,
) -> Result<(String, String), ProtocolError> {
    require(command, body, *pos + 2)?;
    let name_len = u16::from_be_bytes([body[*pos], body[*pos + 1]]) as usize;
    *pos += 2;
    require(command, body, *pos + name_len + 6)?;
    let name = String::from_utf8_lossy(&body[*pos..*pos + name_len]).into_owned();
    *pos += name_len;
    let mac = format_mac(&body[*pos..*pos + 6], sep);
    *pos += 6;
    Ok((name, mac))
}

/// A device found by a Bluetooth scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BluetoothDevice {
    pub name: String,
    /// MAC formatted as `AA-BB-CC-DD-EE-FF`.
    pub mac: String,
}

/// Parses a scan reply: u16 count followed by name/MAC tuples.
pub fn parse_bluetooth_scan(body: &[u8]) -> Result<Vec<BluetoothDevice>, ProtocolError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    require(CommandId::BluetoothScan, body, 2)?;
    let count = u16::from_be_bytes([body[0], body[1]]) as usize;

    let mut pos = 2;
    let mut devices = Vec::with_capacity(count);
    for _ in 0..count {
        let (name, mac) = read_named_mac(CommandId::BluetoothScan, body, &mut pos, "-")?;
        devices.push(BluetoothDevice { name, mac });
    }
    Ok(devices)
}

/// Bluetooth link state of the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BluetoothStatus {
    pub connected: bool,
    pub name: Option<String>,
    /// MAC formatted as `AA:BB:CC:DD:EE:FF`.
    pub mac: Option<String>,
    pub a2dp: bool,
    pub hfp: bool,
    pub avrcp: bool,
    /// Battery level in percent.
    pub battery: Option<u8>,
}

impl BluetoothStatus {
    /// Returns `None` for an empty body.
    pub fn parse(body: &[u8]) -> Result<Option<Self>, ProtocolError> {
        if body.is_empty() {
            return Ok(None);
        }
        if body[0] != 1 {
            return Ok(Some(Self {
                connected: false,
                name: None,
                mac: None,
                a2dp: false,
                hfp: false,
                avrcp: false,
                battery: None,
            }));
        }

        let mut pos = 1;
        let (name, mac) = read_named_mac(CommandId::BluetoothStatus, body, &mut pos, ":")?;
        require(CommandId::BluetoothStatus, body, pos + 4)?;
        Ok(Some(Self {
            connected: true,
            name: Some(name),
            mac: Some(mac),
            a2dp: body[pos] == 1,
            hfp: body[pos + 1] == 1,
            avrcp: body[pos + 2] == 1,
            battery: Some(body[pos + 3]),
        }))
    }
}
