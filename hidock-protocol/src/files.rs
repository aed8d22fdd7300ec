//! Recording file list format.
//!
//! A file list reply is the concatenation of several frame bodies. It may
//! open with `0xFF 0xFF` followed by the total record count (u32), then
//! carries back-to-back records:
//!
//! ```text
//! +---------+----------+------+--------+----------+-----------+
//! | version | name_len | name | length | reserved | signature |
//! | 1 byte  | 3 bytes  |  n   | 4 bytes| 6 bytes  | 16 bytes  |
//! +---------+----------+------+--------+----------+-----------+
//! ```

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Marker introducing the total record count.
const COUNT_MARKER: [u8; 2] = [0xFF, 0xFF];

/// Fixed bytes per record besides the name.
const RECORD_OVERHEAD: usize = 1 + 3 + 4 + 6 + 16;

/// How a recording was captured, derived from its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    /// Manual recording (`Rec` in the name).
    Record,
    /// Whisper mode (`Wip` in the name).
    Whisper,
    /// Call or room capture started automatically.
    Call,
}

/// One recording stored on the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub name: String,
    pub version: u8,
    /// Size in bytes.
    pub length: u32,
    /// Lower-case hex signature.
    pub signature: String,
    pub created: Option<NaiveDateTime>,
    pub mode: RecordingMode,
    /// Estimated duration in milliseconds.
    pub duration_ms: u64,
}

/// Records parsed so far from a (possibly partial) listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileListing {
    /// Total announced by the device, when present.
    pub total: Option<u32>,
    pub records: Vec<FileRecord>,
}

/// Parses every complete record in `data`. A trailing partial record is
/// ignored; it completes once more chunks arrive.
pub fn parse_file_list(data: &[u8]) -> FileListing {
    let mut listing = FileListing::default();
    let mut pos = 0;

    if data.len() >= 6 && data[..2] == COUNT_MARKER {
        listing.total = Some(u32::from_be_bytes([data[2], data[3], data[4], data[5]]));
        pos = 6;
    }

    while pos + 4 <= data.len() {
        let version = data[pos];
        let name_len =
            u32::from_be_bytes([0, data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        if pos + RECORD_OVERHEAD + name_len > data.len() {
            break;
        }

        let mut cursor = pos + 4;
        let name: String = data[cursor..cursor + name_len]
            .iter()
            .filter(|&&b| b != 0)
            .map(|&b| char::from(b))
            .collect();
        cursor += name_len;

        let length = u32::from_be_bytes([
            data[cursor],
            data[cursor + 1],
            data[cursor + 2],
            data[cursor + 3],
        ]);
        cursor += 4 + 6;

        let signature = hex::encode(&data[cursor..cursor + 16]);
        cursor += 16;

        listing.records.push(FileRecord {
            created: creation_time(&name),
            mode: recording_mode(&name),
            duration_ms: duration_ms(version, length),
            name,
            version,
            length,
            signature,
        });
        pos = cursor;
    }

    listing
}

/// Parses the creation time embedded in names such as
/// `20240312-101530-Rec07.hda` or `2024Mar12-101530-Rec07.hda`.
pub fn creation_time(name: &str) -> Option<NaiveDateTime> {
    let mut parts = name.split('-');
    let date = parts.next()?;
    let time = parts.next()?;

    let date = match date.len() {
        8 => NaiveDate::parse_from_str(date, "%Y%m%d").ok()?,
        9 => NaiveDate::parse_from_str(date, "%Y%b%d").ok()?,
        _ => return None,
    };
    let time = NaiveTime::parse_from_str(time, "%H%M%S").ok()?;
    Some(date.and_time(time))
}

fn recording_mode(name: &str) -> RecordingMode {
    if name.contains("Wip") {
        RecordingMode::Whisper
    } else if name.contains("Rec") {
        RecordingMode::Record
    } else {
        RecordingMode::Call
    }
}

/// Estimates playback duration in milliseconds from the container version
/// and byte length.
pub fn duration_ms(version: u8, length: u32) -> u64 {
    let len = length as f64;
    let ms = match version {
        1 => len / 32.0 * 2.0,
        2 => (len - 44.0) / 48.0 / 2.0,
        3 => (len - 44.0) / 48.0 / 2.0 / 2.0,
        5 => len / 12.0,
        _ => len / (48.0 * 2.0 * 2.0),
    };
    ms.max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u8, name: &str, length: u32) -> Vec<u8> {
        let mut out = vec![version];
        let name_len = name.len() as u32;
        out.extend_from_slice(&name_len.to_be_bytes()[1..]);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&[0u8; 6]);
        out.extend_from_slice(&[0xABu8; 16]);
        out
    }

    #[test]
    fn test_parse_single_record() {
        let data = record(1, "20240312-101530-Rec07.hda", 64000);
        let listing = parse_file_list(&data);

        assert_eq!(listing.total, None);
        assert_eq!(listing.records.len(), 1);
        let file = &listing.records[0];
        assert_eq!(file.name, "20240312-101530-Rec07.hda");
        assert_eq!(file.length, 64000);
        assert_eq!(file.signature, "ab".repeat(16));
        assert_eq!(file.mode, RecordingMode::Record);
        assert_eq!(
            file.created,
            Some(
                NaiveDate::from_ymd_opt(2024, 3, 12)
                    .unwrap()
                    .and_hms_opt(10, 15, 30)
                    .unwrap()
            )
        );
    }

    #[test]
    fn test_count_header() {
        let mut data = vec![0xFF, 0xFF, 0x00, 0x00, 0x00, 0x02];
        data.extend(record(2, "2024Mar12-101530-Wip01.hda", 1000));
        data.extend(record(2, "2024Mar12-111530-Wip02.hda", 2000));

        let listing = parse_file_list(&data);
        assert_eq!(listing.total, Some(2));
        assert_eq!(listing.records.len(), 2);
        assert_eq!(listing.records[1].mode, RecordingMode::Whisper);
        assert!(listing.records[1].created.is_some());
    }

    #[test]
    fn test_partial_record_is_ignored() {
        let mut data = record(1, "20240312-101530-Rec07.hda", 10);
        let second = record(1, "20240312-111530-Rec08.hda", 20);
        data.extend_from_slice(&second[..second.len() - 3]);

        assert_eq!(parse_file_list(&data).records.len(), 1);
    }

    #[test]
    fn test_zero_bytes_dropped_from_name() {
        let data = record(1, "a\0b.hda", 10);
        assert_eq!(parse_file_list(&data).records[0].name, "ab.hda");
    }

    #[test]
    fn test_unparseable_name_has_no_time() {
        assert_eq!(creation_time("notes.hda"), None);
        assert_eq!(recording_mode("notes.hda"), RecordingMode::Call);
    }

    #[test]
    fn test_duration_never_negative() {
        assert_eq!(duration_ms(2, 0), 0);
        assert_eq!(duration_ms(1, 32_000), 2_000);
        assert_eq!(duration_ms(5, 12_000), 1_000);
    }
}
