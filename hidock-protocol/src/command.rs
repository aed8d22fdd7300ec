//! Command identifiers.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Command identifiers understood by the device firmware.
///
/// The discriminants are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum CommandId {
    DeviceInfo = 1,
    GetTime = 2,
    SetTime = 3,
    FileList = 4,
    TransferFile = 5,
    FileCount = 6,
    DeleteFile = 7,
    FirmwareUpgradeRequest = 8,
    FirmwareUpload = 9,
    GetSettings = 11,
    SetSettings = 12,
    FileBlock = 13,
    CardInfo = 16,
    FormatCard = 17,
    RecordingFile = 18,
    FactoryRestore = 19,
    MeetingSchedule = 20,
    ReadFilePart = 21,
    BluetoothScan = 4097,
    BluetoothCommand = 4098,
    BluetoothStatus = 4099,
    WriteSerialNumber = 61447,
    RecordTestStart = 61448,
    RecordTestEnd = 61449,
    DeviceMessageTest = 61450,
    BncDemoTest = 61451,
}

impl CommandId {
    /// Returns the wire value.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Returns whether replies to this command arrive as several frames.
    pub fn is_streaming(self) -> bool {
        matches!(
            self,
            CommandId::FileList
                | CommandId::TransferFile
                | CommandId::FileBlock
                | CommandId::ReadFilePart
        )
    }

    /// Returns whether this command moves file contents, which the receive
    /// pipeline waits longer on before decoding.
    pub fn is_file_transfer(self) -> bool {
        matches!(
            self,
            CommandId::TransferFile | CommandId::FileBlock | CommandId::ReadFilePart
        )
    }
}

impl TryFrom<u16> for CommandId {
    type Error = ProtocolError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        let id = match code {
            1 => CommandId::DeviceInfo,
            2 => CommandId::GetTime,
            3 => CommandId::SetTime,
            4 => CommandId::FileList,
            5 => CommandId::TransferFile,
            6 => CommandId::FileCount,
            7 => CommandId::DeleteFile,
            8 => CommandId::FirmwareUpgradeRequest,
            9 => CommandId::FirmwareUpload,
            11 => CommandId::GetSettings,
            12 => CommandId::SetSettings,
            13 => CommandId::FileBlock,
            16 => CommandId::CardInfo,
            17 => CommandId::FormatCard,
            18 => CommandId::RecordingFile,
            19 => CommandId::FactoryRestore,
            20 => CommandId::MeetingSchedule,
            21 => CommandId::ReadFilePart,
            4097 => CommandId::BluetoothScan,
            4098 => CommandId::BluetoothCommand,
            4099 => CommandId::BluetoothStatus,
            61447 => CommandId::WriteSerialNumber,
            61448 => CommandId::RecordTestStart,
            61449 => CommandId::RecordTestEnd,
            61450 => CommandId::DeviceMessageTest,
            61451 => CommandId::BncDemoTest,
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(id)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for id in [
            CommandId::DeviceInfo,
            CommandId::TransferFile,
            CommandId::ReadFilePart,
            CommandId::BluetoothStatus,
            CommandId::BncDemoTest,
        ] {
            assert_eq!(CommandId::try_from(id.code()).unwrap(), id);
        }
    }

    #[test]
    fn test_unknown_code() {
        assert!(matches!(
            CommandId::try_from(10),
            Err(ProtocolError::UnknownCommand(10))
        ));
    }

    #[test]
    fn test_streaming_commands() {
        assert!(CommandId::FileList.is_streaming());
        assert!(CommandId::TransferFile.is_streaming());
        assert!(!CommandId::FileList.is_file_transfer());
        assert!(CommandId::ReadFilePart.is_file_transfer());
        assert!(!CommandId::DeviceInfo.is_streaming());
    }

    #[test]
    fn test_display() {
        assert_eq!(CommandId::CardInfo.to_string(), "CardInfo(16)");
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&CommandId::FileCount).unwrap();
        assert_eq!(json, "\"FILE_COUNT\"");
    }
}
