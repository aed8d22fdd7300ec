//! Per-command reply decoding.
//!
//! Single-frame replies are decoded by a fixed table keyed on command id.
//! Multi-frame replies go through a [`StreamingOperation`] owned by the
//! connection instead; a streaming command that reaches this table has no
//! operation installed and completes with its raw body.
//!
//! [`StreamingOperation`]: crate::streaming::StreamingOperation

use crate::model::DeviceIdentity;
use crate::streaming::{Step, TransferOutcome};
use bytes::Bytes;
use hidock_protocol::message::{
    self, BluetoothDevice, BluetoothStatus, CardInfo, DeleteStatus, DeviceInfo, DeviceTime,
    RecordingFile, Settings, UpgradeStatus,
};
use hidock_protocol::{CommandId, FileRecord, Frame, ProtocolError};

/// A decoded device reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    DeviceInfo(DeviceInfo),
    Time(DeviceTime),
    /// Generic status byte, `true` on success.
    Status(bool),
    FileCount(u32),
    Delete(DeleteStatus),
    Upgrade(UpgradeStatus),
    Settings(Settings),
    CardInfo(CardInfo),
    RecordingFile(Option<RecordingFile>),
    BluetoothDevices(Vec<BluetoothDevice>),
    BluetoothStatus(Option<BluetoothStatus>),
    Files(Vec<FileRecord>),
    Transfer(TransferOutcome),
    Raw(Bytes),
}

type Handler = fn(&Frame, &mut DeviceIdentity) -> Result<Reply, ProtocolError>;

fn handler(command: CommandId) -> Option<Handler> {
    let handler: Handler = match command {
        CommandId::DeviceInfo => |frame, identity| {
            let info = DeviceInfo::parse(&frame.body)?;
            identity.update(&info);
            Ok(Reply::DeviceInfo(info))
        },
        CommandId::GetTime => |frame, _| Ok(Reply::Time(DeviceTime::parse(&frame.body)?)),
        CommandId::FileCount => {
            |frame, _| Ok(Reply::FileCount(message::parse_file_count(&frame.body)?))
        }
        CommandId::DeleteFile => |frame, _| Ok(Reply::Delete(DeleteStatus::parse(&frame.body)?)),
        CommandId::FirmwareUpgradeRequest => {
            |frame, _| Ok(Reply::Upgrade(UpgradeStatus::parse(&frame.body)?))
        }
        CommandId::GetSettings => |frame, _| Ok(Reply::Settings(Settings::parse(&frame.body)?)),
        CommandId::CardInfo => |frame, _| Ok(Reply::CardInfo(CardInfo::parse(&frame.body)?)),
        CommandId::RecordingFile => {
            |frame, _| Ok(Reply::RecordingFile(RecordingFile::parse(&frame.body)))
        }
        CommandId::BluetoothScan => {
            |frame, _| Ok(Reply::BluetoothDevices(message::parse_bluetooth_scan(&frame.body)?))
        }
        CommandId::BluetoothStatus => {
            |frame, _| Ok(Reply::BluetoothStatus(BluetoothStatus::parse(&frame.body)?))
        }
        CommandId::SetTime
        | CommandId::SetSettings
        | CommandId::FirmwareUpload
        | CommandId::FactoryRestore
        | CommandId::FormatCard
        | CommandId::MeetingSchedule
        | CommandId::BluetoothCommand
        | CommandId::WriteSerialNumber
        | CommandId::RecordTestStart
        | CommandId::RecordTestEnd
        | CommandId::DeviceMessageTest
        | CommandId::BncDemoTest => |frame, _| Ok(Reply::Status(message::status_ok(&frame.body))),
        CommandId::FileList
        | CommandId::TransferFile
        | CommandId::FileBlock
        | CommandId::ReadFilePart => return None,
    };
    Some(handler)
}

/// Decodes a single-frame reply. Device-info replies also refresh the
/// cached identity.
pub fn handle(
    command: CommandId,
    frame: &Frame,
    identity: &mut DeviceIdentity,
) -> Result<Step<Reply>, ProtocolError> {
    match handler(command) {
        Some(handler) => handler(frame, identity).map(Step::Complete),
        None => Ok(Step::Complete(Reply::Raw(frame.body.clone()))),
    }
}
