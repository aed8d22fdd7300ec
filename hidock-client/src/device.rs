//! Typed device API.

use crate::config::ClientConfig;
use crate::connection::{Command, Connection, ConnectionEvent};
use crate::error::ClientError;
use crate::model::{DeviceModel, Feature};
use crate::registry::Reply;
use crate::streaming::{
    DownloadAccumulator, FileListAccumulator, StreamingOperation, TransferOutcome,
};
use crate::transport::Transport;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::NaiveDateTime;
use hidock_protocol::bcd;
use hidock_protocol::message::{
    BluetoothDevice, BluetoothStatus, CardInfo, DeleteStatus, DeviceInfo, DeviceTime,
    MeetingSchedule, RecordingFile, Settings, SettingsUpdate, UpgradeStatus, FORMAT_CARD_BODY,
};
use hidock_protocol::{CommandId, FileRecord};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Extracts the expected reply variant.
macro_rules! expect_reply {
    ($command:expr, $reply:expr, $variant:ident) => {
        match $reply {
            None => Ok(None),
            Some(Reply::$variant(value)) => Ok(Some(value)),
            Some(_) => Err(ClientError::UnexpectedReply($command)),
        }
    };
}

/// A HiDock recorder.
///
/// Operations the connected model or firmware does not support return
/// `Ok(None)` without touching the wire, as do commands that time out.
pub struct Device {
    conn: Arc<Connection>,
}

impl Device {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            conn: Connection::new(transport, config),
        }
    }

    /// Uses the first recorder attached over USB.
    #[cfg(feature = "usb")]
    pub fn usb(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = crate::transport::UsbTransport::first()?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Opens the device and reads its identity, which feature gating
    /// depends on.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.open().await?;
        match self.get_device_info().await? {
            Some(info) => tracing::info!(
                "{} firmware {} serial {}",
                self.model(),
                info.version_code,
                info.serial_number
            ),
            None => tracing::warn!("Device did not report its identity"),
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.conn.close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn model(&self) -> DeviceModel {
        self.conn.identity().model
    }

    pub fn version_code(&self) -> Option<String> {
        self.conn.identity().version_code
    }

    pub fn version_number(&self) -> Option<u32> {
        self.conn.identity().version_number
    }

    pub fn serial_number(&self) -> Option<String> {
        self.conn.identity().serial_number
    }

    /// Subscribes to connect and disconnect events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.conn.subscribe()
    }

    async fn call(
        &self,
        id: CommandId,
        body: impl Into<Bytes>,
    ) -> Result<Option<Reply>, ClientError> {
        self.conn.execute(Command::new(id).with_body(body)).await
    }

    async fn status(
        &self,
        id: CommandId,
        body: impl Into<Bytes>,
    ) -> Result<Option<bool>, ClientError> {
        let reply = self.call(id, body).await?;
        expect_reply!(id, reply, Status)
    }

    fn supports(&self, feature: Feature) -> bool {
        let identity = self.conn.identity();
        let supported = identity.supports(feature);
        if !supported {
            tracing::debug!(
                "{:?} unsupported on {} firmware {:?}",
                feature,
                identity.model,
                identity.version_code
            );
        }
        supported
    }

    // =========================================================================
    // Identity and clock
    // =========================================================================

    pub async fn get_device_info(&self) -> Result<Option<DeviceInfo>, ClientError> {
        let reply = self.call(CommandId::DeviceInfo, Bytes::new()).await?;
        expect_reply!(CommandId::DeviceInfo, reply, DeviceInfo)
    }

    pub async fn get_time(&self) -> Result<Option<DeviceTime>, ClientError> {
        let reply = self.call(CommandId::GetTime, Bytes::new()).await?;
        expect_reply!(CommandId::GetTime, reply, Time)
    }

    pub async fn set_time(&self, time: &NaiveDateTime) -> Result<Option<bool>, ClientError> {
        self.status(CommandId::SetTime, bcd::encode_time(time)?).await
    }

    // =========================================================================
    // Files
    // =========================================================================

    pub async fn get_file_count(&self) -> Result<Option<u32>, ClientError> {
        let reply = self.call(CommandId::FileCount, Bytes::new()).await?;
        expect_reply!(CommandId::FileCount, reply, FileCount)
    }

    /// Lists every recording. The file count is queried first so the
    /// listing knows when it is complete.
    pub async fn list_files(&self) -> Result<Option<Vec<FileRecord>>, ClientError> {
        let count = self.get_file_count().await?;
        if count == Some(0) {
            return Ok(Some(Vec::new()));
        }

        let operation = StreamingOperation::FileList(FileListAccumulator::new(count));
        let reply = self
            .conn
            .execute_streaming(Command::new(CommandId::FileList), operation)
            .await?;
        expect_reply!(CommandId::FileList, reply, Files)
    }

    /// Streams a whole file to `on_data`. `on_progress` sees
    /// `(received, length)` after each chunk.
    pub async fn download_file(
        &self,
        name: &str,
        length: u32,
        on_data: impl FnMut(Bytes) + Send + 'static,
        on_progress: impl FnMut(u64, u64) + Send + 'static,
    ) -> Result<Option<TransferOutcome>, ClientError> {
        let body = Bytes::copy_from_slice(name.as_bytes());
        self.transfer(CommandId::TransferFile, body, length, on_data, on_progress)
            .await
    }

    /// Streams the first `length` bytes of a file.
    pub async fn get_file_block(
        &self,
        name: &str,
        length: u32,
        on_data: impl FnMut(Bytes) + Send + 'static,
        on_progress: impl FnMut(u64, u64) + Send + 'static,
    ) -> Result<Option<TransferOutcome>, ClientError> {
        let mut body = BytesMut::with_capacity(4 + name.len());
        body.put_u32(length);
        body.put_slice(name.as_bytes());
        self.transfer(CommandId::FileBlock, body.freeze(), length, on_data, on_progress)
            .await
    }

    /// Streams `length` bytes starting at `offset`.
    pub async fn read_file_part(
        &self,
        name: &str,
        offset: u32,
        length: u32,
        on_data: impl FnMut(Bytes) + Send + 'static,
        on_progress: impl FnMut(u64, u64) + Send + 'static,
    ) -> Result<Option<TransferOutcome>, ClientError> {
        let mut body = BytesMut::with_capacity(8 + name.len());
        body.put_u32(offset);
        body.put_u32(length);
        body.put_slice(name.as_bytes());
        self.transfer(CommandId::ReadFilePart, body.freeze(), length, on_data, on_progress)
            .await
    }

    async fn transfer(
        &self,
        id: CommandId,
        body: Bytes,
        length: u32,
        on_data: impl FnMut(Bytes) + Send + 'static,
        on_progress: impl FnMut(u64, u64) + Send + 'static,
    ) -> Result<Option<TransferOutcome>, ClientError> {
        let download = DownloadAccumulator::new(id, length as u64, Box::new(on_data))
            .with_progress(Box::new(on_progress));
        let reply = self
            .conn
            .execute_streaming(
                Command::new(id).with_body(body),
                StreamingOperation::Download(download),
            )
            .await?;
        expect_reply!(id, reply, Transfer)
    }

    pub async fn delete_file(&self, name: &str) -> Result<Option<DeleteStatus>, ClientError> {
        let reply = self
            .call(CommandId::DeleteFile, Bytes::copy_from_slice(name.as_bytes()))
            .await?;
        expect_reply!(CommandId::DeleteFile, reply, Delete)
    }

    // =========================================================================
    // Firmware
    // =========================================================================

    pub async fn request_firmware_upgrade(
        &self,
        version_number: u32,
        image_size: u32,
    ) -> Result<Option<UpgradeStatus>, ClientError> {
        let body = hidock_protocol::message::encode_upgrade_request(version_number, image_size);
        let reply = self.call(CommandId::FirmwareUpgradeRequest, body).await?;
        expect_reply!(CommandId::FirmwareUpgradeRequest, reply, Upgrade)
    }

    /// Sends the firmware image. Call after the upgrade request is accepted.
    pub async fn upload_firmware(
        &self,
        image: impl Into<Bytes>,
    ) -> Result<Option<bool>, ClientError> {
        self.status(CommandId::FirmwareUpload, image).await
    }

    // =========================================================================
    // Settings and storage
    // =========================================================================

    pub async fn get_settings(&self) -> Result<Option<Settings>, ClientError> {
        if !self.supports(Feature::Settings) {
            return Ok(None);
        }
        let reply = self.call(CommandId::GetSettings, Bytes::new()).await?;
        expect_reply!(CommandId::GetSettings, reply, Settings)
    }

    pub async fn set_settings(
        &self,
        update: &SettingsUpdate,
    ) -> Result<Option<bool>, ClientError> {
        if !self.supports(Feature::Settings) {
            return Ok(None);
        }
        self.status(CommandId::SetSettings, update.encode()).await
    }

    pub async fn get_card_info(&self) -> Result<Option<CardInfo>, ClientError> {
        if !self.supports(Feature::CardInfo) {
            return Ok(None);
        }
        let reply = self.call(CommandId::CardInfo, Bytes::new()).await?;
        expect_reply!(CommandId::CardInfo, reply, CardInfo)
    }

    /// Erases the storage card.
    pub async fn format_card(&self) -> Result<Option<bool>, ClientError> {
        if !self.supports(Feature::CardInfo) {
            return Ok(None);
        }
        self.status(CommandId::FormatCard, Bytes::from_static(&FORMAT_CARD_BODY))
            .await
    }

    /// Returns the recording in progress, if any.
    pub async fn get_recording_file(&self) -> Result<Option<RecordingFile>, ClientError> {
        if !self.supports(Feature::RecordingFile) {
            return Ok(None);
        }
        let reply = self.call(CommandId::RecordingFile, Bytes::new()).await?;
        let recording: Option<Option<RecordingFile>> =
            expect_reply!(CommandId::RecordingFile, reply, RecordingFile)?;
        Ok(recording.flatten())
    }

    pub async fn restore_factory_settings(&self) -> Result<Option<bool>, ClientError> {
        if !self.supports(Feature::FactoryRestore) {
            return Ok(None);
        }
        self.status(CommandId::FactoryRestore, Bytes::from_static(&[1, 2, 3, 4]))
            .await
    }

    pub async fn set_meeting_schedule(
        &self,
        schedule: &MeetingSchedule,
    ) -> Result<Option<bool>, ClientError> {
        self.status(CommandId::MeetingSchedule, schedule.encode()?).await
    }

    // =========================================================================
    // Bluetooth (P1 only)
    // =========================================================================

    pub async fn bluetooth_scan(&self) -> Result<Option<Vec<BluetoothDevice>>, ClientError> {
        if !self.supports(Feature::Bluetooth) {
            return Ok(None);
        }
        let reply = self.call(CommandId::BluetoothScan, Bytes::new()).await?;
        expect_reply!(CommandId::BluetoothScan, reply, BluetoothDevices)
    }

    /// Pairs with the device at `mac` (`AA-BB-CC-DD-EE-FF` or colon separated).
    pub async fn bluetooth_connect(&self, mac: &str) -> Result<Option<bool>, ClientError> {
        if !self.supports(Feature::Bluetooth) {
            return Ok(None);
        }
        let mut body = vec![0x00];
        body.extend_from_slice(&parse_mac(mac)?);
        self.status(CommandId::BluetoothCommand, body).await
    }

    pub async fn bluetooth_disconnect(&self) -> Result<Option<bool>, ClientError> {
        if !self.supports(Feature::Bluetooth) {
            return Ok(None);
        }
        self.status(CommandId::BluetoothCommand, Bytes::from_static(&[0x01]))
            .await
    }

    /// Returns `None` when nothing is paired.
    pub async fn bluetooth_status(&self) -> Result<Option<BluetoothStatus>, ClientError> {
        if !self.supports(Feature::Bluetooth) {
            return Ok(None);
        }
        let reply = self.call(CommandId::BluetoothStatus, Bytes::new()).await?;
        let status: Option<Option<BluetoothStatus>> =
            expect_reply!(CommandId::BluetoothStatus, reply, BluetoothStatus)?;
        Ok(status.flatten())
    }

    // =========================================================================
    // Factory and test
    // =========================================================================

    pub async fn write_serial_number(&self, serial: &str) -> Result<Option<bool>, ClientError> {
        if !serial.is_ascii() {
            return Err(ClientError::InvalidArgument(format!(
                "serial number {:?} is not ASCII",
                serial
            )));
        }
        self.status(
            CommandId::WriteSerialNumber,
            Bytes::copy_from_slice(serial.as_bytes()),
        )
        .await
    }

    pub async fn start_record_test(&self, kind: u8) -> Result<Option<bool>, ClientError> {
        self.status(CommandId::RecordTestStart, vec![kind]).await
    }

    pub async fn end_record_test(&self, kind: u8) -> Result<Option<bool>, ClientError> {
        self.status(CommandId::RecordTestEnd, vec![kind]).await
    }

    pub async fn device_message_test(&self) -> Result<Option<bool>, ClientError> {
        self.status(CommandId::DeviceMessageTest, Bytes::new()).await
    }

    pub async fn bnc_demo_test(&self, enable: bool) -> Result<Option<bool>, ClientError> {
        self.status(CommandId::BncDemoTest, vec![u8::from(enable)]).await
    }
}

fn parse_mac(mac: &str) -> Result<[u8; 6], ClientError> {
    let invalid = || ClientError::InvalidArgument(format!("invalid MAC address {:?}", mac));

    let mut out = [0u8; 6];
    let mut parts = mac.split(|c: char| c == '-' || c == ':');
    for byte in out.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use hidock_protocol::Frame;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn test_config() -> ClientConfig {
        ClientConfig::new()
            .with_command_timeout(Duration::from_millis(300))
            .with_transfer_timeout(Duration::from_millis(500))
            .with_debounce(Duration::from_millis(2), Duration::from_millis(5))
            .with_liveness_interval(Duration::from_millis(50))
    }

    fn info_body(version: [u8; 4], serial: &[u8]) -> Vec<u8> {
        let mut body = version.to_vec();
        body.extend_from_slice(serial);
        body.resize(20, 0);
        body
    }

    /// A recorder with the given firmware. `reply` answers everything but
    /// device info; it returns the frame bodies to send back.
    fn recorder(
        product_id: u16,
        version: [u8; 4],
        mut reply: impl FnMut(&Frame) -> Vec<Vec<u8>> + Send + 'static,
    ) -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new(product_id));
        mock.set_responder(move |frame| {
            let id = CommandId::try_from(frame.command).unwrap();
            let bodies = if id == CommandId::DeviceInfo {
                vec![info_body(version, b"HD1E243")]
            } else {
                reply(frame)
            };
            bodies
                .iter()
                .map(|body| MockTransport::frame(id, frame.sequence, body))
                .collect()
        });
        mock
    }

    async fn connect(mock: &Arc<MockTransport>) -> Device {
        let device = Device::new(mock.clone(), test_config());
        device.connect().await.unwrap();
        device
    }

    #[tokio::test]
    async fn test_connect_reads_identity() {
        let mock = recorder(0xAF0D, [0x00, 0x05, 0x00, 0x2A], |_| Vec::new());
        let device = connect(&mock).await;

        assert!(device.is_connected());
        assert_eq!(device.model(), DeviceModel::H1E);
        assert_eq!(device.version_code().as_deref(), Some("5.0.42"));
        assert_eq!(device.version_number(), Some(0x0005_002A));
        assert_eq!(device.serial_number().as_deref(), Some("HD1E243"));
    }

    #[tokio::test]
    async fn test_card_info_scenario() {
        let mock = recorder(0xAF0E, [0, 1, 0, 0], |_| {
            vec![vec![0, 0, 0x10, 0, 0, 0, 0x40, 0, 0, 0, 0, 1]]
        });
        let device = connect(&mock).await;

        let card = device.get_card_info().await.unwrap().unwrap();
        assert_eq!(card.used, 4096);
        assert_eq!(card.capacity, 16384);
        assert_eq!(card.status, "1");
    }

    #[tokio::test]
    async fn test_old_firmware_is_gated_without_wire_traffic() {
        // H1 at 327713 is one below the settings threshold.
        let version = 327713u32.to_be_bytes();
        let mock = recorder(0xAF0C, version, |_| vec![vec![0]]);
        let device = connect(&mock).await;
        let before = mock.written().len();

        assert_eq!(device.get_settings().await.unwrap(), None);
        assert_eq!(device.get_card_info().await.unwrap(), None);
        assert_eq!(device.format_card().await.unwrap(), None);
        assert_eq!(device.get_recording_file().await.unwrap(), None);
        assert_eq!(mock.written().len(), before);

        // Factory restore opened up at 327705.
        assert_eq!(device.restore_factory_settings().await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_bluetooth_requires_p1() {
        let mock = recorder(0xAF0D, [0, 6, 2, 0], |_| vec![vec![0]]);
        let device = connect(&mock).await;
        let before = mock.written().len();

        assert_eq!(device.bluetooth_scan().await.unwrap(), None);
        assert_eq!(device.bluetooth_status().await.unwrap(), None);
        assert_eq!(device.bluetooth_connect("AA-BB-CC-DD-EE-FF").await.unwrap(), None);
        assert_eq!(mock.written().len(), before);
    }

    #[tokio::test]
    async fn test_bluetooth_connect_body() {
        let mock = recorder(0xAF0E, [0, 1, 0, 0], |_| vec![vec![0]]);
        let device = connect(&mock).await;

        assert_eq!(
            device.bluetooth_connect("aa:bb:cc:dd:ee:0f").await.unwrap(),
            Some(true)
        );
        let sent = mock.written().last().cloned().unwrap();
        assert_eq!(sent.command, CommandId::BluetoothCommand.code());
        assert_eq!(&sent.body[..], &[0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x0F]);

        assert!(matches!(
            device.bluetooth_connect("not-a-mac").await,
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_list_files_across_frames() {
        let first = MockTransport::list_entry(1, "20240312-101530-Rec07.hda", 64000);
        let second = MockTransport::list_entry(2, "2024Mar13-080000-Wip01.hda", 44 + 48 * 2 * 1000);
        let mut listing = first.clone();
        listing.extend_from_slice(&second);
        let split = first.len() + 7;

        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], move |frame| {
            match CommandId::try_from(frame.command).unwrap() {
                CommandId::FileCount => vec![vec![0, 0, 0, 2]],
                CommandId::FileList => vec![listing[..split].to_vec(), listing[split..].to_vec()],
                _ => Vec::new(),
            }
        });
        let device = connect(&mock).await;

        let files = device.list_files().await.unwrap().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "20240312-101530-Rec07.hda");
        assert_eq!(files[0].length, 64000);
        assert_eq!(files[1].mode, hidock_protocol::RecordingMode::Whisper);
        assert!(files[1].created.is_some());
    }

    #[tokio::test]
    async fn test_list_files_with_no_files_skips_listing() {
        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], |_| vec![vec![0, 0, 0, 0]]);
        let device = connect(&mock).await;

        assert_eq!(device.list_files().await.unwrap(), Some(Vec::new()));
        assert!(!mock
            .written_commands()
            .contains(&CommandId::FileList.code()));
    }

    #[tokio::test]
    async fn test_download_streams_chunks() {
        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], |frame| {
            assert_eq!(&frame.body[..], b"rec.hda");
            vec![b"hello ".to_vec(), b"world".to_vec()]
        });
        let device = connect(&mock).await;

        let data = Arc::new(Mutex::new(Vec::new()));
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = data.clone();
        let seen = progress.clone();

        let outcome = device
            .download_file(
                "rec.hda",
                11,
                move |chunk| sink.lock().extend_from_slice(&chunk),
                move |received, total| seen.lock().push((received, total)),
            )
            .await
            .unwrap();

        assert_eq!(outcome, Some(TransferOutcome::Completed { bytes: 11 }));
        assert_eq!(data.lock().as_slice(), b"hello world");
        assert_eq!(progress.lock().as_slice(), &[(6, 11), (11, 11)]);
    }

    #[tokio::test]
    async fn test_read_file_part_body_layout() {
        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], |_| vec![vec![7; 4]]);
        let device = connect(&mock).await;

        let outcome = device
            .read_file_part("a.hda", 16, 4, |_| {}, |_, _| {})
            .await
            .unwrap();
        assert_eq!(outcome, Some(TransferOutcome::Completed { bytes: 4 }));

        let sent = mock.written().last().cloned().unwrap();
        assert_eq!(sent.command, CommandId::ReadFilePart.code());
        assert_eq!(&sent.body[..8], &[0, 0, 0, 16, 0, 0, 0, 4]);
        assert_eq!(&sent.body[8..], b"a.hda");
    }

    #[tokio::test]
    async fn test_download_failure_on_empty_frame() {
        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], |_| vec![Vec::new()]);
        let device = connect(&mock).await;

        let outcome = device
            .get_file_block("missing.hda", 512, |_| {}, |_, _| {})
            .await
            .unwrap();
        assert_eq!(outcome, Some(TransferOutcome::Failed { received: 0 }));
    }

    #[tokio::test]
    async fn test_time_roundtrip_bodies() {
        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], |frame| {
            match CommandId::try_from(frame.command).unwrap() {
                CommandId::GetTime => vec![vec![0x20, 0x24, 0x03, 0x12, 0x10, 0x15, 0x30]],
                _ => vec![vec![0]],
            }
        });
        let device = connect(&mock).await;

        let time = device.get_time().await.unwrap().unwrap();
        assert_eq!(time.raw, "20240312101530");

        let when = time.datetime.unwrap();
        assert_eq!(device.set_time(&when).await.unwrap(), Some(true));
        let sent = mock.written().last().cloned().unwrap();
        assert_eq!(&sent.body[..], &[0x20, 0x24, 0x03, 0x12, 0x10, 0x15, 0x30]);
    }

    #[tokio::test]
    async fn test_set_time_rejects_unencodable_year() {
        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], |_| vec![vec![0]]);
        let device = connect(&mock).await;
        let written = mock.written().len();

        let far = chrono::NaiveDate::from_ymd_opt(12_000, 6, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert!(matches!(
            device.set_time(&far).await,
            Err(ClientError::Protocol(_))
        ));
        assert_eq!(mock.written().len(), written);
    }

    #[tokio::test]
    async fn test_set_settings_on_supported_firmware() {
        let mock = recorder(0xAF0D, [0, 6, 1, 4], |_| vec![vec![0]]);
        let device = connect(&mock).await;

        let update = SettingsUpdate {
            auto_record: Some(true),
            ..Default::default()
        };
        assert_eq!(device.set_settings(&update).await.unwrap(), Some(true));

        let sent = mock.written().last().cloned().unwrap();
        assert_eq!(sent.body.len(), 16);
        assert_eq!(sent.body[3], 1);
    }

    #[tokio::test]
    async fn test_disconnect_publishes_event() {
        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], |_| Vec::new());
        let device = connect(&mock).await;
        let mut events = device.subscribe();

        device.disconnect().await;
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert!(!device.is_connected());
        assert_eq!(device.version_number(), None);
        assert!(matches!(
            device.get_time().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_firmware_upgrade_flow() {
        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], |frame| {
            match CommandId::try_from(frame.command).unwrap() {
                CommandId::FirmwareUpgradeRequest => vec![vec![0]],
                CommandId::FirmwareUpload => vec![vec![0]],
                _ => Vec::new(),
            }
        });
        let device = connect(&mock).await;

        let status = device.request_firmware_upgrade(0x0005_0031, 4).await.unwrap();
        assert_eq!(status, Some(UpgradeStatus::Accepted));
        assert_eq!(
            device.upload_firmware(vec![1, 2, 3, 4]).await.unwrap(),
            Some(true)
        );

        let sent = mock.written();
        assert_eq!(&sent[1].body[..], &[0, 5, 0, 0x31, 0, 0, 0, 4]);
        assert_eq!(&sent[2].body[..], &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_delete_and_factory_commands() {
        let mock = recorder(0xAF0C, [0, 5, 0, 0x30], |frame| {
            match CommandId::try_from(frame.command).unwrap() {
                CommandId::DeleteFile => vec![vec![1]],
                _ => vec![vec![0]],
            }
        });
        let device = connect(&mock).await;

        assert_eq!(
            device.delete_file("gone.hda").await.unwrap(),
            Some(DeleteStatus::NotExists)
        );
        assert_eq!(device.write_serial_number("HD1E0042").await.unwrap(), Some(true));
        assert_eq!(device.start_record_test(2).await.unwrap(), Some(true));
        assert_eq!(device.end_record_test(2).await.unwrap(), Some(true));
        assert_eq!(device.device_message_test().await.unwrap(), Some(true));
        assert_eq!(device.bnc_demo_test(true).await.unwrap(), Some(true));
        assert!(matches!(
            device.write_serial_number("séria").await,
            Err(ClientError::InvalidArgument(_))
        ));

        let commands = mock.written_commands();
        assert_eq!(
            &commands[1..],
            &[
                CommandId::DeleteFile.code(),
                CommandId::WriteSerialNumber.code(),
                CommandId::RecordTestStart.code(),
                CommandId::RecordTestEnd.code(),
                CommandId::DeviceMessageTest.code(),
                CommandId::BncDemoTest.code(),
            ]
        );
    }

    #[test]
    fn test_parse_mac() {
        assert_eq!(
            parse_mac("01-23-45-67-89-AB").unwrap(),
            [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB]
        );
        assert!(parse_mac("01-23-45-67-89").is_err());
        assert!(parse_mac("01-23-45-67-89-AB-CD").is_err());
        assert!(parse_mac("0-123-45-67-89-AB").is_err());
        assert!(parse_mac("+1-23-45-67-89-AB").is_err());
        assert_eq!(
            parse_mac("aa:bb:cc:dd:ee:ff").unwrap(),
            [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]
        );
    }
}
