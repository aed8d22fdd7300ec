//! Stateful handlers for replies that span several frames.

use crate::registry::Reply;
use bytes::{Bytes, BytesMut};
use hidock_protocol::files::parse_file_list;
use hidock_protocol::{CommandId, FileRecord};
use serde::Serialize;
use std::fmt;

/// Result of feeding one frame to a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    /// The reply is complete; resolve the waiting caller.
    Complete(T),
    /// More frames belong to this reply.
    Continue,
}

/// Final state of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum TransferOutcome {
    Completed { bytes: u64 },
    /// The device sent an empty frame before the declared length arrived.
    Failed { received: u64 },
}

impl TransferOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }
}

/// Collects file-list chunks until every announced record has arrived.
#[derive(Debug, Default)]
pub struct FileListAccumulator {
    data: BytesMut,
    expected: Option<u32>,
}

impl FileListAccumulator {
    /// `expected` is the count from a prior file-count query, if any. A
    /// total announced in the list header takes over when this is `None`.
    pub fn new(expected: Option<u32>) -> Self {
        Self {
            data: BytesMut::new(),
            expected,
        }
    }

    pub fn feed(&mut self, body: &[u8]) -> Step<Vec<FileRecord>> {
        if body.is_empty() {
            return Step::Complete(parse_file_list(&self.data).records);
        }

        self.data.extend_from_slice(body);
        let listing = parse_file_list(&self.data);
        match self.expected.or(listing.total) {
            Some(total) if listing.records.len() >= total as usize => {
                Step::Complete(listing.records)
            }
            _ => Step::Continue,
        }
    }

    pub fn buffered(&self) -> usize {
        self.data.len()
    }
}

/// Receives file contents.
pub type DataSink = Box<dyn FnMut(Bytes) + Send>;

/// Observes `(received, expected)` after every chunk.
pub type ProgressSink = Box<dyn FnMut(u64, u64) + Send>;

/// Forwards file chunks to a sink until the declared length is reached.
pub struct DownloadAccumulator {
    command: CommandId,
    expected: u64,
    received: u64,
    on_data: DataSink,
    on_progress: Option<ProgressSink>,
}

impl DownloadAccumulator {
    pub fn new(command: CommandId, expected: u64, on_data: DataSink) -> Self {
        Self {
            command,
            expected,
            received: 0,
            on_data,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, on_progress: ProgressSink) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn feed(&mut self, body: Bytes) -> Step<TransferOutcome> {
        if body.is_empty() {
            return Step::Complete(TransferOutcome::Failed {
                received: self.received,
            });
        }

        self.received += body.len() as u64;
        (self.on_data)(body);
        if let Some(progress) = self.on_progress.as_mut() {
            progress(self.received, self.expected);
        }

        if self.received >= self.expected {
            Step::Complete(TransferOutcome::Completed {
                bytes: self.received,
            })
        } else {
            Step::Continue
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

impl fmt::Debug for DownloadAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadAccumulator")
            .field("command", &self.command)
            .field("expected", &self.expected)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

/// The multi-frame operation currently owned by the connection.
///
/// At most one exists at a time. It is dropped once it completes, so no
/// frame is forwarded after completion.
#[derive(Debug)]
pub enum StreamingOperation {
    FileList(FileListAccumulator),
    Download(DownloadAccumulator),
}

impl StreamingOperation {
    pub fn command(&self) -> CommandId {
        match self {
            StreamingOperation::FileList(_) => CommandId::FileList,
            StreamingOperation::Download(download) => download.command,
        }
    }

    pub fn feed(&mut self, body: Bytes) -> Step<Reply> {
        match self {
            StreamingOperation::FileList(list) => match list.feed(&body) {
                Step::Complete(records) => Step::Complete(Reply::Files(records)),
                Step::Continue => Step::Continue,
            },
            StreamingOperation::Download(download) => match download.feed(body) {
                Step::Complete(outcome) => Step::Complete(Reply::Transfer(outcome)),
                Step::Continue => Step::Continue,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn record(version: u8, name: &str, length: u32) -> Vec<u8> {
        MockTransport::list_entry(version, name, length)
    }

    #[test]
    fn test_file_list_completes_at_expected_count() {
        let mut list = FileListAccumulator::new(Some(2));
        let first = record(1, "20240312-101530-Rec07.hda", 4096);
        let second = record(1, "20240313-080000-Rec08.hda", 8192);

        assert_eq!(list.feed(&first), Step::Continue);
        // Split the second record across two frames.
        assert_eq!(list.feed(&second[..10]), Step::Continue);
        match list.feed(&second[10..]) {
            Step::Complete(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[1].name, "20240313-080000-Rec08.hda");
            }
            Step::Continue => panic!("listing should be complete"),
        }
    }

    #[test]
    fn test_file_list_uses_header_total() {
        let mut list = FileListAccumulator::new(None);
        let mut body = vec![0xFF, 0xFF, 0, 0, 0, 1];
        body.extend_from_slice(&record(2, "2024Mar12-101530-Wip01.hda", 1000));

        match list.feed(&body) {
            Step::Complete(records) => assert_eq!(records.len(), 1),
            Step::Continue => panic!("header total should complete the listing"),
        }
    }

    #[test]
    fn test_file_list_empty_frame_ends_listing() {
        let mut list = FileListAccumulator::new(None);
        assert_eq!(list.feed(&record(1, "a.hda", 64)), Step::Continue);
        match list.feed(&[]) {
            Step::Complete(records) => assert_eq!(records.len(), 1),
            Step::Continue => panic!("empty frame should end the listing"),
        }
    }

    #[test]
    fn test_download_forwards_chunks_and_completes_once() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let progress = Arc::new(Mutex::new(Vec::new()));

        let data = sink.clone();
        let seen = progress.clone();
        let mut download = DownloadAccumulator::new(
            CommandId::TransferFile,
            10,
            Box::new(move |chunk: Bytes| data.lock().extend_from_slice(&chunk)),
        )
        .with_progress(Box::new(move |received, expected| {
            seen.lock().push((received, expected))
        }));

        assert_eq!(download.feed(Bytes::from_static(b"hello")), Step::Continue);
        assert_eq!(
            download.feed(Bytes::from_static(b"world")),
            Step::Complete(TransferOutcome::Completed { bytes: 10 })
        );
        assert_eq!(sink.lock().as_slice(), b"helloworld");
        assert_eq!(progress.lock().as_slice(), &[(5, 10), (10, 10)]);
    }

    #[test]
    fn test_download_empty_body_is_failure() {
        let mut download =
            DownloadAccumulator::new(CommandId::FileBlock, 100, Box::new(|_: Bytes| {}));
        assert_eq!(
            download.feed(Bytes::new()),
            Step::Complete(TransferOutcome::Failed { received: 0 })
        );
    }

    #[test]
    fn test_operation_command() {
        let op = StreamingOperation::FileList(FileListAccumulator::new(None));
        assert_eq!(op.command(), CommandId::FileList);

        let op = StreamingOperation::Download(DownloadAccumulator::new(
            CommandId::ReadFilePart,
            1,
            Box::new(|_: Bytes| {}),
        ));
        assert_eq!(op.command(), CommandId::ReadFilePart);
    }
}
