//! In-memory transport for tests and offline tooling.
//!
//! Every write is decoded and recorded. An optional responder closure sees
//! each written frame and returns the byte chunks the "device" sends back;
//! each chunk is delivered by a separate read, so tests can script
//! fragmented transfers.

use super::{BoxFuture, Transport};
use bytes::Bytes;
use hidock_protocol::{CommandId, Decoder, Encoder, Frame};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Produces device output for a written frame.
pub type Responder = Box<dyn FnMut(&Frame) -> Vec<Bytes> + Send>;

/// Scriptable in-memory device.
pub struct MockTransport {
    product_id: u16,
    open: AtomicBool,
    fail_writes: AtomicBool,
    written: Mutex<Vec<Frame>>,
    responder: Mutex<Option<Responder>>,
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MockTransport {
    pub fn new(product_id: u16) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            product_id,
            open: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    /// Installs the closure that answers written frames.
    pub fn set_responder(&self, responder: impl FnMut(&Frame) -> Vec<Bytes> + Send + 'static) {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Queues raw bytes for the next read.
    pub fn push(&self, data: impl Into<Bytes>) {
        let _ = self.inbound_tx.send(data.into());
    }

    /// Makes subsequent writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Simulates the device being unplugged.
    pub fn unplug(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Returns the frames written so far.
    pub fn written(&self) -> Vec<Frame> {
        self.written.lock().clone()
    }

    /// Returns the command ids written so far.
    pub fn written_commands(&self) -> Vec<u16> {
        self.written.lock().iter().map(|f| f.command).collect()
    }

    /// Builds one file-list record as the device lays it out.
    pub fn list_entry(version: u8, name: &str, length: u32) -> Vec<u8> {
        let mut out = vec![version];
        out.extend_from_slice(&(name.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&[0u8; 6]);
        out.extend_from_slice(&[0x5Au8; 16]);
        out
    }

    /// Encodes a device reply frame.
    pub fn frame(command: CommandId, sequence: u32, body: &[u8]) -> Bytes {
        Encoder::encode(command.code(), sequence, body)
            .map(|b| b.freeze())
            .unwrap_or_default()
    }
}

impl Transport for MockTransport {
    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn open(&self) -> BoxFuture<'_, io::Result<()>> {
        self.open.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn claim_interface(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn write(&self, _endpoint: u8, data: Bytes) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write stalled"));
            }

            let mut decoder = Decoder::new();
            decoder.extend(&data);
            let frames = decoder
                .decode_frames()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            for frame in frames {
                self.written.lock().push(frame.clone());
                let replies = match self.responder.lock().as_mut() {
                    Some(responder) => responder(&frame),
                    None => Vec::new(),
                };
                for chunk in replies {
                    let _ = self.inbound_tx.send(chunk);
                }
            }
            Ok(())
        })
    }

    fn read(&self, _endpoint: u8, _max_len: usize) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(async move {
            let mut rx = self.inbound_rx.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "mock closed"))
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> BoxFuture<'_, io::Result<()>> {
        self.open.store(false, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
