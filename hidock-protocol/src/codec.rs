//! Encoder and reassembling decoder for HiDock frames.

use crate::error::ProtocolError;
use crate::frame::{encode_parts, Decoded, Frame};
use bytes::BytesMut;

/// Encodes outbound commands into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a command body into a frame.
    pub fn encode(command: u16, sequence: u32, body: &[u8]) -> Result<BytesMut, ProtocolError> {
        encode_parts(command, sequence, body)
    }
}

/// Accumulates received bytes and peels off complete frames.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decodes every complete frame currently buffered.
    ///
    /// The consumed prefix (frames plus any junk skipped while
    /// resynchronizing) is split off in one operation and frame bodies are
    /// handed out as slices of it.
    ///
    /// Frames that precede a region with no sync marker are returned first
    /// and the corrupt bytes stay buffered; the following call reports
    /// `SyncLost` and clears the buffer. Callers drain until the result is
    /// empty or an error.
    pub fn decode_frames(&mut self) -> Result<Vec<Frame>, ProtocolError> {
        let mut offset = 0;
        let mut layouts = Vec::new();

        loop {
            match Frame::decode_at(&self.buffer, offset) {
                Ok(Decoded::Frame {
                    command,
                    sequence,
                    body,
                    checksum,
                    consumed,
                }) => {
                    layouts.push((command, sequence, body, checksum));
                    offset += consumed;
                }
                Ok(Decoded::Skip(n)) => offset += n,
                Ok(Decoded::NeedMoreData) => break,
                Err(_) if !layouts.is_empty() => break,
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                }
            }
        }

        if offset == 0 {
            return Ok(Vec::new());
        }

        let consumed = self.buffer.split_to(offset).freeze();
        Ok(layouts
            .into_iter()
            .map(|(command, sequence, body, checksum)| Frame {
                command,
                sequence,
                body: consumed.slice(body),
                checksum: consumed.slice(checksum),
            })
            .collect())
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
