//! Binary frame format for the HiDock command channel.
//!
//! Frame layout (12 bytes header + body + optional checksum):
//!
//! ```text
//! +--------+---------+----------+--------------+----------------+
//! |  sync  | command | sequence | checksum_len |    body_len    |
//! | 2 bytes| 2 bytes | 4 bytes  |    1 byte    |    3 bytes     |
//! +--------+---------+----------+--------------+----------------+
//! | body                        | checksum                      |
//! | body_len bytes              | checksum_len bytes            |
//! +-----------------------------+-------------------------------+
//! ```
//!
//! All integers are big-endian. Checksum bytes are consumed on decode but
//! not validated; devices observed so far always send a zero length.

use crate::error::ProtocolError;
use crate::MAX_BODY_SIZE;
use bytes::{BufMut, Bytes, BytesMut};

/// Sync marker opening every frame.
pub const SYNC: [u8; 2] = [0x12, 0x34];

/// Size of the fixed frame header in bytes (2+2+4+4 = 12).
pub const FRAME_HEADER_SIZE: usize = 12;

/// A parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command identifier.
    pub command: u16,
    /// Sequence number.
    pub sequence: u32,
    /// Frame body.
    pub body: Bytes,
    /// Trailing checksum bytes as received.
    pub checksum: Bytes,
}

/// Outcome of a single decode attempt at an offset.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame. `body` is the range of the body inside the
    /// scanned buffer, `consumed` the full frame length.
    Frame {
        command: u16,
        sequence: u32,
        body: std::ops::Range<usize>,
        checksum: std::ops::Range<usize>,
        consumed: usize,
    },
    /// Junk before the next sync marker; skip this many bytes and retry.
    Skip(usize),
    /// Not enough bytes yet.
    NeedMoreData,
}

impl Frame {
    /// Creates a new frame with the given body and no checksum.
    pub fn new(command: u16, sequence: u32, body: Bytes) -> Self {
        Self {
            command,
            sequence,
            body,
            checksum: Bytes::new(),
        }
    }

    /// Total encoded length of this frame.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.body.len() + self.checksum.len()
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        encode_parts(self.command, self.sequence, &self.body)
    }

    /// Inspects `buf` starting at `offset` without consuming anything.
    ///
    /// Returns the frame layout when complete, the number of junk bytes to
    /// skip when the sync marker is not at `offset`, or `NeedMoreData`.
    pub fn decode_at(buf: &[u8], offset: usize) -> Result<Decoded, ProtocolError> {
        let remaining = buf.len().saturating_sub(offset);
        if remaining < FRAME_HEADER_SIZE {
            return Ok(Decoded::NeedMoreData);
        }

        let data = &buf[offset..];
        if data[..2] != SYNC {
            return resync(data);
        }

        let command = u16::from_be_bytes([data[2], data[3]]);
        let sequence = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let length_word = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let checksum_len = (length_word >> 24) as usize;
        let body_len = (length_word & 0x00FF_FFFF) as usize;

        let total_len = FRAME_HEADER_SIZE + body_len + checksum_len;
        if remaining < total_len {
            return Ok(Decoded::NeedMoreData);
        }

        let body_start = offset + FRAME_HEADER_SIZE;
        let checksum_start = body_start + body_len;
        Ok(Decoded::Frame {
            command,
            sequence,
            body: body_start..checksum_start,
            checksum: checksum_start..checksum_start + checksum_len,
            consumed: total_len,
        })
    }
}

/// Encodes a frame directly from its parts.
pub fn encode_parts(command: u16, sequence: u32, body: &[u8]) -> Result<BytesMut, ProtocolError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge {
            size: body.len(),
            max: MAX_BODY_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.put_slice(&SYNC);
    buf.put_u16(command);
    buf.put_u32(sequence);
    // checksum length lives in the top byte and is always zero on send
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(buf)
}

fn resync(data: &[u8]) -> Result<Decoded, ProtocolError> {
    if let Some(pos) = data[1..].windows(2).position(|w| w == SYNC) {
        return Ok(Decoded::Skip(pos + 1));
    }
    // the first half of a marker may be the last byte of this read
    if data.len() > 1 && data[data.len() - 1] == SYNC[0] {
        return Ok(Decoded::Skip(data.len() - 1));
    }
    Err(ProtocolError::SyncLost {
        buffered: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_layout(buf: &[u8], offset: usize) -> (u16, u32, Vec<u8>, usize) {
        match Frame::decode_at(buf, offset).unwrap() {
            Decoded::Frame {
                command,
                sequence,
                body,
                consumed,
                ..
            } => (command, sequence, buf[body].to_vec(), consumed),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_layout() {
        let frame = Frame::new(1, 7, Bytes::from_static(&[0xAA, 0xBB]));
        let encoded = frame.encode().unwrap();

        assert_eq!(
            &encoded[..],
            &[0x12, 0x34, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB]
        );
        assert_eq!(frame.encoded_len(), encoded.len());
    }

    #[test]
    fn test_empty_body_is_minimum_frame() {
        let encoded = Frame::new(6, 0, Bytes::new()).encode().unwrap();
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE);

        let (command, sequence, body, consumed) = frame_layout(&encoded, 0);
        assert_eq!(command, 6);
        assert_eq!(sequence, 0);
        assert!(body.is_empty());
        assert_eq!(consumed, FRAME_HEADER_SIZE);
    }

    #[test]
    fn test_short_header_needs_more_data() {
        let buf = [0x12, 0x34, 0x00, 0x01];
        assert_eq!(Frame::decode_at(&buf, 0).unwrap(), Decoded::NeedMoreData);
    }

    #[test]
    fn test_incomplete_body_needs_more_data() {
        let encoded = Frame::new(4, 1, Bytes::from(vec![1u8; 32])).encode().unwrap();
        let partial = &encoded[..encoded.len() - 1];
        assert_eq!(Frame::decode_at(partial, 0).unwrap(), Decoded::NeedMoreData);
    }

    #[test]
    fn test_checksum_bytes_are_consumed() {
        let mut buf = Frame::new(2, 3, Bytes::from_static(b"ab"))
            .encode()
            .unwrap();
        // two checksum bytes announced in the high byte of the length word
        buf[8] = 2;
        buf.extend_from_slice(&[0xDE, 0xAD]);

        match Frame::decode_at(&buf, 0).unwrap() {
            Decoded::Frame {
                body,
                checksum,
                consumed,
                ..
            } => {
                assert_eq!(&buf[body], b"ab");
                assert_eq!(&buf[checksum], &[0xDE, 0xAD]);
                assert_eq!(consumed, FRAME_HEADER_SIZE + 4);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_sync_skips_to_next_marker() {
        let mut buf = vec![0x00, 0xFF, 0x77];
        buf.extend_from_slice(&Frame::new(1, 0, Bytes::new()).encode().unwrap());
        assert_eq!(Frame::decode_at(&buf, 0).unwrap(), Decoded::Skip(3));

        let (command, ..) = frame_layout(&buf, 3);
        assert_eq!(command, 1);
    }

    #[test]
    fn test_trailing_half_marker_is_kept() {
        let mut buf = vec![0u8; FRAME_HEADER_SIZE];
        buf.push(0x12);
        assert_eq!(
            Frame::decode_at(&buf, 0).unwrap(),
            Decoded::Skip(FRAME_HEADER_SIZE)
        );
    }

    #[test]
    fn test_no_marker_is_sync_lost() {
        let buf = vec![0x55u8; 40];
        let result = Frame::decode_at(&buf, 0);
        assert!(matches!(
            result,
            Err(ProtocolError::SyncLost { buffered: 40 })
        ));
    }

    #[test]
    fn test_decode_at_offset() {
        let first = Frame::new(1, 0, Bytes::from_static(b"x")).encode().unwrap();
        let second = Frame::new(2, 1, Bytes::from_static(b"yz")).encode().unwrap();
        let mut buf = first.to_vec();
        buf.extend_from_slice(&second);

        let (_, _, _, consumed) = frame_layout(&buf, 0);
        let (command, sequence, body, _) = frame_layout(&buf, consumed);
        assert_eq!((command, sequence), (2, 1));
        assert_eq!(body, b"yz");
    }

    #[test]
    fn test_body_too_large() {
        let body = vec![0u8; MAX_BODY_SIZE + 1];
        let result = encode_parts(1, 0, &body);
        assert!(matches!(result, Err(ProtocolError::BodyTooLarge { .. })));
    }
}
