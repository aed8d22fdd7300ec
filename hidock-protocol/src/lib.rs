//! # hidock-protocol
//!
//! Wire protocol implementation for HiDock USB recorders.
//!
//! This crate provides:
//! - Binary framing with sync marker, command id and sequence number
//! - A reassembling decoder that tolerates fragmented USB transfers
//! - Packed-decimal (BCD) time encoding
//! - Command identifiers and typed reply parsers

pub mod bcd;
pub mod codec;
pub mod command;
pub mod error;
pub mod files;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use command::CommandId;
pub use error::ProtocolError;
pub use files::{FileRecord, RecordingMode};
pub use frame::{Frame, FRAME_HEADER_SIZE, SYNC};

/// Maximum frame body size (the length word carries 24 bits).
pub const MAX_BODY_SIZE: usize = 0x00FF_FFFF;

/// USB vendor id shared by all supported recorders.
pub const VENDOR_ID: u16 = 0x10D6;
