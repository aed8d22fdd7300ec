//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or reply parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("sync marker lost: no 0x1234 found in {buffered} buffered bytes")]
    SyncLost { buffered: usize },

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("invalid BCD input: {0}")]
    InvalidBcd(String),

    #[error("truncated reply for command {command}: need {needed} bytes, got {actual}")]
    Truncated {
        command: u16,
        needed: usize,
        actual: usize,
    },

    #[error("unknown command id: {0}")]
    UnknownCommand(u16),
}

impl ProtocolError {
    /// Returns whether the receive buffer must be discarded after this error.
    pub fn is_framing(&self) -> bool {
        matches!(self, ProtocolError::SyncLost { .. })
    }
}
