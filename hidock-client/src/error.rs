//! Client error types.

use crate::config::ConfigError;
use hidock_protocol::CommandId;
use thiserror::Error;

/// Client errors.
///
/// Device-reported outcomes such as `busy` or `card-full` are not errors;
/// they arrive as typed reply values. Timeouts and unsupported operations
/// resolve to `Ok(None)`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] hidock_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("command {0} expired before it was sent")]
    Expired(CommandId),

    #[error("a streaming transfer is already running ({0})")]
    StreamingBusy(CommandId),

    #[error("unexpected reply to {0}")]
    UnexpectedReply(CommandId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no supported device found")]
    DeviceNotFound,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::ConnectionClosed
                | ClientError::Expired(_)
                | ClientError::StreamingBusy(_)
        )
    }
}
