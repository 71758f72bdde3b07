use std::time::Duration;

use thiserror::Error;
use webrtc_relay_protocol::SessionId;

/// Failure of a call into the media server.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("media server unreachable at {uri}: {reason}")]
    Connect { uri: String, reason: String },
    #[error("media server call `{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("media server rejected `{operation}` ({code}): {message}")]
    Rejected {
        operation: String,
        code: i64,
        message: String,
    },
    #[error("media server connection closed")]
    Disconnected,
    #[error("unexpected media server response: {0}")]
    Protocol(String),
}

/// Reason a signaling request could not be honored.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("session {0} is already started")]
    AlreadyStarted(SessionId),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("websocket path `{0}` must be a single non-empty path segment")]
    InvalidPath(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}
