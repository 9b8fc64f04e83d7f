use thiserror::Error;

use rxdial_call_core::types::CallId;

/// Errors raised by the audio bridge and detection processing.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("AI session configuration failed: {0}")]
    Configuration(String),

    #[error("Bridge handshake failed: {0}")]
    Handshake(String),

    #[error("Bridge handshake timed out")]
    HandshakeTimeout,

    #[error("Failed to send audio frame: {0}")]
    LegSend(String),

    #[error("No call record for {0}")]
    UnknownCall(CallId),
}
