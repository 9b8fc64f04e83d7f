use thiserror::Error;

use crate::types::{CallId, CallState};

/// Errors raised by the call core.
#[derive(Debug, Error)]
pub enum CallCoreError {
    #[error("Call {0} not found")]
    CallNotFound(CallId),

    #[error("Call {0} already exists")]
    DuplicateCall(CallId),

    #[error("Illegal transition {from} -> {to} for call {call_id}")]
    InvalidTransition {
        call_id: CallId,
        from: CallState,
        to: CallState,
    },

    #[error("External session already assigned for call {0}")]
    ExternalSessionAlreadySet(CallId),
}
