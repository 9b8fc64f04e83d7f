//! Provider status-callback mapping.
//!
//! Telephony status callbacks are delivered at-least-once and may arrive
//! out of order. The mapping below translates the provider's vocabulary
//! into call states; the transition table then rejects anything stale or
//! duplicated, which is what makes webhook ingestion idempotent.

use rxdial_call_core::types::CallState;

/// Map a provider status string onto a call state.
///
/// Unknown statuses map to `None` and are ignored by the caller.
pub fn map_provider_status(status: &str) -> Option<CallState> {
    match status.to_ascii_lowercase().as_str() {
        "ringing" | "dialing" => Some(CallState::Dialing),
        "completed" => Some(CallState::Ended),
        "busy" | "no-answer" | "canceled" | "failed" => Some(CallState::Failed),
        _ => None,
    }
}
