use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> Self {
        Self(format!("call-{}", uuid::Uuid::new_v4()))
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Search ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SearchId(pub String);

impl SearchId {
    pub fn new() -> Self {
        Self(format!("search-{}", uuid::Uuid::new_v4()))
    }
}

impl std::fmt::Display for SearchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SearchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pharmacy ID type - carries the discovery collaborator's identifier
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct PharmacyId(pub String);

impl std::fmt::Display for PharmacyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PharmacyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// States a pharmacy call moves through, from creation to conclusion.
///
/// `Ended` is terminal: no transition leaves it. The allowed transition
/// graph lives in [`crate::state_table`].
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Record exists, nothing dialed yet
    Created,
    /// Outbound dial issued to the telephony provider
    Dialing,
    /// Navigating the pharmacy's automated phone menu
    Ivr,
    /// Menu navigation exhausted its retries
    IvrFailed,
    /// Parked on hold, waiting for a person
    Hold,
    /// A live person answered
    HumanDetected,
    /// The line went to voicemail
    Voicemail,
    /// Dial or call-level failure
    Failed,
    /// Patient audio is being joined into the call
    Bridging,
    /// Patient and pharmacist are connected
    Connected,
    /// Graceful teardown in progress
    Ending,
    /// Call concluded - terminal
    Ended,
}

impl CallState {
    /// Terminal states accept no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }

    /// States where a person (or voicemail box) can be joined by the patient.
    pub fn is_human_ready(&self) -> bool {
        matches!(
            self,
            CallState::HumanDetected | CallState::Bridging | CallState::Connected
        )
    }

    /// States that count as a failure outcome.
    pub fn is_failure(&self) -> bool {
        matches!(self, CallState::Failed | CallState::IvrFailed)
    }

    /// States where the call is no longer progressing toward a human.
    pub fn is_concluded(&self) -> bool {
        matches!(
            self,
            CallState::Ended | CallState::Ending | CallState::Failed | CallState::IvrFailed
        )
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallState::Created => "created",
            CallState::Dialing => "dialing",
            CallState::Ivr => "ivr",
            CallState::IvrFailed => "ivr_failed",
            CallState::Hold => "hold",
            CallState::HumanDetected => "human_detected",
            CallState::Voicemail => "voicemail",
            CallState::Failed => "failed",
            CallState::Bridging => "bridging",
            CallState::Connected => "connected",
            CallState::Ending => "ending",
            CallState::Ended => "ended",
        };
        write!(f, "{}", s)
    }
}

/// A candidate pharmacy as returned by the discovery collaborator.
///
/// `phone` is `None` for candidates the discovery layer could not enrich
/// with a number; those are tracked but never dialed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pharmacy {
    pub id: PharmacyId,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Durable per-call record owned by the [`crate::CallStateMachine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: CallId,
    pub search_id: SearchId,
    pub pharmacy_id: PharmacyId,
    pub pharmacy_name: String,
    pub phone_number: String,
    pub state: CallState,
    pub previous_state: Option<CallState>,
    /// Telephony provider's call identifier. Assigned once, immutable after.
    pub external_session_id: Option<String>,
    /// Name of the audio bridge session, if one was established.
    pub bridge_session_name: Option<String>,
    pub state_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// One entry in a call's transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: CallState,
    pub to: CallState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_human_ready_classification() {
        assert!(CallState::Ended.is_terminal());
        assert!(!CallState::Ending.is_terminal());
        assert!(!CallState::Failed.is_terminal());

        assert!(CallState::HumanDetected.is_human_ready());
        assert!(CallState::Bridging.is_human_ready());
        assert!(CallState::Connected.is_human_ready());
        assert!(!CallState::Hold.is_human_ready());
        assert!(!CallState::Voicemail.is_human_ready());
    }

    #[test]
    fn id_display_round_trip() {
        let id = CallId::new();
        assert!(id.to_string().starts_with("call-"));
        let sid = SearchId::new();
        assert!(sid.to_string().starts_with("search-"));
    }
}
