use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rxdial_call_core::types::{CallId, CallState, Pharmacy, SearchId};

/// Lifecycle of one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Pending,
    Calling,
    Active,
    Completed,
    Cancelled,
}

/// Terminal search result. Set at most once, then immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchResult {
    Found,
    NotFound,
    Cancelled,
}

/// Where a tracked candidate stands in the dial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateDialState {
    /// Callable, not dialed yet.
    Pending,
    /// A call is in flight.
    Calling,
    /// Its call concluded.
    Concluded,
    /// Discovery returned no phone number; shown but never dialed.
    NotCallable,
}

/// A candidate pharmacy the search knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedCandidate {
    pub pharmacy: Pharmacy,
    pub dial_state: CandidateDialState,
    pub call_id: Option<CallId>,
}

impl TrackedCandidate {
    pub fn new(pharmacy: Pharmacy) -> Self {
        let dial_state = if pharmacy.phone.is_some() {
            CandidateDialState::Pending
        } else {
            CandidateDialState::NotCallable
        };
        Self {
            pharmacy,
            dial_state,
            call_id: None,
        }
    }
}

/// Mutable per-search state owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct SearchState {
    pub search_id: SearchId,
    pub user_id: String,
    pub medication_query: String,
    /// Free-form location hint forwarded to discovery fetches.
    pub location_hint: String,
    /// Candidates the search has surfaced, callable or not.
    pub tracked: Vec<TrackedCandidate>,
    /// Discovered, phone-bearing candidates held back as fallback.
    pub reserves: Vec<Pharmacy>,
    pub initiated_call_ids: Vec<CallId>,
    pub status: SearchStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<SearchResult>,
    pub found_at_pharmacy_name: Option<String>,
    /// Discovery pages fetched so far; bounded to cap cost.
    pub discovery_fetches: u32,
    pub next_discovery_page: u32,
}

impl SearchState {
    pub fn new(
        user_id: impl Into<String>,
        medication_query: impl Into<String>,
        location_hint: impl Into<String>,
    ) -> Self {
        Self {
            search_id: SearchId::new(),
            user_id: user_id.into(),
            medication_query: medication_query.into(),
            location_hint: location_hint.into(),
            tracked: Vec::new(),
            reserves: Vec::new(),
            initiated_call_ids: Vec::new(),
            status: SearchStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            found_at_pharmacy_name: None,
            discovery_fetches: 0,
            next_discovery_page: 1,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.result.is_some()
            || matches!(self.status, SearchStatus::Completed | SearchStatus::Cancelled)
    }
}

/// Per-call progress row derived for clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallProgress {
    pub call_id: CallId,
    pub pharmacy_name: String,
    pub state: CallState,
    pub is_human_ready: bool,
    pub state_changed_at: DateTime<Utc>,
}

/// Aggregate view of a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSummary {
    pub search_id: SearchId,
    pub status: SearchStatus,
    pub result: Option<SearchResult>,
    pub found_at_pharmacy_name: Option<String>,
    pub tracked_pharmacies: usize,
    pub reserve_pharmacies: usize,
    pub calls_initiated: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
