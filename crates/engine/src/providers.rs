//! Collaborator traits for the capabilities the engine consumes as black
//! boxes: the telephony carrier, pharmacy discovery and outcome
//! persistence. Notification delivery lives in
//! [`rxdial_call_core::notify`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rxdial_call_core::types::{Pharmacy, SearchId};

/// Errors surfaced by external collaborators.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Dial failed: {0}")]
    Dial(String),

    #[error("Call update failed: {0}")]
    Update(String),

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

/// Parameters for an outbound dial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialRequest {
    pub to: String,
    pub caller_id: String,
    /// Where the provider connects the call's bidirectional media stream.
    pub signaling_webhook_url: String,
    /// Where the provider posts asynchronous status callbacks.
    pub status_webhook_url: String,
    pub answering_machine_detection: bool,
}

/// Provider response to a dial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialResponse {
    pub external_call_id: String,
    pub status: String,
}

/// The telephony carrier.
///
/// Status callbacks arrive asynchronously on the configured webhook and
/// must be fed through [`crate::telephony::map_provider_status`]; delivery
/// is neither exactly-once nor in-order.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    async fn dial(&self, request: DialRequest) -> Result<DialResponse, ProviderError>;

    /// Speak a short message into the call.
    async fn play_message(&self, external_call_id: &str, message: &str)
        -> Result<(), ProviderError>;

    /// Redirect the call's media to a different handler.
    async fn redirect(&self, external_call_id: &str, target_url: &str)
        -> Result<(), ProviderError>;

    /// Force-conclude the call.
    async fn complete_call(&self, external_call_id: &str) -> Result<(), ProviderError>;
}

/// Query context for discovery fetches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    pub medication_query: String,
    /// Free-form location hint; geocoding happens inside the collaborator.
    pub near: String,
}

/// One page of discovered candidates.
#[derive(Debug, Clone)]
pub struct DiscoveryPage {
    pub pharmacies: Vec<Pharmacy>,
    pub has_more: bool,
}

/// The pharmacy discovery collaborator.
#[async_trait]
pub trait PharmacyDirectory: Send + Sync {
    async fn fetch_page(
        &self,
        query: &DiscoveryQuery,
        page: u32,
    ) -> Result<DiscoveryPage, ProviderError>;
}

/// Finalized search record handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub search_id: SearchId,
    pub user_id: String,
    pub medication_query: String,
    pub result: crate::orchestrator::SearchResult,
    pub found_at_pharmacy_name: Option<String>,
    pub total_calls: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Durable store for finalized search results. The core only ever
/// persists the final outcome.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn persist_outcome(&self, outcome: &SearchOutcome) -> Result<(), ProviderError>;
}
