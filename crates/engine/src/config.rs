//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the search engine and its background tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Caller ID presented on outbound dials.
    pub caller_id: String,
    /// Webhook the telephony provider connects its media stream to.
    pub signaling_webhook_url: String,
    /// Webhook the telephony provider posts call status updates to.
    pub status_webhook_url: String,
    /// Ask the provider for answering-machine detection on dials.
    pub answering_machine_detection: bool,

    /// How many calls per search may be live at once. Sequential dialing
    /// (1) keeps "first human wins" trivially consistent and caps spend.
    pub max_concurrent_dials: usize,
    /// Fetch another discovery page once the reserve pool shrinks below
    /// this many candidates.
    pub reserve_low_water: usize,
    /// Upper bound on discovery pages fetched per search.
    pub max_discovery_fetches: u32,

    /// How long a notified patient has to respond before the search is
    /// torn down.
    #[serde(with = "duration_secs")]
    pub ack_deadline: Duration,
    /// How often the acknowledgment sweep runs.
    #[serde(with = "duration_secs")]
    pub ack_sweep_interval: Duration,
    /// Grace window between the polite thank-you message and the forced
    /// hangup.
    #[serde(with = "duration_secs")]
    pub polite_grace: Duration,
    /// How long concluded call records are retained before purging.
    #[serde(with = "duration_secs")]
    pub call_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            caller_id: "+15550100000".to_string(),
            signaling_webhook_url: "wss://localhost/media".to_string(),
            status_webhook_url: "https://localhost/status".to_string(),
            answering_machine_detection: true,
            max_concurrent_dials: 1,
            reserve_low_water: 3,
            max_discovery_fetches: 5,
            ack_deadline: Duration::from_secs(60),
            ack_sweep_interval: Duration::from_secs(5),
            polite_grace: Duration::from_secs(10),
            call_retention: Duration::from_secs(3600),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
