//! Patient acknowledgment deadlines.
//!
//! When a patient is told a pharmacist is waiting, they get a bounded
//! window to respond. A periodic sweep enforces the deadline: an expired
//! entry tears down every call in its search - an unacknowledged ready
//! call is treated as patient abandonment. Enforcement latency is bounded
//! by the sweep interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rxdial_call_core::notify::{events, search_scope, NotificationSink};
use rxdial_call_core::types::{CallId, SearchId};

use crate::config::EngineConfig;
use crate::queue::HumanReadyQueue;

/// Deadline and sweep cadence.
#[derive(Debug, Clone)]
pub struct AckTimeoutConfig {
    pub deadline: Duration,
    pub sweep_interval: Duration,
}

impl Default for AckTimeoutConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl From<&EngineConfig> for AckTimeoutConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            deadline: config.ack_deadline,
            sweep_interval: config.ack_sweep_interval,
        }
    }
}

/// One outstanding deadline. At most one active entry exists per
/// notified-but-unacknowledged call - the map key enforces it.
#[derive(Debug, Clone)]
pub struct TimeoutEntry {
    pub search_id: SearchId,
    pub call_id: CallId,
    pub pharmacy_name: String,
    pub notified_at: DateTime<Utc>,
    pub expires_at: Instant,
}

/// Background deadline bookkeeping and sweep.
pub struct AckTimeoutMonitor {
    config: AckTimeoutConfig,
    entries: DashMap<(SearchId, CallId), TimeoutEntry>,
    queue: Arc<HumanReadyQueue>,
    notifier: Arc<dyn NotificationSink>,
}

impl AckTimeoutMonitor {
    pub fn new(
        config: AckTimeoutConfig,
        queue: Arc<HumanReadyQueue>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            queue,
            notifier,
        }
    }

    /// Start the deadline clock for a notified call.
    pub fn start_timeout(&self, search_id: &SearchId, call_id: &CallId, pharmacy_name: &str) {
        let entry = TimeoutEntry {
            search_id: search_id.clone(),
            call_id: call_id.clone(),
            pharmacy_name: pharmacy_name.to_string(),
            notified_at: Utc::now(),
            expires_at: Instant::now() + self.config.deadline,
        };
        debug!(
            "Acknowledgment deadline armed for call {} ({:?})",
            call_id, self.config.deadline
        );
        self.entries
            .insert((search_id.clone(), call_id.clone()), entry);
    }

    /// The patient responded; the deadline is disarmed. Returns whether an
    /// entry existed.
    pub fn acknowledge(&self, search_id: &SearchId, call_id: &CallId) -> bool {
        self.entries
            .remove(&(search_id.clone(), call_id.clone()))
            .is_some()
    }

    /// Push the deadline out by `extra`. No-op for absent entries.
    pub fn extend_timeout(&self, search_id: &SearchId, call_id: &CallId, extra: Duration) -> bool {
        match self
            .entries
            .get_mut(&(search_id.clone(), call_id.clone()))
        {
            Some(mut entry) => {
                entry.expires_at += extra;
                true
            }
            None => false,
        }
    }

    /// Whether the entry's deadline has passed. Absent entries are inert.
    pub fn is_expired(&self, search_id: &SearchId, call_id: &CallId) -> bool {
        self.entries
            .get(&(search_id.clone(), call_id.clone()))
            .map(|entry| entry.expires_at <= Instant::now())
            .unwrap_or(false)
    }

    /// Time left before the deadline, if an entry exists.
    pub fn remaining_time(&self, search_id: &SearchId, call_id: &CallId) -> Option<Duration> {
        self.entries
            .get(&(search_id.clone(), call_id.clone()))
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Drop every entry for a search.
    pub fn clear_search(&self, search_id: &SearchId) {
        self.entries.retain(|(sid, _), _| sid != search_id);
    }

    /// Drop all entries.
    pub fn clear_all_timeouts(&self) {
        self.entries.clear();
    }

    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    /// One sweep pass: tear down every search whose deadline elapsed.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<TimeoutEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.clone())
            .collect();

        for entry in expired {
            // Remove first so a slow teardown can't be processed twice.
            if self
                .entries
                .remove(&(entry.search_id.clone(), entry.call_id.clone()))
                .is_none()
            {
                continue;
            }

            warn!(
                "Patient did not acknowledge call {} ({}) in time; ending search {}",
                entry.call_id, entry.pharmacy_name, entry.search_id
            );

            self.notifier
                .publish(
                    &search_scope(&entry.search_id),
                    events::ACK_TIMEOUT,
                    json!({
                        "call_id": entry.call_id,
                        "pharmacy_name": entry.pharmacy_name,
                        "notified_at": entry.notified_at,
                    }),
                )
                .await;

            self.queue.end_all_calls(&entry.search_id).await;
        }
    }

    /// Spawn the periodic sweeper. Runs until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let interval = monitor.config.sweep_interval;
        info!("Acknowledgment sweeper running every {:?}", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                monitor.sweep().await;
            }
        })
    }
}
