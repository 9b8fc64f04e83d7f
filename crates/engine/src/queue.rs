//! Human-ready call queue.
//!
//! Holds calls where a live person (or voicemail box) is waiting, ordered
//! by when they became ready, and owns the polite-termination policy used
//! when a call is retired: thank the pharmacist, give the message a grace
//! window to play, then force-complete. Provider failures on these cleanup
//! paths are logged and swallowed - one call's cleanup must never
//! compromise the rest of the search.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use rxdial_call_core::types::{CallId, CallRecord, CallState, PharmacyId, SearchId};
use rxdial_call_core::{CallStateMachine, TransitionOptions};

use crate::error::EngineError;
use crate::providers::TelephonyProvider;

const THANK_YOU_MESSAGE: &str =
    "Thank you for your time. The patient no longer needs this call. Goodbye.";

/// One call waiting for the patient to pick it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub call_id: CallId,
    pub search_id: SearchId,
    pub pharmacy_id: PharmacyId,
    pub pharmacy_name: String,
    pub external_session_id: String,
    pub queued_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// The single call a patient joined for a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedCallInfo {
    pub call_id: CallId,
    pub external_session_id: String,
    pub pharmacy_name: String,
    pub connected_at: DateTime<Utc>,
}

/// Time-ordered queue of human-ready calls.
pub struct HumanReadyQueue {
    /// Entries in queued order; push order matches queued_at order.
    entries: RwLock<Vec<QueueEntry>>,
    connected: RwLock<HashMap<SearchId, ConnectedCallInfo>>,
    state_machine: Arc<CallStateMachine>,
    telephony: Arc<dyn TelephonyProvider>,
    polite_grace: Duration,
}

impl HumanReadyQueue {
    pub fn new(
        state_machine: Arc<CallStateMachine>,
        telephony: Arc<dyn TelephonyProvider>,
        polite_grace: Duration,
    ) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            connected: RwLock::new(HashMap::new()),
            state_machine,
            telephony,
            polite_grace,
        }
    }

    /// Enqueue a human-ready call. The call must already have its external
    /// session assigned - the queue needs it to terminate the call later.
    pub async fn enqueue(&self, record: &CallRecord) -> Result<(), EngineError> {
        let external_session_id = record
            .external_session_id
            .clone()
            .ok_or_else(|| EngineError::MissingExternalSession(record.call_id.clone()))?;

        let entry = QueueEntry {
            call_id: record.call_id.clone(),
            search_id: record.search_id.clone(),
            pharmacy_id: record.pharmacy_id.clone(),
            pharmacy_name: record.pharmacy_name.clone(),
            external_session_id,
            queued_at: Utc::now(),
            notified_at: None,
            acknowledged_at: None,
        };

        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.call_id == entry.call_id) {
            debug!("Call {} already queued", entry.call_id);
            return Ok(());
        }
        info!("Queued human-ready call {} ({})", entry.call_id, entry.pharmacy_name);
        entries.push(entry);
        Ok(())
    }

    /// Earliest queued entry (FIFO).
    pub async fn next_in_queue(&self) -> Option<QueueEntry> {
        self.entries.read().await.first().cloned()
    }

    /// All entries for a search, in queued order.
    pub async fn entries_for_search(&self, search_id: &SearchId) -> Vec<QueueEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| &e.search_id == search_id)
            .cloned()
            .collect()
    }

    /// Stamp the entry as notified.
    pub async fn mark_notified(&self, call_id: &CallId) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| &e.call_id == call_id) {
            entry.notified_at = Some(Utc::now());
        }
    }

    /// Stamp the entry as acknowledged by the patient.
    pub async fn mark_acknowledged(&self, call_id: &CallId) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| &e.call_id == call_id) {
            entry.acknowledged_at = Some(Utc::now());
        }
    }

    /// Record the single call the patient joined and drop it from the
    /// queue.
    pub async fn set_connected_call(&self, search_id: &SearchId, info: ConnectedCallInfo) {
        self.entries
            .write()
            .await
            .retain(|e| e.call_id != info.call_id);
        self.connected
            .write()
            .await
            .insert(search_id.clone(), info);
    }

    pub async fn connected_call(&self, search_id: &SearchId) -> Option<ConnectedCallInfo> {
        self.connected.read().await.get(search_id).cloned()
    }

    /// End a call politely: play a short thank-you, then force-complete
    /// after a grace window. Any provider error falls back to an immediate
    /// forced hangup. Failures are logged, never propagated.
    pub async fn end_call_politely(&self, call_id: &CallId, external_session_id: &str) {
        match self
            .telephony
            .play_message(external_session_id, THANK_YOU_MESSAGE)
            .await
        {
            Ok(()) => {
                let telephony = self.telephony.clone();
                let session = external_session_id.to_string();
                let grace = self.polite_grace;
                let call = call_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Err(e) = telephony.complete_call(&session).await {
                        warn!("Grace-window hangup failed for call {}: {}", call, e);
                    }
                });
            }
            Err(e) => {
                warn!(
                    "Polite termination failed for call {}: {}; forcing hangup",
                    call_id, e
                );
                if let Err(e) = self.telephony.complete_call(external_session_id).await {
                    warn!("Forced hangup also failed for call {}: {}", call_id, e);
                }
            }
        }

        self.remove_entry(call_id).await;
        let opts = TransitionOptions {
            reason: Some("polite termination".to_string()),
            metadata: None,
        };
        if let Err(e) = self
            .state_machine
            .transition(call_id, CallState::Ending, opts)
            .await
        {
            warn!("Transition to Ending skipped for call {}: {}", call_id, e);
        }
    }

    /// Retire the search's other human-ready calls once the patient joined
    /// one. The joined call and anything already concluded are skipped;
    /// calls still on hold are left untouched as a warm fallback; calls in
    /// `HumanDetected` or `Bridging` are ended politely.
    pub async fn end_other_calls_on_join(&self, search_id: &SearchId, joined_call_id: &CallId) {
        let calls = self.state_machine.calls_for_search(search_id).await;
        for record in calls {
            if &record.call_id == joined_call_id {
                continue;
            }
            match record.state {
                CallState::HumanDetected | CallState::Bridging => {
                    match &record.external_session_id {
                        Some(session) => {
                            info!(
                                "Retiring call {} ({}) after patient joined {}",
                                record.call_id, record.pharmacy_name, joined_call_id
                            );
                            self.end_call_politely(&record.call_id, session).await;
                        }
                        None => warn!(
                            "Cannot retire call {} without an external session",
                            record.call_id
                        ),
                    }
                }
                CallState::Hold => {
                    debug!("Leaving call {} on hold as a warm fallback", record.call_id);
                }
                _ => {}
            }
        }
    }

    /// Force-conclude every active call in the search: politely where a
    /// human is on the line, hard hangup otherwise. Clears the search's
    /// queue entries.
    pub async fn end_all_calls(&self, search_id: &SearchId) {
        let calls = self.state_machine.calls_for_search(search_id).await;
        for record in calls {
            if record.state.is_terminal() {
                continue;
            }

            if let Some(session) = &record.external_session_id {
                if record.state.is_human_ready() {
                    if let Err(e) = self.telephony.play_message(session, THANK_YOU_MESSAGE).await {
                        warn!("Thank-you message failed for call {}: {}", record.call_id, e);
                    }
                }
                if let Err(e) = self.telephony.complete_call(session).await {
                    warn!("Hangup failed for call {}: {}", record.call_id, e);
                }
            }

            self.force_conclude(&record.call_id).await;
        }

        self.entries
            .write()
            .await
            .retain(|e| &e.search_id != search_id);
        info!("Ended all calls for search {}", search_id);
    }

    /// Drop a single queue entry.
    pub async fn remove_entry(&self, call_id: &CallId) {
        self.entries.write().await.retain(|e| &e.call_id != call_id);
    }

    /// Drive a call to `Ended`, routing through `Failed` where the table
    /// has no direct edge (a call still in the menu, for instance).
    async fn force_conclude(&self, call_id: &CallId) {
        let opts = || TransitionOptions {
            reason: Some("search teardown".to_string()),
            metadata: None,
        };
        if self
            .state_machine
            .transition(call_id, CallState::Ended, opts())
            .await
            .is_ok()
        {
            return;
        }
        if self
            .state_machine
            .transition(call_id, CallState::Failed, opts())
            .await
            .is_ok()
        {
            let _ = self
                .state_machine
                .transition(call_id, CallState::Ended, opts())
                .await;
            return;
        }
        warn!("Could not force-conclude call {}", call_id);
    }
}
