//! Per-call state machine with table-validated transitions, transition
//! history and broadcast event fan-out.
//!
//! The machine is the single writer for call records. All mutation goes
//! through [`CallStateMachine::transition`], which holds the store's write
//! lock for the whole read-validate-write so concurrent transition attempts
//! on the same call are serialized within this process. Listeners observe
//! changes through the typed [`CallEvent`] broadcast channel rather than by
//! registering callbacks on the machine itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::CallCoreError;
use crate::state_table::CALL_STATE_TABLE;
use crate::types::{CallId, CallRecord, CallState, PharmacyId, SearchId, TransitionRecord};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Parameters for creating a new call record.
#[derive(Debug, Clone)]
pub struct CreateCallParams {
    pub search_id: SearchId,
    pub pharmacy_id: PharmacyId,
    pub pharmacy_name: String,
    pub phone_number: String,
    pub metadata: HashMap<String, String>,
}

/// Optional context attached to a transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionOptions {
    pub reason: Option<String>,
    /// Metadata entries merged into the record on success.
    pub metadata: Option<HashMap<String, String>>,
}

/// Events published by the state machine.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Emitted on every successful transition.
    StateChanged {
        call_id: CallId,
        search_id: SearchId,
        from: CallState,
        to: CallState,
    },
    /// Emitted in addition to `StateChanged` when a human is reached.
    HumanDetected {
        call_id: CallId,
        search_id: SearchId,
        pharmacy_name: String,
    },
    /// Emitted when a call reaches a terminal state.
    CallEnded {
        call_id: CallId,
        search_id: SearchId,
        final_state: CallState,
    },
    /// Emitted when a call enters `Failed` or `IvrFailed`.
    CallFailed {
        call_id: CallId,
        search_id: SearchId,
        state: CallState,
    },
}

struct StoreInner {
    calls: HashMap<CallId, CallRecord>,
    history: HashMap<CallId, Vec<TransitionRecord>>,
    by_search: HashMap<SearchId, Vec<CallId>>,
}

/// Owns all call records and enforces the transition graph.
pub struct CallStateMachine {
    inner: Arc<RwLock<StoreInner>>,
    events: broadcast::Sender<CallEvent>,
}

impl CallStateMachine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                calls: HashMap::new(),
                history: HashMap::new(),
                by_search: HashMap::new(),
            })),
            events,
        }
    }

    /// Subscribe to the call event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Create a new call record in `Created` state.
    ///
    /// Appends a self-transition history entry so a call's history always
    /// starts with its creation.
    pub async fn create(&self, params: CreateCallParams) -> Result<CallRecord, CallCoreError> {
        let now = Utc::now();
        let call_id = CallId::new();
        let record = CallRecord {
            call_id: call_id.clone(),
            search_id: params.search_id.clone(),
            pharmacy_id: params.pharmacy_id,
            pharmacy_name: params.pharmacy_name,
            phone_number: params.phone_number,
            state: CallState::Created,
            previous_state: None,
            external_session_id: None,
            bridge_session_name: None,
            state_changed_at: now,
            created_at: now,
            metadata: params.metadata,
        };

        let mut inner = self.inner.write().await;
        if inner.calls.contains_key(&call_id) {
            return Err(CallCoreError::DuplicateCall(call_id));
        }
        inner.calls.insert(call_id.clone(), record.clone());
        inner.history.insert(
            call_id.clone(),
            vec![TransitionRecord {
                from: CallState::Created,
                to: CallState::Created,
                at: now,
                reason: Some("created".to_string()),
            }],
        );
        inner
            .by_search
            .entry(params.search_id)
            .or_default()
            .push(call_id.clone());

        info!("Created call {} to {}", record.call_id, record.pharmacy_name);
        Ok(record)
    }

    /// Transition a call to `to`, validating against the state table.
    ///
    /// Rejections leave the record untouched; the failed attempt is logged
    /// and reported to the caller, never surfaced to the user.
    pub async fn transition(
        &self,
        call_id: &CallId,
        to: CallState,
        opts: TransitionOptions,
    ) -> Result<CallRecord, CallCoreError> {
        let (record, from) = {
            let mut inner = self.inner.write().await;
            let record = inner
                .calls
                .get_mut(call_id)
                .ok_or_else(|| CallCoreError::CallNotFound(call_id.clone()))?;

            let from = record.state;
            if !CALL_STATE_TABLE.is_allowed(from, to) {
                warn!("Rejected transition {} -> {} for call {}", from, to, call_id);
                return Err(CallCoreError::InvalidTransition {
                    call_id: call_id.clone(),
                    from,
                    to,
                });
            }

            let now = Utc::now();
            record.previous_state = Some(from);
            record.state = to;
            record.state_changed_at = now;
            if let Some(extra) = opts.metadata {
                record.metadata.extend(extra);
            }
            let snapshot = record.clone();

            inner.history.entry(call_id.clone()).or_default().push(TransitionRecord {
                from,
                to,
                at: now,
                reason: opts.reason,
            });

            (snapshot, from)
        };

        debug!("Call {} transitioned {} -> {}", call_id, from, to);
        self.emit_transition_events(&record, from, to);
        Ok(record)
    }

    fn emit_transition_events(&self, record: &CallRecord, from: CallState, to: CallState) {
        let _ = self.events.send(CallEvent::StateChanged {
            call_id: record.call_id.clone(),
            search_id: record.search_id.clone(),
            from,
            to,
        });

        if to == CallState::HumanDetected {
            let _ = self.events.send(CallEvent::HumanDetected {
                call_id: record.call_id.clone(),
                search_id: record.search_id.clone(),
                pharmacy_name: record.pharmacy_name.clone(),
            });
        }

        if to.is_terminal() {
            let _ = self.events.send(CallEvent::CallEnded {
                call_id: record.call_id.clone(),
                search_id: record.search_id.clone(),
                final_state: to,
            });
        }

        if to.is_failure() {
            let _ = self.events.send(CallEvent::CallFailed {
                call_id: record.call_id.clone(),
                search_id: record.search_id.clone(),
                state: to,
            });
        }
    }

    /// Assign the telephony provider's call identifier. One-shot: a second
    /// assignment is an error and leaves the record unchanged.
    pub async fn set_external_session(
        &self,
        call_id: &CallId,
        external_session_id: impl Into<String>,
    ) -> Result<(), CallCoreError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .calls
            .get_mut(call_id)
            .ok_or_else(|| CallCoreError::CallNotFound(call_id.clone()))?;
        if record.external_session_id.is_some() {
            return Err(CallCoreError::ExternalSessionAlreadySet(call_id.clone()));
        }
        record.external_session_id = Some(external_session_id.into());
        Ok(())
    }

    /// Record the audio bridge session name for a call.
    pub async fn set_bridge_session(
        &self,
        call_id: &CallId,
        bridge_session_name: impl Into<String>,
    ) -> Result<(), CallCoreError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .calls
            .get_mut(call_id)
            .ok_or_else(|| CallCoreError::CallNotFound(call_id.clone()))?;
        record.bridge_session_name = Some(bridge_session_name.into());
        Ok(())
    }

    /// Get a snapshot of a call record.
    pub async fn get_call(&self, call_id: &CallId) -> Option<CallRecord> {
        self.inner.read().await.calls.get(call_id).cloned()
    }

    /// Get a call's current state.
    pub async fn state_of(&self, call_id: &CallId) -> Option<CallState> {
        self.inner.read().await.calls.get(call_id).map(|r| r.state)
    }

    /// Get a call's full transition history, oldest first.
    pub async fn transition_history(&self, call_id: &CallId) -> Vec<TransitionRecord> {
        self.inner
            .read()
            .await
            .history
            .get(call_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All call records belonging to a search, in creation order.
    pub async fn calls_for_search(&self, search_id: &SearchId) -> Vec<CallRecord> {
        let inner = self.inner.read().await;
        inner
            .by_search
            .get(search_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.calls.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Census of calls per state.
    pub async fn stats(&self) -> HashMap<CallState, usize> {
        let inner = self.inner.read().await;
        let mut stats = HashMap::new();
        for record in inner.calls.values() {
            *stats.entry(record.state).or_insert(0) += 1;
        }
        stats
    }

    /// Remove ended records older than `retention`. Returns how many were
    /// purged. Active cleanup path - records never rely on passive expiry.
    pub async fn purge_concluded(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let mut inner = self.inner.write().await;

        let stale: Vec<CallId> = inner
            .calls
            .values()
            .filter(|r| r.state.is_terminal() && r.state_changed_at < cutoff)
            .map(|r| r.call_id.clone())
            .collect();

        for call_id in &stale {
            if let Some(record) = inner.calls.remove(call_id) {
                inner.history.remove(call_id);
                if let Some(ids) = inner.by_search.get_mut(&record.search_id) {
                    ids.retain(|id| id != call_id);
                }
            }
        }

        if !stale.is_empty() {
            info!("Purged {} concluded call records", stale.len());
        }
        stale.len()
    }
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
