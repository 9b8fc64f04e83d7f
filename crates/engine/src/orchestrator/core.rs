//! The search orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rxdial_call_core::notify::{events, search_scope, NotificationSink};
use rxdial_call_core::types::{CallId, CallRecord, CallState, Pharmacy, SearchId};
use rxdial_call_core::{
    CallEvent, CallStateMachine, CreateCallParams, IvrNavigationTracker, TransitionOptions,
};

use crate::ack_timeout::AckTimeoutMonitor;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::providers::{
    DialRequest, DiscoveryQuery, OutcomeStore, PharmacyDirectory, SearchOutcome, TelephonyProvider,
};
use crate::queue::{ConnectedCallInfo, HumanReadyQueue};
use crate::telephony::map_provider_status;

use super::types::{
    CallProgress, CandidateDialState, SearchResult, SearchState, SearchStatus, SearchSummary,
    TrackedCandidate,
};

fn opts(reason: &str) -> TransitionOptions {
    TransitionOptions {
        reason: Some(reason.to_string()),
        metadata: None,
    }
}

/// Composes the per-call machinery into search-level behavior.
pub struct SearchOrchestrator {
    config: EngineConfig,
    state_machine: Arc<CallStateMachine>,
    tracker: Arc<IvrNavigationTracker>,
    queue: Arc<HumanReadyQueue>,
    ack: Arc<AckTimeoutMonitor>,
    telephony: Arc<dyn TelephonyProvider>,
    directory: Arc<dyn PharmacyDirectory>,
    outcomes: Arc<dyn OutcomeStore>,
    notifier: Arc<dyn NotificationSink>,
    searches: RwLock<HashMap<SearchId, SearchState>>,
}

impl SearchOrchestrator {
    pub fn new(
        config: EngineConfig,
        state_machine: Arc<CallStateMachine>,
        tracker: Arc<IvrNavigationTracker>,
        queue: Arc<HumanReadyQueue>,
        ack: Arc<AckTimeoutMonitor>,
        telephony: Arc<dyn TelephonyProvider>,
        directory: Arc<dyn PharmacyDirectory>,
        outcomes: Arc<dyn OutcomeStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            state_machine,
            tracker,
            queue,
            ack,
            telephony,
            directory,
            outcomes,
            notifier,
            searches: RwLock::new(HashMap::new()),
        }
    }

    pub fn state_machine(&self) -> &Arc<CallStateMachine> {
        &self.state_machine
    }

    pub fn queue(&self) -> &Arc<HumanReadyQueue> {
        &self.queue
    }

    /// Begin a search: track the initial candidates, dial up to the
    /// concurrency cap, and hold the rest as reserves.
    pub async fn start_search(
        &self,
        user_id: &str,
        medication_query: &str,
        location_hint: &str,
        pharmacies: Vec<Pharmacy>,
    ) -> Result<SearchId, EngineError> {
        let mut search = SearchState::new(user_id, medication_query, location_hint);
        let search_id = search.search_id.clone();

        let cap = self.config.max_concurrent_dials.max(1);
        let mut callable = Vec::new();
        for pharmacy in pharmacies {
            if pharmacy.phone.is_some() {
                callable.push(pharmacy);
            } else {
                // Surfaced to the patient but never dialed.
                search.tracked.push(TrackedCandidate::new(pharmacy));
            }
        }
        for (i, pharmacy) in callable.into_iter().enumerate() {
            if i < cap {
                search.tracked.push(TrackedCandidate::new(pharmacy));
            } else {
                search.reserves.push(pharmacy);
            }
        }

        info!(
            "Starting search {} for \"{}\" with {} tracked / {} reserve candidates",
            search_id,
            medication_query,
            search.tracked.len(),
            search.reserves.len()
        );

        search.status = SearchStatus::Calling;
        let started = {
            let mut searches = self.searches.write().await;
            let search = searches.entry(search_id.clone()).or_insert(search);

            let mut started = 0usize;
            while started < cap {
                match self.start_next_call_locked(search).await {
                    Ok(true) => started += 1,
                    Ok(false) => break,
                    Err(e) => {
                        warn!("Initial dial error for search {}: {}", search_id, e);
                        break;
                    }
                }
            }
            if started > 0 {
                search.status = SearchStatus::Active;
            }
            self.publish_search_update(search).await;
            started
        };

        if started == 0 {
            self.mark_not_found(&search_id).await?;
        }
        Ok(search_id)
    }

    /// Dial the next candidate: the next pending tracked pharmacy, a
    /// promoted reserve, or - after a bounded discovery fetch - a freshly
    /// discovered one. Returns whether a new call was started.
    pub async fn start_next_call(&self, search_id: &SearchId) -> Result<bool, EngineError> {
        let mut searches = self.searches.write().await;
        let search = searches
            .get_mut(search_id)
            .ok_or_else(|| EngineError::SearchNotFound(search_id.clone()))?;
        self.start_next_call_locked(search).await
    }

    async fn start_next_call_locked(&self, search: &mut SearchState) -> Result<bool, EngineError> {
        if search.is_settled() {
            return Ok(false);
        }

        let live = self.live_call_count(&search.search_id).await;
        if live >= self.config.max_concurrent_dials {
            debug!(
                "Search {} already has {} live call(s); not dialing",
                search.search_id, live
            );
            return Ok(false);
        }

        loop {
            let idx = match self.select_candidate(search) {
                Some(idx) => idx,
                None => {
                    if !self.replenish_reserves(search).await {
                        info!("No more pharmacies available for search {}", search.search_id);
                        return Ok(false);
                    }
                    match self.select_candidate(search) {
                        Some(idx) => idx,
                        None => return Ok(false),
                    }
                }
            };

            match self.dial_candidate(search, idx).await {
                Ok(()) => return Ok(true),
                Err(e) => {
                    // One candidate's dial failure never aborts the search.
                    warn!("Dial failed, escalating to next candidate: {}", e);
                    continue;
                }
            }
        }
    }

    /// Next pending tracked candidate, promoting a reserve if none remain.
    fn select_candidate(&self, search: &mut SearchState) -> Option<usize> {
        if let Some(idx) = search
            .tracked
            .iter()
            .position(|c| c.dial_state == CandidateDialState::Pending)
        {
            return Some(idx);
        }
        if !search.reserves.is_empty() {
            let pharmacy = search.reserves.remove(0);
            debug!("Promoting reserve {} for search {}", pharmacy.name, search.search_id);
            search.tracked.push(TrackedCandidate::new(pharmacy));
            return Some(search.tracked.len() - 1);
        }
        None
    }

    /// Refill the reserve pool from discovery once it drops below the
    /// low-water mark. Every returned candidate is tracked - phoneless
    /// ones as non-callable - and phone-bearing ones join the callable
    /// pool. Fetch errors degrade to "no more pharmacies available".
    /// Returns whether any callable candidate is available afterwards.
    async fn replenish_reserves(&self, search: &mut SearchState) -> bool {
        if search.reserves.len() < self.config.reserve_low_water {
            if search.discovery_fetches >= self.config.max_discovery_fetches {
                debug!(
                    "Search {} reached its discovery fetch bound ({})",
                    search.search_id, self.config.max_discovery_fetches
                );
            } else {
                let query = DiscoveryQuery {
                    medication_query: search.medication_query.clone(),
                    near: search.location_hint.clone(),
                };
                match self.directory.fetch_page(&query, search.next_discovery_page).await {
                    Ok(page) => {
                        search.discovery_fetches += 1;
                        search.next_discovery_page += 1;
                        let mut added = 0usize;
                        for pharmacy in page.pharmacies {
                            if self.already_known(search, &pharmacy) {
                                continue;
                            }
                            if pharmacy.phone.is_some() {
                                search.reserves.push(pharmacy);
                                added += 1;
                            } else {
                                search.tracked.push(TrackedCandidate::new(pharmacy));
                            }
                        }
                        info!(
                            "Discovery page {} added {} callable candidate(s) to search {}",
                            search.next_discovery_page - 1,
                            added,
                            search.search_id
                        );
                    }
                    Err(e) => {
                        warn!("Discovery fetch failed for search {}: {}", search.search_id, e);
                    }
                }
            }
        }

        !search.reserves.is_empty()
            || search
                .tracked
                .iter()
                .any(|c| c.dial_state == CandidateDialState::Pending)
    }

    fn already_known(&self, search: &SearchState, pharmacy: &Pharmacy) -> bool {
        search.tracked.iter().any(|c| c.pharmacy.id == pharmacy.id)
            || search.reserves.iter().any(|p| p.id == pharmacy.id)
    }

    async fn dial_candidate(&self, search: &mut SearchState, idx: usize) -> Result<(), EngineError> {
        let pharmacy = search.tracked[idx].pharmacy.clone();
        let phone = match pharmacy.phone.clone() {
            Some(phone) => phone,
            None => {
                search.tracked[idx].dial_state = CandidateDialState::NotCallable;
                return Err(EngineError::Config(format!(
                    "candidate {} has no phone number",
                    pharmacy.name
                )));
            }
        };

        // Taken out of the pending pool up front so a failure here can
        // never loop back to the same candidate.
        search.tracked[idx].dial_state = CandidateDialState::Calling;

        let record = match self
            .state_machine
            .create(CreateCallParams {
                search_id: search.search_id.clone(),
                pharmacy_id: pharmacy.id.clone(),
                pharmacy_name: pharmacy.name.clone(),
                phone_number: phone.clone(),
                metadata: HashMap::new(),
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                search.tracked[idx].dial_state = CandidateDialState::Concluded;
                return Err(e.into());
            }
        };

        search.tracked[idx].call_id = Some(record.call_id.clone());
        search.initiated_call_ids.push(record.call_id.clone());

        self.state_machine
            .transition(&record.call_id, CallState::Dialing, opts("dialing"))
            .await?;

        let request = DialRequest {
            to: phone,
            caller_id: self.config.caller_id.clone(),
            signaling_webhook_url: self.config.signaling_webhook_url.clone(),
            status_webhook_url: self.config.status_webhook_url.clone(),
            answering_machine_detection: self.config.answering_machine_detection,
        };

        match self.telephony.dial(request).await {
            Ok(response) => {
                self.state_machine
                    .set_external_session(&record.call_id, response.external_call_id)
                    .await?;
                self.tracker.init_navigation(&record.call_id, &pharmacy.name);
                info!("Dialing {} for search {}", pharmacy.name, search.search_id);
                Ok(())
            }
            Err(e) => {
                let _ = self
                    .state_machine
                    .transition(&record.call_id, CallState::Failed, opts("dial failed"))
                    .await;
                let _ = self
                    .state_machine
                    .transition(&record.call_id, CallState::Ended, opts("dial failed"))
                    .await;
                search.tracked[idx].dial_state = CandidateDialState::Concluded;
                Err(EngineError::Provider(e))
            }
        }
    }

    /// Calls still progressing toward (or waiting on) a human.
    async fn live_call_count(&self, search_id: &SearchId) -> usize {
        self.state_machine
            .calls_for_search(search_id)
            .await
            .iter()
            .filter(|r| !r.state.is_concluded())
            .count()
    }

    /// Proactively surface reserves and refill from discovery. Returns
    /// whether any callable candidate is available.
    pub async fn check_and_fetch_more(&self, search_id: &SearchId) -> Result<bool, EngineError> {
        let mut searches = self.searches.write().await;
        let search = searches
            .get_mut(search_id)
            .ok_or_else(|| EngineError::SearchNotFound(search_id.clone()))?;
        Ok(self.replenish_reserves(search).await)
    }

    /// Record the winning pharmacy.
    pub async fn mark_found(
        &self,
        search_id: &SearchId,
        pharmacy_name: &str,
    ) -> Result<(), EngineError> {
        self.settle(search_id, SearchResult::Found, Some(pharmacy_name.to_string()))
            .await
    }

    /// Conclude the search without a winner.
    pub async fn mark_not_found(&self, search_id: &SearchId) -> Result<(), EngineError> {
        self.settle(search_id, SearchResult::NotFound, None).await
    }

    /// Cancel the search and tear down its active calls. Best-effort and
    /// non-blocking: teardown failures are logged, never propagated.
    pub async fn cancel_search(&self, search_id: &SearchId) -> Result<(), EngineError> {
        self.settle(search_id, SearchResult::Cancelled, None).await?;

        let calls = self.state_machine.calls_for_search(search_id).await;
        for record in calls {
            if record.state.is_concluded() {
                continue;
            }
            if let Some(session) = &record.external_session_id {
                if let Err(e) = self.telephony.complete_call(session).await {
                    warn!("Hangup failed while cancelling call {}: {}", record.call_id, e);
                }
            }
            let _ = self
                .state_machine
                .transition(&record.call_id, CallState::Ending, opts("search cancelled"))
                .await;
            self.tracker.cleanup(&record.call_id);
            self.queue.remove_entry(&record.call_id).await;
        }
        Ok(())
    }

    /// Set the terminal result. The result is write-once; a second settle
    /// attempt fails and changes nothing.
    async fn settle(
        &self,
        search_id: &SearchId,
        result: SearchResult,
        found_at: Option<String>,
    ) -> Result<(), EngineError> {
        let (outcome, snapshot) = {
            let mut searches = self.searches.write().await;
            let search = searches
                .get_mut(search_id)
                .ok_or_else(|| EngineError::SearchNotFound(search_id.clone()))?;

            if search.result.is_some() {
                warn!(
                    "Ignoring {:?} for search {}: result already set",
                    result, search_id
                );
                return Err(EngineError::ResultAlreadySet(search_id.clone()));
            }

            let completed_at = Utc::now();
            search.result = Some(result);
            search.status = if result == SearchResult::Cancelled {
                SearchStatus::Cancelled
            } else {
                SearchStatus::Completed
            };
            search.completed_at = Some(completed_at);
            search.found_at_pharmacy_name = found_at.clone();

            let outcome = SearchOutcome {
                search_id: search.search_id.clone(),
                user_id: search.user_id.clone(),
                medication_query: search.medication_query.clone(),
                result,
                found_at_pharmacy_name: found_at,
                total_calls: search.initiated_call_ids.len(),
                started_at: search.started_at,
                completed_at,
            };
            (outcome, search.clone())
        };

        info!("Search {} settled: {:?}", search_id, result);
        self.publish_search_update(&snapshot).await;
        if let Err(e) = self.outcomes.persist_outcome(&outcome).await {
            // A persistence hiccup must not unwind an already-settled search.
            warn!("Failed to persist outcome for search {}: {}", search_id, e);
        }
        self.ack.clear_search(search_id);
        Ok(())
    }

    async fn publish_search_update(&self, search: &SearchState) {
        self.notifier
            .publish(
                &search_scope(&search.search_id),
                events::SEARCH_UPDATE,
                json!({
                    "search_id": search.search_id,
                    "status": search.status,
                    "result": search.result,
                    "found_at_pharmacy_name": search.found_at_pharmacy_name,
                    "calls_initiated": search.initiated_call_ids.len(),
                }),
            )
            .await;
    }

    /// Per-call progress rows for clients.
    pub async fn call_progress(&self, search_id: &SearchId) -> Result<Vec<CallProgress>, EngineError> {
        if !self.searches.read().await.contains_key(search_id) {
            return Err(EngineError::SearchNotFound(search_id.clone()));
        }
        Ok(self
            .state_machine
            .calls_for_search(search_id)
            .await
            .into_iter()
            .map(|r| CallProgress {
                call_id: r.call_id,
                pharmacy_name: r.pharmacy_name,
                state: r.state,
                is_human_ready: r.state.is_human_ready(),
                state_changed_at: r.state_changed_at,
            })
            .collect())
    }

    /// Earliest human-ready call by when it became ready.
    pub async fn next_human_ready_call(&self, search_id: &SearchId) -> Option<CallRecord> {
        self.state_machine
            .calls_for_search(search_id)
            .await
            .into_iter()
            .filter(|r| r.state.is_human_ready())
            .min_by_key(|r| r.state_changed_at)
    }

    /// Aggregate view of a search.
    pub async fn search_summary(&self, search_id: &SearchId) -> Result<SearchSummary, EngineError> {
        let searches = self.searches.read().await;
        let search = searches
            .get(search_id)
            .ok_or_else(|| EngineError::SearchNotFound(search_id.clone()))?;
        Ok(SearchSummary {
            search_id: search.search_id.clone(),
            status: search.status,
            result: search.result,
            found_at_pharmacy_name: search.found_at_pharmacy_name.clone(),
            tracked_pharmacies: search.tracked.len(),
            reserve_pharmacies: search.reserves.len(),
            calls_initiated: search.initiated_call_ids.len(),
            started_at: search.started_at,
            completed_at: search.completed_at,
        })
    }

    /// Snapshot of the raw search state.
    pub async fn get_search(&self, search_id: &SearchId) -> Option<SearchState> {
        self.searches.read().await.get(search_id).cloned()
    }

    /// Ingest an asynchronous provider status callback. Duplicated or
    /// out-of-order deliveries are absorbed by table validation.
    pub async fn handle_provider_status(&self, call_id: &CallId, status: &str) {
        let Some(state) = map_provider_status(status) else {
            debug!("Ignoring provider status \"{}\" for call {}", status, call_id);
            return;
        };
        let Some(record) = self.state_machine.get_call(call_id).await else {
            warn!("Provider status \"{}\" for unknown call {}", status, call_id);
            return;
        };

        match self
            .state_machine
            .transition(call_id, state, opts(&format!("provider status: {}", status)))
            .await
        {
            Ok(_) => {
                if state == CallState::Failed {
                    // Failed is one hop from terminal; conclude it now.
                    let _ = self
                        .state_machine
                        .transition(call_id, CallState::Ended, opts("failure cleanup"))
                        .await;
                }
            }
            Err(e) => {
                debug!("Stale provider status \"{}\" for call {}: {}", status, call_id, e);
                return;
            }
        }

        if matches!(state, CallState::Failed | CallState::Ended) {
            self.conclude_call(&record.search_id, call_id).await;
        }
    }

    /// The call's media stream connected: menu navigation begins.
    pub async fn handle_bridge_established(&self, call_id: &CallId, bridge_session_name: &str) {
        if let Err(e) = self
            .state_machine
            .set_bridge_session(call_id, bridge_session_name)
            .await
        {
            warn!("Could not record bridge session for call {}: {}", call_id, e);
        }
        if let Err(e) = self
            .state_machine
            .transition(call_id, CallState::Ivr, opts("media connected"))
            .await
        {
            debug!("Bridge-established transition skipped for call {}: {}", call_id, e);
        }
    }

    /// A call reached a human: queue it for the patient and arm the
    /// acknowledgment deadline.
    pub async fn handle_human_ready(&self, call_id: &CallId) -> Result<(), EngineError> {
        let record = self
            .state_machine
            .get_call(call_id)
            .await
            .ok_or_else(|| EngineError::CallNotFound(call_id.clone()))?;

        self.queue.enqueue(&record).await?;
        self.queue.mark_notified(call_id).await;
        self.ack
            .start_timeout(&record.search_id, call_id, &record.pharmacy_name);
        Ok(())
    }

    /// The patient joins a human-ready call: connect it, retire the
    /// search's other human-ready calls, and settle the result.
    pub async fn patient_join(
        &self,
        search_id: &SearchId,
        call_id: &CallId,
    ) -> Result<(), EngineError> {
        let record = self
            .state_machine
            .get_call(call_id)
            .await
            .ok_or_else(|| EngineError::CallNotFound(call_id.clone()))?;
        if !record.state.is_human_ready() {
            return Err(EngineError::NotHumanReady(call_id.clone()));
        }
        let session = record
            .external_session_id
            .clone()
            .ok_or_else(|| EngineError::MissingExternalSession(call_id.clone()))?;

        self.ack.acknowledge(search_id, call_id);
        self.queue.mark_acknowledged(call_id).await;

        match record.state {
            CallState::HumanDetected => {
                self.state_machine
                    .transition(call_id, CallState::Bridging, opts("patient joining"))
                    .await?;
                self.state_machine
                    .transition(call_id, CallState::Connected, opts("patient joined"))
                    .await?;
            }
            CallState::Bridging => {
                self.state_machine
                    .transition(call_id, CallState::Connected, opts("patient joined"))
                    .await?;
            }
            CallState::Connected => {}
            _ => return Err(EngineError::NotHumanReady(call_id.clone())),
        }

        self.queue
            .set_connected_call(
                search_id,
                ConnectedCallInfo {
                    call_id: call_id.clone(),
                    external_session_id: session,
                    pharmacy_name: record.pharmacy_name.clone(),
                    connected_at: Utc::now(),
                },
            )
            .await;
        self.queue.end_other_calls_on_join(search_id, call_id).await;

        info!(
            "Patient joined call {} at {} for search {}",
            call_id, record.pharmacy_name, search_id
        );
        self.mark_found(search_id, &record.pharmacy_name).await
    }

    /// Mark a candidate concluded and escalate to the next one.
    async fn conclude_call(&self, search_id: &SearchId, call_id: &CallId) {
        self.tracker.cleanup(call_id);
        self.queue.remove_entry(call_id).await;

        {
            let mut searches = self.searches.write().await;
            if let Some(search) = searches.get_mut(search_id) {
                if let Some(candidate) = search
                    .tracked
                    .iter_mut()
                    .find(|c| c.call_id.as_ref() == Some(call_id))
                {
                    candidate.dial_state = CandidateDialState::Concluded;
                }
            }
        }

        match self.start_next_call(search_id).await {
            Ok(true) => debug!("Escalated search {} to its next candidate", search_id),
            Ok(false) => {
                // Nothing left to dial. If nothing is live or waiting for
                // the patient either, the search is over.
                let live = self.live_call_count(search_id).await;
                if live == 0 {
                    if let Err(e) = self.mark_not_found(search_id).await {
                        debug!("Search {} already settled: {}", search_id, e);
                    }
                }
            }
            Err(e) => debug!("Escalation skipped for search {}: {}", search_id, e),
        }
    }

    /// Pump state-machine events into orchestration actions. Runs until
    /// the state machine is dropped or the handle is aborted.
    pub fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        // Subscribe before spawning so no event published between this
        // call and the task's first poll is lost.
        let mut events = orchestrator.state_machine.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CallEvent::HumanDetected { call_id, .. }) => {
                        if let Err(e) = orchestrator.handle_human_ready(&call_id).await {
                            warn!("Could not queue human-ready call {}: {}", call_id, e);
                        }
                    }
                    Ok(CallEvent::CallFailed { call_id, .. }) => {
                        // Conclude the failed call; escalation follows on
                        // its CallEnded event.
                        let _ = orchestrator
                            .state_machine
                            .transition(&call_id, CallState::Ended, opts("failure cleanup"))
                            .await;
                    }
                    Ok(CallEvent::CallEnded { call_id, search_id, .. }) => {
                        orchestrator.conclude_call(&search_id, &call_id).await;
                    }
                    Ok(CallEvent::StateChanged { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Orchestrator event pump lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Periodically purge concluded call records past their retention
    /// window.
    pub fn spawn_retention_task(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                orchestrator
                    .state_machine
                    .purge_concluded(orchestrator.config.call_retention)
                    .await;
            }
        })
    }
}
