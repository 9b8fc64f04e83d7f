//! Per-call IVR navigation retry and timeout bookkeeping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::types::CallId;

/// Retries are abandoned after this many attempts.
pub const MAX_NAVIGATION_ATTEMPTS: u32 = 3;

/// Retries are abandoned once this much time has passed since the last
/// attempt.
pub const NAVIGATION_RETRY_WINDOW: Duration = Duration::from_secs(60);

/// Where a call's menu navigation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvrNavigationStatus {
    Navigating,
    OnHold,
    HumanDetected,
    Voicemail,
    Failed,
}

/// Successful navigation outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    HumanDetected,
    Voicemail,
    OnHold,
}

/// Ephemeral navigation state for one call. Never persisted.
#[derive(Debug, Clone)]
pub struct IvrNavigationState {
    pub call_id: CallId,
    pub pharmacy_name: String,
    pub attempts: u32,
    pub last_attempt: Instant,
    pub errors: Vec<String>,
    pub status: IvrNavigationStatus,
}

/// Tracks navigation state for all in-flight calls.
///
/// Lock scope is a handful of map operations, so a synchronous lock is
/// fine even on the async paths that call into it.
pub struct IvrNavigationTracker {
    states: RwLock<HashMap<CallId, IvrNavigationState>>,
}

impl IvrNavigationTracker {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Begin tracking navigation for a call.
    pub fn init_navigation(&self, call_id: &CallId, pharmacy_name: &str) {
        let state = IvrNavigationState {
            call_id: call_id.clone(),
            pharmacy_name: pharmacy_name.to_string(),
            attempts: 0,
            last_attempt: Instant::now(),
            errors: Vec::new(),
            status: IvrNavigationStatus::Navigating,
        };
        self.states.write().insert(call_id.clone(), state);
        debug!("Tracking IVR navigation for call {} ({})", call_id, pharmacy_name);
    }

    /// Record a navigation attempt, optionally with an error description.
    pub fn record_attempt(&self, call_id: &CallId, error: Option<String>) {
        let mut states = self.states.write();
        if let Some(state) = states.get_mut(call_id) {
            state.attempts += 1;
            state.last_attempt = Instant::now();
            if let Some(err) = error {
                state.errors.push(err);
            }
            debug!("Call {} navigation attempt {}", call_id, state.attempts);
        } else {
            warn!("record_attempt for untracked call {}", call_id);
        }
    }

    /// Whether navigation should be retried: still navigating, under the
    /// attempt cap, and within the retry window. A missing record never
    /// retries.
    pub fn should_retry(&self, call_id: &CallId) -> bool {
        let states = self.states.read();
        match states.get(call_id) {
            Some(state) => {
                state.status == IvrNavigationStatus::Navigating
                    && state.attempts < MAX_NAVIGATION_ATTEMPTS
                    && state.last_attempt.elapsed() < NAVIGATION_RETRY_WINDOW
            }
            None => false,
        }
    }

    /// Mark navigation as failed and compose the user-facing message.
    /// Returns `None` if the call was never tracked.
    pub fn mark_failed(&self, call_id: &CallId) -> Option<String> {
        let mut states = self.states.write();
        let state = states.get_mut(call_id)?;
        state.status = IvrNavigationStatus::Failed;

        let mut message = format!(
            "Could not navigate {}'s phone system after {} attempt{}",
            state.pharmacy_name,
            state.attempts,
            if state.attempts == 1 { "" } else { "s" }
        );
        if !state.errors.is_empty() {
            message.push_str(&format!(" ({})", state.errors.join("; ")));
        }

        info!("Call {} navigation failed: {}", call_id, message);
        Some(message)
    }

    /// Mark navigation as having reached a person, voicemail, or hold.
    pub fn mark_success(&self, call_id: &CallId, outcome: NavigationOutcome) {
        let mut states = self.states.write();
        if let Some(state) = states.get_mut(call_id) {
            state.status = match outcome {
                NavigationOutcome::HumanDetected => IvrNavigationStatus::HumanDetected,
                NavigationOutcome::Voicemail => IvrNavigationStatus::Voicemail,
                NavigationOutcome::OnHold => IvrNavigationStatus::OnHold,
            };
            debug!("Call {} navigation outcome: {:?}", call_id, state.status);
        }
    }

    /// Discard a call's navigation record. Called at call conclusion so the
    /// tracker never grows for the process lifetime.
    pub fn cleanup(&self, call_id: &CallId) {
        if self.states.write().remove(call_id).is_some() {
            debug!("Discarded navigation state for call {}", call_id);
        }
    }

    /// Snapshot of a call's navigation state.
    pub fn snapshot(&self, call_id: &CallId) -> Option<IvrNavigationState> {
        self.states.read().get(call_id).cloned()
    }

    pub fn tracked_count(&self) -> usize {
        self.states.read().len()
    }
}

impl Default for IvrNavigationTracker {
    fn default() -> Self {
        Self::new()
    }
}
