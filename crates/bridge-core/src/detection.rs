//! Detection event processing.
//!
//! Maps what the AI voice agent perceived on the line onto call state
//! transitions, IVR navigation bookkeeping and outbound notifications.
//! The detection vocabulary is a closed union so a new kind forces every
//! match site to be updated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use rxdial_call_core::ivr::NavigationOutcome;
use rxdial_call_core::notify::{events, search_scope, NotificationSink};
use rxdial_call_core::types::{CallId, CallState, SearchId};
use rxdial_call_core::{CallStateMachine, IvrNavigationTracker, TransitionOptions};

use crate::error::BridgeError;

/// Detections are ignored below this confidence, except `IvrFailed` which
/// always gets through: a failure report must never be dropped for being
/// tentative.
pub const MIN_DETECTION_CONFIDENCE: f64 = 0.7;

/// What the AI perceived on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    HumanDetected,
    VoicemailDetected,
    IvrFailed,
    HoldMusic,
    HoldMessage,
    HangUp,
    IvrPrompt,
}

/// A structured signal describing what the AI voice agent perceived.
/// Processed once, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub call_id: CallId,
    pub search_id: SearchId,
    pub kind: DetectionKind,
    pub confidence: f64,
    pub transcript: Option<String>,
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DetectionEvent {
    pub fn new(call_id: CallId, search_id: SearchId, kind: DetectionKind, confidence: f64) -> Self {
        Self {
            call_id,
            search_id,
            kind,
            confidence,
            transcript: None,
            context: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Applies detection events to the call state machine and navigation
/// tracker, publishing user-facing notifications along the way.
pub struct DetectionEventProcessor {
    state_machine: Arc<CallStateMachine>,
    tracker: Arc<IvrNavigationTracker>,
    notifier: Arc<dyn NotificationSink>,
    humans_detected: AtomicU64,
}

impl DetectionEventProcessor {
    pub fn new(
        state_machine: Arc<CallStateMachine>,
        tracker: Arc<IvrNavigationTracker>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            state_machine,
            tracker,
            notifier,
            humans_detected: AtomicU64::new(0),
        }
    }

    /// Total human detections processed since startup.
    pub fn humans_detected(&self) -> u64 {
        self.humans_detected.load(Ordering::Relaxed)
    }

    /// Process one detection event.
    ///
    /// Low-confidence events are dropped (except `IvrFailed`). Illegal
    /// transitions are rejected by the state table, logged and swallowed;
    /// they never abort processing.
    pub async fn process(&self, event: DetectionEvent) -> Result<(), BridgeError> {
        if event.confidence < MIN_DETECTION_CONFIDENCE && event.kind != DetectionKind::IvrFailed {
            debug!(
                "Dropping {:?} for call {} at confidence {:.2}",
                event.kind, event.call_id, event.confidence
            );
            return Ok(());
        }

        match event.kind {
            DetectionKind::HumanDetected => self.on_human_detected(&event).await,
            DetectionKind::VoicemailDetected => self.on_voicemail(&event).await,
            DetectionKind::IvrFailed => self.on_ivr_failed(&event).await,
            DetectionKind::HoldMusic | DetectionKind::HoldMessage => self.on_hold(&event).await,
            DetectionKind::HangUp => self.on_hang_up(&event).await,
            DetectionKind::IvrPrompt => {
                self.tracker.record_attempt(&event.call_id, None);
                Ok(())
            }
        }
    }

    async fn on_human_detected(&self, event: &DetectionEvent) -> Result<(), BridgeError> {
        let record = self
            .state_machine
            .get_call(&event.call_id)
            .await
            .ok_or_else(|| BridgeError::UnknownCall(event.call_id.clone()))?;

        self.tracker
            .mark_success(&event.call_id, NavigationOutcome::HumanDetected);
        self.try_transition(&event.call_id, CallState::HumanDetected, "human detected")
            .await;

        self.notifier
            .publish(
                &search_scope(&event.search_id),
                events::PHARMACIST_READY,
                json!({
                    "call_id": event.call_id,
                    "pharmacy_name": record.pharmacy_name,
                    "confidence": event.confidence,
                }),
            )
            .await;

        self.humans_detected.fetch_add(1, Ordering::Relaxed);
        info!(
            "Human detected on call {} at {}",
            event.call_id, record.pharmacy_name
        );
        Ok(())
    }

    async fn on_voicemail(&self, event: &DetectionEvent) -> Result<(), BridgeError> {
        let pharmacy_name = self
            .state_machine
            .get_call(&event.call_id)
            .await
            .map(|r| r.pharmacy_name)
            .unwrap_or_default();

        self.tracker
            .mark_success(&event.call_id, NavigationOutcome::Voicemail);
        self.try_transition(&event.call_id, CallState::Voicemail, "voicemail detected")
            .await;

        self.notifier
            .publish(
                &search_scope(&event.search_id),
                events::VOICEMAIL_READY,
                json!({
                    "call_id": event.call_id,
                    "pharmacy_name": pharmacy_name,
                }),
            )
            .await;
        Ok(())
    }

    async fn on_ivr_failed(&self, event: &DetectionEvent) -> Result<(), BridgeError> {
        self.tracker
            .record_attempt(&event.call_id, event.context.clone());
        if self.tracker.should_retry(&event.call_id) {
            // Attempts remain; navigation continues without a transition.
            debug!("Call {} IVR retry recorded", event.call_id);
            return Ok(());
        }

        let message = self
            .tracker
            .mark_failed(&event.call_id)
            .unwrap_or_else(|| "Could not navigate the pharmacy's phone system".to_string());
        self.try_transition(&event.call_id, CallState::IvrFailed, "navigation exhausted")
            .await;

        self.notifier
            .publish(
                &search_scope(&event.search_id),
                events::IVR_FAILED,
                json!({
                    "call_id": event.call_id,
                    "message": message,
                    "suggestion": "Trying the next pharmacy on your list.",
                }),
            )
            .await;

        self.tracker.cleanup(&event.call_id);
        Ok(())
    }

    async fn on_hold(&self, event: &DetectionEvent) -> Result<(), BridgeError> {
        // Hold signals only matter while the menu is still being navigated.
        if self.state_machine.state_of(&event.call_id).await != Some(CallState::Ivr) {
            debug!("Ignoring hold signal for call {} (not in IVR)", event.call_id);
            return Ok(());
        }

        self.tracker
            .mark_success(&event.call_id, NavigationOutcome::OnHold);
        self.try_transition(&event.call_id, CallState::Hold, "placed on hold")
            .await;

        self.notifier
            .publish(
                &search_scope(&event.search_id),
                events::CALL_STATUS_UPDATE,
                json!({
                    "call_id": event.call_id,
                    "status": "on_hold",
                }),
            )
            .await;
        Ok(())
    }

    async fn on_hang_up(&self, event: &DetectionEvent) -> Result<(), BridgeError> {
        self.try_transition(&event.call_id, CallState::Ended, "remote hang up")
            .await;
        self.tracker.cleanup(&event.call_id);
        Ok(())
    }

    /// Attempt a transition, swallowing table rejections. The table stays
    /// the single authority on legality; a rejected detection-driven
    /// transition is logged and dropped.
    async fn try_transition(&self, call_id: &CallId, to: CallState, reason: &str) {
        let opts = TransitionOptions {
            reason: Some(reason.to_string()),
            metadata: None,
        };
        if let Err(e) = self.state_machine.transition(call_id, to, opts).await {
            warn!("Detection transition skipped: {}", e);
        }
    }
}
