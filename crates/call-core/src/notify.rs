//! Notification fan-out seam.
//!
//! The core publishes digestible user-facing events through this trait and
//! is indifferent to how (or whether) they are delivered. Delivery
//! transports live outside this workspace.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::SearchId;

/// Event types published by the core.
pub mod events {
    pub const PHARMACIST_READY: &str = "pharmacist_ready";
    pub const VOICEMAIL_READY: &str = "voicemail_ready";
    pub const CALL_STATUS_UPDATE: &str = "call_status_update";
    pub const IVR_FAILED: &str = "ivr_failed";
    pub const SEARCH_UPDATE: &str = "search_update";
    pub const ACK_TIMEOUT: &str = "ack_timeout";
}

/// Scope string for events addressed to a search's subscribers.
pub fn search_scope(search_id: &SearchId) -> String {
    format!("search:{}", search_id)
}

/// Abstract notification sink.
///
/// Implementations must not block the caller on delivery and must swallow
/// their own transport errors; the core never retries a publish.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, scope: &str, event_type: &str, payload: Value);
}

/// Sink that drops everything. Useful for tests and headless runs.
pub struct NullNotificationSink;

#[async_trait]
impl NotificationSink for NullNotificationSink {
    async fn publish(&self, _scope: &str, _event_type: &str, _payload: Value) {}
}
