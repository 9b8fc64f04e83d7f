//! Channel- and vec-backed fakes for the engine's collaborator traits.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use rxdial_call_core::notify::NotificationSink;
use rxdial_call_core::types::Pharmacy;
use rxdial_engine::{
    DialRequest, DialResponse, DiscoveryPage, DiscoveryQuery, OutcomeStore, PharmacyDirectory,
    ProviderError, SearchOutcome, TelephonyProvider,
};

#[derive(Default)]
pub struct MockTelephony {
    pub dials: Mutex<Vec<DialRequest>>,
    pub played: Mutex<Vec<(String, String)>>,
    pub completed: Mutex<Vec<String>>,
    pub redirected: Mutex<Vec<(String, String)>>,
    pub fail_dial_numbers: Mutex<HashSet<String>>,
    pub fail_play: AtomicBool,
    counter: AtomicU32,
}

impl MockTelephony {
    pub fn fail_dials_to(&self, number: &str) {
        self.fail_dial_numbers.lock().unwrap().insert(number.to_string());
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    pub fn played_sessions(&self) -> Vec<String> {
        self.played.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn completed_sessions(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelephonyProvider for MockTelephony {
    async fn dial(&self, request: DialRequest) -> Result<DialResponse, ProviderError> {
        let to = request.to.clone();
        self.dials.lock().unwrap().push(request);
        if self.fail_dial_numbers.lock().unwrap().contains(&to) {
            return Err(ProviderError::Dial(format!("carrier rejected {}", to)));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(DialResponse {
            external_call_id: format!("PA-{}", n),
            status: "queued".to_string(),
        })
    }

    async fn play_message(
        &self,
        external_call_id: &str,
        message: &str,
    ) -> Result<(), ProviderError> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(ProviderError::Update("media unavailable".to_string()));
        }
        self.played
            .lock()
            .unwrap()
            .push((external_call_id.to_string(), message.to_string()));
        Ok(())
    }

    async fn redirect(
        &self,
        external_call_id: &str,
        target_url: &str,
    ) -> Result<(), ProviderError> {
        self.redirected
            .lock()
            .unwrap()
            .push((external_call_id.to_string(), target_url.to_string()));
        Ok(())
    }

    async fn complete_call(&self, external_call_id: &str) -> Result<(), ProviderError> {
        self.completed.lock().unwrap().push(external_call_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDirectory {
    pages: Mutex<VecDeque<DiscoveryPage>>,
    pub fetches: AtomicU32,
}

impl MockDirectory {
    pub fn with_pages(pages: Vec<DiscoveryPage>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PharmacyDirectory for MockDirectory {
    async fn fetch_page(
        &self,
        _query: &DiscoveryQuery,
        _page: u32,
    ) -> Result<DiscoveryPage, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DiscoveryPage {
                pharmacies: Vec::new(),
                has_more: false,
            }))
    }
}

#[derive(Default)]
pub struct MockOutcomeStore {
    pub outcomes: Mutex<Vec<SearchOutcome>>,
}

impl MockOutcomeStore {
    pub fn persisted(&self) -> Vec<SearchOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutcomeStore for MockOutcomeStore {
    async fn persist_outcome(&self, outcome: &SearchOutcome) -> Result<(), ProviderError> {
        self.outcomes.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<(String, String, Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t, _)| t.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, scope: &str, event_type: &str, payload: Value) {
        self.published
            .lock()
            .unwrap()
            .push((scope.to_string(), event_type.to_string(), payload));
    }
}

pub fn pharmacy(id: &str, name: &str, phone: Option<&str>) -> Pharmacy {
    Pharmacy {
        id: id.into(),
        name: name.to_string(),
        phone: phone.map(|p| p.to_string()),
        address: Some(format!("{} Main St", id)),
    }
}
