//! # RxDial Engine
//!
//! Search-level orchestration for automated medication finding.
//!
//! The [`SearchOrchestrator`] composes the call-core state machine, the IVR
//! navigation tracker and the audio-bridge detection pipeline into a full
//! search lifecycle: it dials candidate pharmacies one at a time (the cap is
//! configurable), escalates to the next candidate as attempts conclude
//! without reaching a human, replenishes its reserve pool from the discovery
//! collaborator, queues human-ready calls for the patient through the
//! [`HumanReadyQueue`], and enforces the patient-acknowledgment deadline
//! with the [`AckTimeoutMonitor`].
//!
//! External capabilities - the telephony carrier, pharmacy discovery,
//! outcome persistence and notification delivery - are consumed through the
//! traits in [`providers`] and [`rxdial_call_core::notify`].

pub mod ack_timeout;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod queue;
pub mod telemetry;
pub mod telephony;

pub use ack_timeout::{AckTimeoutConfig, AckTimeoutMonitor, TimeoutEntry};
pub use config::EngineConfig;
pub use error::EngineError;
pub use orchestrator::{
    CallProgress, CandidateDialState, SearchOrchestrator, SearchResult, SearchState, SearchStatus,
    SearchSummary, TrackedCandidate,
};
pub use providers::{
    DialRequest, DialResponse, DiscoveryPage, DiscoveryQuery, OutcomeStore, PharmacyDirectory,
    ProviderError, SearchOutcome, TelephonyProvider,
};
pub use queue::{ConnectedCallInfo, HumanReadyQueue, QueueEntry};
pub use telemetry::{setup_logging, LoggingConfig};
