//! Search orchestration.
//!
//! Composes the call state machine, IVR tracker, human-ready queue and
//! acknowledgment monitor into the per-search lifecycle: dial candidates
//! under the concurrency cap, escalate to the next candidate as attempts
//! conclude without a human, replenish reserves from discovery, and settle
//! exactly one winning human contact per search.

pub mod core;
pub mod types;

pub use core::SearchOrchestrator;
pub use types::{
    CallProgress, CandidateDialState, SearchResult, SearchState, SearchStatus, SearchSummary,
    TrackedCandidate,
};
