//! IVR navigation bookkeeping and pharmacy chain knowledge.
//!
//! [`IvrNavigationTracker`] keeps ephemeral, process-local retry state per
//! call; it is created when dialing starts and discarded when the call
//! concludes. [`chains`] holds the per-chain menu patterns and indicator
//! phrases that both generate the AI agent's navigation instructions and
//! corroborate provider-reported signals locally.

pub mod chains;
pub mod tracker;

pub use chains::{detect_chain, navigation_instructions, ChainProfile, MenuStep, PharmacyChain};
pub use tracker::{IvrNavigationState, IvrNavigationStatus, IvrNavigationTracker, NavigationOutcome};
