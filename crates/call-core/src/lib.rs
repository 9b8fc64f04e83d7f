//! # RxDial Call Core
//!
//! Core call-lifecycle primitives for the RxDial stack: the per-call state
//! machine with its table-driven transition graph, transition history and
//! typed event fan-out, plus the ephemeral IVR navigation tracker and the
//! pharmacy chain-knowledge registry that drives the AI voice agent.
//!
//! ## Overview
//!
//! Every outbound pharmacy call is represented by a [`CallRecord`] owned by
//! the [`CallStateMachine`]. Records move through a fixed transition graph
//! (see [`state_table`]) from `Created` to the terminal `Ended` state; every
//! transition is validated against the table, appended to the call's
//! history, and published as a [`CallEvent`] on a broadcast channel so that
//! orchestration layers can react without the state machine knowing about
//! them.
//!
//! IVR navigation bookkeeping lives in [`IvrNavigationTracker`]: a
//! process-local record of attempts, errors and outcome per call, with a
//! bounded retry policy (3 attempts inside a 60 second window). The
//! [`ivr::chains`] registry supplies per-chain menu patterns, hold and
//! human-speech indicators, and renders the navigation instructions the
//! conversational AI session is configured with before it hears any audio.
//!
//! ```rust
//! use rxdial_call_core::{CallStateMachine, CallState, CreateCallParams};
//! use rxdial_call_core::types::SearchId;
//!
//! # async fn example() -> Result<(), rxdial_call_core::CallCoreError> {
//! let machine = CallStateMachine::new();
//! let record = machine.create(CreateCallParams {
//!     search_id: SearchId::new(),
//!     pharmacy_id: "ph-1".into(),
//!     pharmacy_name: "Walgreens #2210".to_string(),
//!     phone_number: "+15551230000".to_string(),
//!     metadata: Default::default(),
//! }).await?;
//!
//! machine.transition(&record.call_id, CallState::Dialing, Default::default()).await?;
//! assert_eq!(machine.state_of(&record.call_id).await, Some(CallState::Dialing));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod ivr;
pub mod notify;
pub mod state_machine;
pub mod state_table;
pub mod types;

pub use error::CallCoreError;
pub use ivr::{ChainProfile, IvrNavigationStatus, IvrNavigationTracker, NavigationOutcome};
pub use notify::NotificationSink;
pub use state_machine::{CallEvent, CallStateMachine, CreateCallParams, TransitionOptions};
pub use state_table::CallStateTable;
pub use types::{CallId, CallRecord, CallState, Pharmacy, PharmacyId, SearchId, TransitionRecord};
