//! # RxDial Bridge Core
//!
//! Couples a live telephony media session to a conversational AI voice
//! session and turns what the AI hears into structured detection events.
//!
//! The [`AudioBridge`] owns two independent bidirectional audio legs: the
//! phone call's media stream ([`MediaLeg`]) and the AI session ([`AiLeg`]).
//! Once the media leg reports the call connected and the AI leg finishes
//! its session handshake, audio frames are relayed symmetrically in both
//! directions until either leg disconnects, at which point the bridge
//! tears both down. The AI transcript stream is scanned for embedded
//! control tokens; structured [`AiControlSignal`]s are the equivalent,
//! preferred channel for the same semantics.
//!
//! [`DetectionEventProcessor`] maps the resulting [`DetectionEvent`]s onto
//! call state transitions, IVR navigation bookkeeping and outbound
//! notifications.

pub mod bridge;
pub mod detection;
pub mod error;
pub mod leg;

pub use bridge::{AudioBridge, AudioBridgeConfig, BridgeEvent, RelayStats};
pub use detection::{DetectionEvent, DetectionEventProcessor, DetectionKind};
pub use error::BridgeError;
pub use leg::{AiControlSignal, AiLeg, AiLegEvent, MediaLeg, MediaLegEvent};
