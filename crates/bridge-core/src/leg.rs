//! The two audio legs a bridge couples together.
//!
//! Both legs are modeled as event sources plus an audio sink so the bridge
//! can drive them from a single select loop. Concrete implementations wrap
//! the telephony provider's media websocket and the AI service's realtime
//! session; tests substitute channel-backed fakes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BridgeError;

/// Events arriving from the phone call's media stream.
#[derive(Debug, Clone)]
pub enum MediaLegEvent {
    /// The media stream is live. Carries the call's external identifiers.
    Connected {
        external_call_id: String,
        stream_id: String,
    },
    /// One frame of caller-side audio.
    Audio(Bytes),
    /// The media stream closed.
    Disconnected,
}

/// Structured control signals from the AI session.
///
/// Preferred over transcript token scanning: the AI reports these as
/// function-call-style outputs with an explicit confidence.
#[derive(Debug, Clone, PartialEq)]
pub enum AiControlSignal {
    HumanReached { confidence: f64 },
    VoicemailReached { confidence: f64 },
    NavigationFailed { reason: String },
}

/// Events arriving from the conversational AI session.
#[derive(Debug, Clone)]
pub enum AiLegEvent {
    /// Session handshake completed; the AI is ready for audio.
    SessionReady,
    /// One frame of synthesized agent audio.
    Audio(Bytes),
    /// Incremental transcript text. May carry embedded control tokens.
    TranscriptDelta(String),
    /// A structured control signal.
    Signal(AiControlSignal),
    /// The AI session closed.
    Closed,
}

/// The live phone call's media stream.
#[async_trait]
pub trait MediaLeg: Send {
    /// Next event from the stream; `None` once the stream is gone.
    async fn recv(&mut self) -> Option<MediaLegEvent>;

    /// Send one frame of agent audio toward the phone.
    async fn send_audio(&mut self, frame: Bytes) -> Result<(), BridgeError>;

    /// Tear the leg down. Idempotent.
    async fn close(&mut self);
}

/// The conversational AI session.
#[async_trait]
pub trait AiLeg: Send {
    /// Configure the session with navigation instructions. Must be called
    /// before any audio is exchanged.
    async fn configure(&mut self, instructions: &str) -> Result<(), BridgeError>;

    /// Next event from the session; `None` once the session is gone.
    async fn recv(&mut self) -> Option<AiLegEvent>;

    /// Send one frame of caller audio toward the AI.
    async fn send_audio(&mut self, frame: Bytes) -> Result<(), BridgeError>;

    /// Tear the leg down. Idempotent.
    async fn close(&mut self);
}
