//! Bidirectional audio relay between a phone call and an AI voice session.
//!
//! The bridge handshake requires both legs to come up: the media leg must
//! report `Connected` (carrying the call's external identifiers) and the
//! AI leg must report `SessionReady`. Only then does the relay loop start.
//! Either leg disconnecting tears down both legs and concludes the bridge.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::leg::{AiControlSignal, AiLeg, AiLegEvent, MediaLeg, MediaLegEvent};

/// Control tokens the AI embeds in its transcript stream. The structured
/// signal channel is preferred; tokens are the fallback for sessions that
/// can only emit text.
pub const TOKEN_HUMAN_REACHED: &str = "[HUMAN_REACHED]";
pub const TOKEN_VOICEMAIL_REACHED: &str = "[VOICEMAIL_REACHED]";
pub const TOKEN_NAV_FAILED: &str = "[NAV_FAILED]";

/// Configuration for one audio bridge.
#[derive(Debug, Clone)]
pub struct AudioBridgeConfig {
    /// Name used to correlate the bridge with its call record.
    pub bridge_name: String,
    /// Frames larger than this are dropped, not relayed.
    pub max_frame_bytes: usize,
    /// How long to wait for both legs to come up.
    pub handshake_timeout: Duration,
}

impl Default for AudioBridgeConfig {
    fn default() -> Self {
        Self {
            bridge_name: "bridge".to_string(),
            max_frame_bytes: 16 * 1024,
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// Relay counters, reported on teardown.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RelayStats {
    pub frames_phone_to_ai: u64,
    pub frames_ai_to_phone: u64,
    pub bytes_phone_to_ai: u64,
    pub bytes_ai_to_phone: u64,
    pub frames_dropped: u64,
}

/// Events raised by a running bridge.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Both legs are up; relaying has started.
    Established {
        external_call_id: String,
        stream_id: String,
    },
    /// The AI signaled a live person on the line.
    HumanReached { confidence: f64 },
    /// The AI signaled the call went to voicemail.
    VoicemailReached { confidence: f64 },
    /// The AI signaled it could not get through the menu.
    NavigationFailed { reason: String },
    /// Plain transcript passthrough (control tokens stripped).
    Transcript(String),
    /// The bridge concluded; both legs are closed.
    TornDown { reason: String, stats: RelayStats },
}

/// Scan a transcript delta for an embedded control token.
///
/// Returns the signal and the text with the token removed. Token-derived
/// signals carry full confidence: the agent announced them explicitly.
pub fn scan_control_token(text: &str) -> (Option<AiControlSignal>, String) {
    for (token, make) in [
        (
            TOKEN_HUMAN_REACHED,
            AiControlSignal::HumanReached { confidence: 1.0 },
        ),
        (
            TOKEN_VOICEMAIL_REACHED,
            AiControlSignal::VoicemailReached { confidence: 1.0 },
        ),
        (
            TOKEN_NAV_FAILED,
            AiControlSignal::NavigationFailed {
                reason: "agent reported navigation failure".to_string(),
            },
        ),
    ] {
        if text.contains(token) {
            return (Some(make), text.replace(token, "").trim().to_string());
        }
    }
    (None, text.to_string())
}

/// Couples one phone media stream to one AI voice session.
pub struct AudioBridge {
    config: AudioBridgeConfig,
    events: mpsc::UnboundedSender<BridgeEvent>,
    stats: RelayStats,
}

impl AudioBridge {
    pub fn new(config: AudioBridgeConfig, events: mpsc::UnboundedSender<BridgeEvent>) -> Self {
        Self {
            config,
            events,
            stats: RelayStats::default(),
        }
    }

    /// Run the bridge to completion: configure the AI leg, perform the
    /// handshake, relay until either leg drops, then tear both down.
    ///
    /// Returns the final relay statistics.
    pub async fn run(
        mut self,
        mut media: Box<dyn MediaLeg>,
        mut ai: Box<dyn AiLeg>,
        navigation_instructions: &str,
    ) -> Result<RelayStats, BridgeError> {
        ai.configure(navigation_instructions).await?;

        let handshake = tokio::time::timeout(
            self.config.handshake_timeout,
            self.await_both_legs(&mut media, &mut ai),
        )
        .await;

        let (external_call_id, stream_id) = match handshake {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                self.teardown(&mut media, &mut ai, "handshake failed").await;
                return Err(e);
            }
            Err(_) => {
                self.teardown(&mut media, &mut ai, "handshake timeout").await;
                return Err(BridgeError::HandshakeTimeout);
            }
        };

        info!(
            "Bridge {} established for external call {}",
            self.config.bridge_name, external_call_id
        );
        let _ = self.events.send(BridgeEvent::Established {
            external_call_id,
            stream_id,
        });

        let reason = self.relay(&mut media, &mut ai).await;
        self.teardown(&mut media, &mut ai, &reason).await;
        Ok(self.stats)
    }

    /// Wait until the media leg reports `Connected` and the AI leg reports
    /// `SessionReady`. Audio arriving before both legs are up is dropped.
    async fn await_both_legs(
        &mut self,
        media: &mut Box<dyn MediaLeg>,
        ai: &mut Box<dyn AiLeg>,
    ) -> Result<(String, String), BridgeError> {
        let mut media_ids: Option<(String, String)> = None;
        let mut ai_ready = false;

        loop {
            if let (Some(ids), true) = (&media_ids, ai_ready) {
                return Ok(ids.clone());
            }

            tokio::select! {
                event = media.recv(), if media_ids.is_none() => match event {
                    Some(MediaLegEvent::Connected { external_call_id, stream_id }) => {
                        debug!("Media leg connected: {}", external_call_id);
                        media_ids = Some((external_call_id, stream_id));
                    }
                    Some(MediaLegEvent::Audio(_)) => {
                        self.stats.frames_dropped += 1;
                    }
                    Some(MediaLegEvent::Disconnected) | None => {
                        return Err(BridgeError::Handshake(
                            "media leg closed before connecting".to_string(),
                        ));
                    }
                },
                event = ai.recv(), if !ai_ready => match event {
                    Some(AiLegEvent::SessionReady) => {
                        debug!("AI leg session ready");
                        ai_ready = true;
                    }
                    Some(AiLegEvent::Audio(_)) | Some(AiLegEvent::TranscriptDelta(_))
                    | Some(AiLegEvent::Signal(_)) => {
                        self.stats.frames_dropped += 1;
                    }
                    Some(AiLegEvent::Closed) | None => {
                        return Err(BridgeError::Handshake(
                            "AI leg closed before session handshake".to_string(),
                        ));
                    }
                },
            }
        }
    }

    /// Symmetric relay loop. Returns the teardown reason.
    async fn relay(&mut self, media: &mut Box<dyn MediaLeg>, ai: &mut Box<dyn AiLeg>) -> String {
        loop {
            tokio::select! {
                event = media.recv() => match event {
                    Some(MediaLegEvent::Audio(frame)) => {
                        if self.relay_frame_to_ai(ai, frame).await.is_err() {
                            return "AI leg rejected audio".to_string();
                        }
                    }
                    Some(MediaLegEvent::Connected { external_call_id, .. }) => {
                        debug!("Duplicate media connect for {}", external_call_id);
                    }
                    Some(MediaLegEvent::Disconnected) | None => {
                        return "media leg disconnected".to_string();
                    }
                },
                event = ai.recv() => match event {
                    Some(AiLegEvent::Audio(frame)) => {
                        if self.relay_frame_to_phone(media, frame).await.is_err() {
                            return "media leg rejected audio".to_string();
                        }
                    }
                    Some(AiLegEvent::TranscriptDelta(text)) => {
                        self.handle_transcript(text);
                    }
                    Some(AiLegEvent::Signal(signal)) => {
                        self.emit_signal(signal);
                    }
                    Some(AiLegEvent::SessionReady) => {
                        debug!("Duplicate AI session ready");
                    }
                    Some(AiLegEvent::Closed) | None => {
                        return "AI leg closed".to_string();
                    }
                },
            }
        }
    }

    async fn relay_frame_to_ai(
        &mut self,
        ai: &mut Box<dyn AiLeg>,
        frame: Bytes,
    ) -> Result<(), BridgeError> {
        if frame.len() > self.config.max_frame_bytes {
            warn!("Dropping oversized phone frame: {} bytes", frame.len());
            self.stats.frames_dropped += 1;
            return Ok(());
        }
        self.stats.frames_phone_to_ai += 1;
        self.stats.bytes_phone_to_ai += frame.len() as u64;
        ai.send_audio(frame).await
    }

    async fn relay_frame_to_phone(
        &mut self,
        media: &mut Box<dyn MediaLeg>,
        frame: Bytes,
    ) -> Result<(), BridgeError> {
        if frame.len() > self.config.max_frame_bytes {
            warn!("Dropping oversized agent frame: {} bytes", frame.len());
            self.stats.frames_dropped += 1;
            return Ok(());
        }
        self.stats.frames_ai_to_phone += 1;
        self.stats.bytes_ai_to_phone += frame.len() as u64;
        media.send_audio(frame).await
    }

    fn handle_transcript(&mut self, text: String) {
        let (signal, remainder) = scan_control_token(&text);
        if let Some(signal) = signal {
            self.emit_signal(signal);
        }
        if !remainder.is_empty() {
            let _ = self.events.send(BridgeEvent::Transcript(remainder));
        }
    }

    fn emit_signal(&mut self, signal: AiControlSignal) {
        let event = match signal {
            AiControlSignal::HumanReached { confidence } => BridgeEvent::HumanReached { confidence },
            AiControlSignal::VoicemailReached { confidence } => {
                BridgeEvent::VoicemailReached { confidence }
            }
            AiControlSignal::NavigationFailed { reason } => BridgeEvent::NavigationFailed { reason },
        };
        let _ = self.events.send(event);
    }

    async fn teardown(&mut self, media: &mut Box<dyn MediaLeg>, ai: &mut Box<dyn AiLeg>, reason: &str) {
        info!("Bridge {} tearing down: {}", self.config.bridge_name, reason);
        media.close().await;
        ai.close().await;
        let _ = self.events.send(BridgeEvent::TornDown {
            reason: reason.to_string(),
            stats: self.stats.clone(),
        });
    }
}
