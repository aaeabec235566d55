//! Event interpreter
//!
//! Turns decoded server events into session actions. Pure: no I/O, no clock
//! reads. The caller passes the current offset from session start so turn
//! timing stays deterministic under test.

use crate::audio::decode_chunk;
use crate::protocol::ServerEvent;
use crate::turn::{Speaker, Turn};
use smallvec::{smallvec, SmallVec};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_ERROR: &str = "An error occurred";

/// What the session loop should do in response to one event
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Close the half-duplex gate
    AiSpeaking,
    /// Decoded AI speech for the speaker
    PlayAudio(Vec<i16>),
    /// AI audio stream ended; start the cooldown
    AiAudioFinished,
    /// Live AI transcript so far
    AiTranscriptPartial(String),
    TurnCompleted(Turn),
    /// Remote error; the session cannot continue
    Fatal(String),
}

pub type Actions = SmallVec<[Action; 2]>;

#[derive(Debug, Default)]
pub struct EventInterpreter {
    next_index: u32,
    ai_buffer: String,
    /// Offset at which the in-progress AI turn began
    ai_started_at: Option<Duration>,
    /// A response is under way and its audio has not been reported done
    ai_audio_open: bool,
    /// Offset of the last participant speech start
    participant_started_at: Option<Duration>,
}

impl EventInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of turns emitted so far.
    pub fn turns_emitted(&self) -> u32 {
        self.next_index
    }

    pub fn apply(&mut self, event: ServerEvent, offset: Duration) -> Actions {
        match event {
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                debug!("📡 {}", event.name());
                Actions::new()
            }

            ServerEvent::ResponseCreated => {
                self.ai_started_at = Some(offset);
                self.ai_audio_open = true;
                smallvec![Action::AiSpeaking]
            }

            ServerEvent::AudioDelta { delta } => {
                self.ai_started_at.get_or_insert(offset);
                self.ai_audio_open = true;
                match decode_chunk(&delta) {
                    Ok(samples) if !samples.is_empty() => {
                        smallvec![Action::AiSpeaking, Action::PlayAudio(samples)]
                    }
                    Ok(_) => smallvec![Action::AiSpeaking],
                    Err(e) => {
                        warn!("Skipping undecodable audio chunk: {}", e);
                        smallvec![Action::AiSpeaking]
                    }
                }
            }

            ServerEvent::AudioDone => {
                self.ai_audio_open = false;
                smallvec![Action::AiAudioFinished]
            }

            ServerEvent::TranscriptDelta { delta } => {
                self.ai_started_at.get_or_insert(offset);
                self.ai_buffer.push_str(&delta);
                smallvec![Action::AiTranscriptPartial(self.ai_buffer.clone())]
            }

            ServerEvent::TranscriptDone { transcript } => {
                let buffered = std::mem::take(&mut self.ai_buffer);
                let started = self.ai_started_at.take().unwrap_or(offset);
                let text = match transcript {
                    Some(t) if !t.trim().is_empty() => t,
                    _ => buffered,
                };
                self.complete(Speaker::Ai, &text, started)
            }

            // Failed, cancelled and text-only responses end here without
            // audio.done; the gate must still cool down.
            ServerEvent::ResponseDone => {
                debug!("📡 response.done");
                let mut actions = Actions::new();
                let started = self.ai_started_at.take().unwrap_or(offset);
                if !self.ai_buffer.is_empty() {
                    let buffered = std::mem::take(&mut self.ai_buffer);
                    actions.extend(self.complete(Speaker::Ai, &buffered, started));
                }
                if std::mem::take(&mut self.ai_audio_open) {
                    actions.push(Action::AiAudioFinished);
                }
                actions
            }

            ServerEvent::SpeechStarted { .. } => {
                debug!("🗣️ Participant speech started at {:?}", offset);
                self.participant_started_at = Some(offset);
                Actions::new()
            }

            ServerEvent::SpeechStopped => Actions::new(),

            ServerEvent::InputTranscriptionCompleted { transcript } => {
                let started = self.participant_started_at.take().unwrap_or(offset);
                self.complete(Speaker::Participant, &transcript, started)
            }

            ServerEvent::Error { error } => {
                let message = error
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_ERROR.to_string());
                smallvec![Action::Fatal(message)]
            }

            ServerEvent::Unknown => Actions::new(),
        }
    }

    fn complete(&mut self, speaker: Speaker, text: &str, started: Duration) -> Actions {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring empty {} transcript", speaker.label());
            return Actions::new();
        }

        let turn = Turn {
            speaker,
            text: text.to_string(),
            sequence_index: self.next_index,
            offset_ms: started.as_millis() as u64,
        };
        self.next_index += 1;
        smallvec![Action::TurnCompleted(turn)]
    }
}
