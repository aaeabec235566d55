//! Realtime wire protocol
//!
//! JSON events tagged by `type`. Only the events the interview pipeline sends or
//! reacts to are modelled; anything else decodes to [`ServerEvent::Unknown`].

use crate::config::InterviewConfig;
use serde::{Deserialize, Serialize};

/// Events sent to the realtime service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// One captured frame, base64 PCM16 LE mono
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl SessionConfig {
    /// Session settings sent right after connecting.
    pub fn from_config(config: &InterviewConfig, instructions: Option<String>) -> Self {
        let vad = &config.turn_detection;
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions,
            voice: config.voice.clone(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: Some(TranscriptionConfig {
                model: config.transcription_model.clone(),
            }),
            turn_detection: Some(TurnDetection {
                kind: "server_vad".to_string(),
                threshold: vad.threshold,
                prefix_padding_ms: vad.prefix_padding_ms,
                silence_duration_ms: vad.silence_duration_ms,
            }),
        }
    }
}

/// Events received from the realtime service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "response.created")]
    ResponseCreated,

    /// Base64 PCM16 chunk of AI speech
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone {
        #[serde(default)]
        transcript: Option<String>,
    },

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ServerEvent {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::SessionCreated => "session.created",
            ServerEvent::SessionUpdated => "session.updated",
            ServerEvent::ResponseCreated => "response.created",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::AudioDone => "response.audio.done",
            ServerEvent::TranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::TranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::ResponseDone => "response.done",
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped => "input_audio_buffer.speech_stopped",
            ServerEvent::InputTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_serialization() {
        let config = InterviewConfig::default();
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig::from_config(&config, Some("Ask about Rust.".to_string())),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "verse");
        assert_eq!(json["session"]["instructions"], "Ask about Rust.");
        assert_eq!(json["session"]["input_audio_format"], "pcm16");
        assert_eq!(json["session"]["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(json["session"]["turn_detection"]["silence_duration_ms"], 500);
    }

    #[test]
    fn test_instructions_omitted_when_absent() {
        let session = SessionConfig::from_config(&InterviewConfig::default(), None);
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("instructions").is_none());
    }

    #[test]
    fn test_audio_append_serialization() {
        let event = ClientEvent::InputAudioBufferAppend {
            audio: "AAEC".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"input_audio_buffer.append","audio":"AAEC"}"#);
    }

    #[test]
    fn test_server_event_deserialization() {
        let event = ServerEvent::parse(
            r#"{"type":"response.audio.delta","event_id":"ev_1","response_id":"r1","delta":"AAA="}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::AudioDelta {
                delta: "AAA=".to_string()
            }
        );

        let event = ServerEvent::parse(r#"{"type":"response.audio.done","item_id":"i1"}"#).unwrap();
        assert_eq!(event, ServerEvent::AudioDone);

        let event = ServerEvent::parse(
            r#"{"type":"conversation.item.input_audio_transcription.completed","item_id":"i2","content_index":0,"transcript":"hello"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::InputTranscriptionCompleted {
                transcript: "hello".to_string()
            }
        );

        let event = ServerEvent::parse(r#"{"type":"response.audio_transcript.done"}"#).unwrap();
        assert_eq!(event, ServerEvent::TranscriptDone { transcript: None });
    }

    #[test]
    fn test_error_event() {
        let event = ServerEvent::parse(
            r#"{"type":"error","error":{"type":"invalid_request_error","code":"session_expired","message":"Session expired"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.message.as_deref(), Some("Session expired"));
                assert_eq!(error.code.as_deref(), Some("session_expired"));
                assert_eq!(error.kind.as_deref(), Some("invalid_request_error"));
            }
            other => panic!("Expected error event, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let event = ServerEvent::parse(
            r#"{"type":"rate_limits.updated","rate_limits":[{"name":"tokens","limit":1000}]}"#,
        )
        .unwrap();
        assert_eq!(event, ServerEvent::Unknown);
        assert_eq!(event.name(), "unknown");
    }

    #[test]
    fn test_malformed_event_rejected() {
        assert!(ServerEvent::parse("not json").is_err());
        assert!(ServerEvent::parse(r#"{"type":"response.audio.delta"}"#).is_err());
    }
}
