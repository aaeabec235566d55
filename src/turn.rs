//! Conversation turns

use serde::{Deserialize, Serialize};

/// Who produced a turn.
///
/// Serializes as the lowercase names the turn endpoint expects and accepts the
/// uppercase names the store returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "user", alias = "PARTICIPANT", alias = "participant")]
    Participant,
    #[serde(rename = "ai", alias = "AI")]
    Ai,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::Participant => "Participant",
            Speaker::Ai => "AI",
        }
    }
}

/// One finalized utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    /// Zero-based, gap-free within a session, in emission order
    pub sequence_index: u32,
    /// Milliseconds since session start when the turn began
    pub offset_ms: u64,
}

/// Live transcript output fanned out to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptUpdate {
    /// In-progress AI text, the whole buffer so far
    Partial { text: String },
    Completed(Turn),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_wire_names() {
        assert_eq!(serde_json::to_string(&Speaker::Participant).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Speaker::Ai).unwrap(), "\"ai\"");

        let s: Speaker = serde_json::from_str("\"PARTICIPANT\"").unwrap();
        assert_eq!(s, Speaker::Participant);
        let s: Speaker = serde_json::from_str("\"AI\"").unwrap();
        assert_eq!(s, Speaker::Ai);
    }
}
