//! Error types for the live interview pipeline.

use tokio_tungstenite::tungstenite::Error as WsError;

/// Message shown to the participant whenever a session fails for good.
pub const RESTART_MESSAGE: &str =
    "We could not complete the interview. Please restart it from the beginning.";

/// Error type for interview session operations
#[derive(Debug, thiserror::Error)]
pub enum InterviewError {
    /// Initiation collaborator failed, or the credential was missing/expired
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Session cannot be started: {0}")]
    SessionNotStartable(String),

    /// Transport failed to open or errored mid-session
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Failed to persist turn: {0}")]
    Persistence(String),

    #[error("Failed to complete session: {0}")]
    Completion(String),

    /// Microphone or speaker unavailable
    #[error("Audio device error: {0}")]
    Device(String),

    /// Error event reported by the remote AI
    #[error("Realtime protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<WsError> for InterviewError {
    fn from(e: WsError) -> Self {
        InterviewError::Connection(e.to_string())
    }
}

impl InterviewError {
    /// Whether this error ends the session.
    ///
    /// Persistence and completion failures are logged and swallowed; everything
    /// else tears the session down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            InterviewError::Persistence(_) | InterviewError::Completion(_)
        )
    }

    /// Generic participant-facing text. Details stay in the logs.
    pub fn user_message(&self) -> &'static str {
        RESTART_MESSAGE
    }
}

pub type Result<T> = std::result::Result<T, InterviewError>;
