//! Interview backend collaborators
//!
//! The session controller needs three things from the platform: a credential to
//! start, somewhere to store turns, and a way to mark the interview finished.
//! [`http::HttpBackend`] talks to the platform API; [`memory::MemoryBackend`]
//! implements the same contracts in-process.

pub mod http;
pub mod memory;
pub mod redact;

use crate::credential::Credential;
use crate::error::Result;
use crate::turn::Speaker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything needed to open the realtime connection
#[derive(Debug)]
pub struct SessionGrant {
    pub credential: Credential,
    /// Interviewer prompt, when the backend does not configure it server-side
    pub instructions: Option<String>,
    pub realtime_session_id: Option<String>,
}

/// Turn as submitted for storage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTurn {
    pub session_id: String,
    pub speaker: Speaker,
    pub text: String,
}

/// Turn as stored, with the index and offset assigned by the store
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTurn {
    #[serde(default)]
    pub id: Option<String>,
    pub session_id: String,
    pub turn_index: u32,
    pub speaker: Speaker,
    pub t_start_ms: u64,
    pub text: String,
}

/// Interview lifecycle state on the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteStatus::Scheduled => "SCHEDULED",
            RemoteStatus::InProgress => "IN_PROGRESS",
            RemoteStatus::Completed => "COMPLETED",
            RemoteStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSession {
    pub id: String,
    pub status: RemoteStatus,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Mark the session in progress and mint a realtime credential.
    async fn start_session(&self, session_id: &str) -> Result<SessionGrant>;

    /// Mark the session completed and queue it for summarization.
    async fn complete_session(&self, session_id: &str) -> Result<CompletedSession>;
}

#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn save_turn(&self, turn: NewTurn) -> Result<StoredTurn>;
}
