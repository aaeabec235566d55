//! In-process backend
//!
//! Keeps sessions and turns in memory with the same rules the platform applies:
//! only scheduled sessions can start, turn indices follow the last stored one,
//! offsets are measured from the session start, and stored text is scrubbed of
//! emails and phone numbers.

use super::redact::redact_pii;
use super::{
    CompletedSession, NewTurn, RemoteStatus, SessionApi, SessionGrant, StoredTurn, TurnStore,
};
use crate::credential::Credential;
use crate::error::{InterviewError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

#[derive(Debug)]
struct MemorySession {
    status: RemoteStatus,
    instructions: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<u64>,
    summary_requested: bool,
    turns: Vec<StoredTurn>,
}

pub struct MemoryBackend {
    api_key: String,
    sessions: Mutex<HashMap<String, MemorySession>>,
}

impl MemoryBackend {
    /// Sessions started here connect with `api_key` directly.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session ready to be started.
    pub fn schedule(&self, session_id: impl Into<String>, instructions: Option<String>) {
        self.sessions().insert(
            session_id.into(),
            MemorySession {
                status: RemoteStatus::Scheduled,
                instructions,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                duration_ms: None,
                summary_requested: false,
                turns: Vec::new(),
            },
        );
    }

    pub fn status(&self, session_id: &str) -> Option<RemoteStatus> {
        self.sessions().get(session_id).map(|s| s.status)
    }

    pub fn turns(&self, session_id: &str) -> Vec<StoredTurn> {
        self.sessions()
            .get(session_id)
            .map(|s| s.turns.clone())
            .unwrap_or_default()
    }

    pub fn summary_requested(&self, session_id: &str) -> bool {
        self.sessions()
            .get(session_id)
            .map(|s| s.summary_requested)
            .unwrap_or(false)
    }

    pub fn started_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.sessions().get(session_id).and_then(|s| s.started_at)
    }

    pub fn completed_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.sessions().get(session_id).and_then(|s| s.completed_at)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, MemorySession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

#[async_trait]
impl SessionApi for MemoryBackend {
    async fn start_session(&self, session_id: &str) -> Result<SessionGrant> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| InterviewError::SessionNotStartable("Session not found".to_string()))?;

        if session.status != RemoteStatus::Scheduled {
            return Err(InterviewError::SessionNotStartable(format!(
                "Current status: {}",
                session.status
            )));
        }

        session.status = RemoteStatus::InProgress;
        session.started_at = Some(Utc::now());
        info!("✅ Session {} in progress", session_id);

        Ok(SessionGrant {
            credential: Credential::new(self.api_key.clone(), None),
            instructions: session.instructions.clone(),
            realtime_session_id: Some(format!("sess_{}", Uuid::new_v4().simple())),
        })
    }

    async fn complete_session(&self, session_id: &str) -> Result<CompletedSession> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| InterviewError::Completion("Session not found".to_string()))?;

        let now = Utc::now();
        let duration_ms = elapsed_ms(session.started_at.unwrap_or(session.created_at), now);

        session.status = RemoteStatus::Completed;
        session.completed_at = Some(now);
        session.duration_ms = Some(duration_ms);
        session.summary_requested = true;
        info!("✅ Session {} completed after {}s", session_id, duration_ms / 1000);

        Ok(CompletedSession {
            id: session_id.to_string(),
            status: session.status,
            duration_ms: Some(duration_ms),
        })
    }
}

#[async_trait]
impl TurnStore for MemoryBackend {
    async fn save_turn(&self, turn: NewTurn) -> Result<StoredTurn> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(&turn.session_id)
            .ok_or_else(|| InterviewError::Persistence("Session not found".to_string()))?;

        let turn_index = session
            .turns
            .last()
            .map(|t| t.turn_index + 1)
            .unwrap_or(0);
        let t_start_ms = elapsed_ms(
            session.started_at.unwrap_or(session.created_at),
            Utc::now(),
        );

        let stored = StoredTurn {
            id: Some(Uuid::new_v4().to_string()),
            session_id: turn.session_id,
            turn_index,
            speaker: turn.speaker,
            t_start_ms,
            text: redact_pii(&turn.text),
        };
        session.turns.push(stored.clone());
        Ok(stored)
    }
}
