//! Platform API client

use super::{CompletedSession, NewTurn, SessionApi, SessionGrant, StoredTurn, TurnStore};
use crate::credential::Credential;
use crate::error::{InterviewError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// `POST /api/realtime/session` response
#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    /// Unix seconds
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TurnResponse {
    turn: StoredTurn,
}

#[derive(Debug, Deserialize)]
struct CompleteResponse {
    session: CompletedSession,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InterviewError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Map a failed start request to the error the controller reports.
fn start_failure(status: StatusCode, body: &str) -> InterviewError {
    let message = error_message(body);
    match status {
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
            InterviewError::SessionNotStartable(message)
        }
        _ => InterviewError::Credential(format!("{}: {}", status, message)),
    }
}

fn grant_from_response(response: StartResponse) -> Result<SessionGrant> {
    let secret = response
        .client_secret
        .filter(|s| !s.is_empty())
        .ok_or_else(|| InterviewError::Credential("no client secret returned".to_string()))?;

    let expires_at = response
        .expires_at
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    Ok(SessionGrant {
        credential: Credential::new(secret, expires_at),
        instructions: response.instructions,
        realtime_session_id: response.session_id,
    })
}

#[async_trait]
impl SessionApi for HttpBackend {
    async fn start_session(&self, session_id: &str) -> Result<SessionGrant> {
        debug!("Requesting realtime credential for session {}", session_id);
        let response = self
            .client
            .post(self.url("/api/realtime/session"))
            .json(&json!({ "sessionId": session_id }))
            .send()
            .await
            .map_err(|e| InterviewError::Credential(format!("session request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InterviewError::Credential(format!("session response unreadable: {}", e)))?;

        if !status.is_success() {
            return Err(start_failure(status, &body));
        }

        let parsed: StartResponse = serde_json::from_str(&body)
            .map_err(|e| InterviewError::Credential(format!("malformed session response: {}", e)))?;
        let grant = grant_from_response(parsed)?;
        info!(
            "🔑 Realtime credential issued (expires: {})",
            grant
                .credential
                .expires_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
        Ok(grant)
    }

    async fn complete_session(&self, session_id: &str) -> Result<CompletedSession> {
        let response = self
            .client
            .post(self.url("/api/interview/complete"))
            .json(&json!({ "sessionId": session_id }))
            .send()
            .await
            .map_err(|e| InterviewError::Completion(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Completion rejected with {}", status);
            return Err(InterviewError::Completion(format!(
                "{}: {}",
                status,
                error_message(&body)
            )));
        }

        let parsed: CompleteResponse = response
            .json()
            .await
            .map_err(|e| InterviewError::Completion(format!("malformed response: {}", e)))?;
        Ok(parsed.session)
    }
}

#[async_trait]
impl TurnStore for HttpBackend {
    async fn save_turn(&self, turn: NewTurn) -> Result<StoredTurn> {
        let response = self
            .client
            .post(self.url("/api/interview/turn"))
            .json(&turn)
            .send()
            .await
            .map_err(|e| InterviewError::Persistence(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InterviewError::Persistence(format!(
                "{}: {}",
                status,
                error_message(&body)
            )));
        }

        let parsed: TurnResponse = response
            .json()
            .await
            .map_err(|e| InterviewError::Persistence(format!("malformed response: {}", e)))?;
        Ok(parsed.turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_from_response() {
        let response: StartResponse = serde_json::from_str(
            r#"{"client_secret":"ek_abc","session_id":"sess_001","expires_at":1735689600}"#,
        )
        .unwrap();
        let grant = grant_from_response(response).unwrap();
        assert_eq!(grant.credential.secret(), "ek_abc");
        assert_eq!(grant.realtime_session_id.as_deref(), Some("sess_001"));
        assert_eq!(
            grant.credential.expires_at().map(|t| t.timestamp()),
            Some(1_735_689_600)
        );
        assert!(grant.instructions.is_none());
    }

    #[test]
    fn test_missing_secret_is_credential_error() {
        let response: StartResponse =
            serde_json::from_str(r#"{"session_id":"sess_001","expires_at":1735689600}"#).unwrap();
        assert!(matches!(
            grant_from_response(response),
            Err(InterviewError::Credential(_))
        ));
    }

    #[test]
    fn test_start_failure_classification() {
        let err = start_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":"Session cannot be started. Current status: COMPLETED"}"#,
        );
        match err {
            InterviewError::SessionNotStartable(msg) => {
                assert_eq!(msg, "Session cannot be started. Current status: COMPLETED")
            }
            other => panic!("Expected not startable, got {:?}", other),
        }

        assert!(matches!(
            start_failure(StatusCode::NOT_FOUND, r#"{"error":"Session not found"}"#),
            InterviewError::SessionNotStartable(_)
        ));
        assert!(matches!(
            start_failure(StatusCode::INTERNAL_SERVER_ERROR, "upstream down"),
            InterviewError::Credential(_)
        ));
    }

    #[test]
    fn test_base_url_normalized() {
        let backend = HttpBackend::new("http://localhost:3000/").unwrap();
        assert_eq!(
            backend.url("/api/interview/turn"),
            "http://localhost:3000/api/interview/turn"
        );
    }
}
