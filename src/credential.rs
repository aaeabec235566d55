//! Short-lived realtime credential

use chrono::{DateTime, Utc};
use std::fmt;

/// Ephemeral secret authorizing exactly one realtime connection.
///
/// Not `Clone`: the credential is moved into the transport when it opens, so a
/// second connection with the same secret does not type-check.
pub struct Credential {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// An empty secret counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.secret.is_empty() {
            return true;
        }
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
