//! The OAuth credential triple and its expiry classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The single Strava credential held by this deployment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

// Keep tokens out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where the stored credential sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialState {
    Absent,
    Valid,
    Expired,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// True once `now + skew_secs` has reached `expires_at`.
    pub fn is_expired_at(&self, now: i64, skew_secs: i64) -> bool {
        now.saturating_add(skew_secs) >= self.expires_at
    }

    /// Seconds until expiry (negative once expired).
    pub fn remaining_secs(&self, now: i64) -> i64 {
        self.expires_at - now
    }
}

impl CredentialState {
    /// Classify an optional stored credential.
    pub fn of(credential: Option<&Credential>, now: i64, skew_secs: i64) -> Self {
        match credential {
            None => CredentialState::Absent,
            Some(c) if c.is_expired_at(now, skew_secs) => CredentialState::Expired,
            Some(_) => CredentialState::Valid,
        }
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialState::Absent => "absent",
            CredentialState::Valid => "valid",
            CredentialState::Expired => "expired",
        })
    }
}
