use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::ProxyError;

/// Tokens returned from the upstream after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    /// Absolute expiry, unix seconds.
    pub expires_at: Option<i64>,
    /// Relative lifetime, used only when `expires_at` is missing.
    pub expires_in: Option<u64>,
    /// Athlete summary; Strava sends it on code exchange only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub athlete: Option<serde_json::Value>,
}

impl TokenGrant {
    /// Turn the grant into a complete credential triple.
    ///
    /// Fails with a short reason when any of the three parts is missing.
    pub fn into_credential(self, now: i64) -> Result<Credential, &'static str> {
        if self.access_token.is_empty() {
            return Err("response carried an empty access_token");
        }

        let refresh_token = match self.refresh_token {
            Some(rt) if !rt.is_empty() => rt,
            _ => return Err("response is missing refresh_token"),
        };

        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => at,
            (None, Some(secs)) => now.saturating_add(secs as i64),
            (None, None) => return Err("response is missing expires_at"),
        };

        Ok(Credential {
            access_token: self.access_token,
            refresh_token,
            expires_at,
        })
    }
}

/// The upstream OAuth authorization server plus the one data call this proxy forwards.
#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    /// Provider identifier used in logs.
    fn id(&self) -> &str;

    /// Build the authorization URL the browser is redirected to.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an authorization code for the first token pair.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProxyError>;

    /// Mint a new token pair from a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProxyError>;

    /// List the authenticated athlete's activities, returning the upstream JSON verbatim.
    async fn list_activities(&self, access_token: &str) -> Result<serde_json::Value, ProxyError>;
}
