use async_trait::async_trait;
use tracing::debug;

use super::traits::{TokenGrant, UpstreamProvider};
use crate::config::StravaConfig;
use crate::error::ProxyError;

/// Strava OAuth 2.0 provider.
///
/// Quirks:
/// - Token responses carry an absolute `expires_at` alongside `expires_in`.
/// - Access tokens live six hours; every refresh may rotate the refresh token.
/// - Scopes are comma-separated.
/// - Code exchange also returns an `athlete` summary.
pub struct StravaProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
    authorize_url: String,
    token_url: String,
    api_url: String,
    http: reqwest::Client,
}

impl StravaProvider {
    pub fn new(config: &StravaConfig) -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("strava-token-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope.clone(),
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// POST a grant to the token endpoint. `Err` carries a message for the caller to wrap.
    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenGrant, String> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let resp = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Strava answered {status}: {body}"));
        }

        resp.json::<TokenGrant>()
            .await
            .map_err(|e| format!("failed to parse token response: {e}"))
    }
}

#[async_trait]
impl UpstreamProvider for StravaProvider {
    fn id(&self) -> &str {
        "strava"
    }

    fn authorize_url(&self, state: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("approval_prompt", "auto")
            .append_pair("scope", &self.scope)
            .append_pair("state", state)
            .finish();

        format!("{}?{}", self.authorize_url, query)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProxyError> {
        self.token_request(&[("code", code), ("grant_type", "authorization_code")])
            .await
            .map_err(ProxyError::ExchangeFailed)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProxyError> {
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
        .map_err(ProxyError::RefreshFailed)
    }

    async fn list_activities(&self, access_token: &str) -> Result<serde_json::Value, ProxyError> {
        let url = format!("{}/athlete/activities", self.api_url);
        debug!("GET {url}");

        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamCallFailed {
                status: None,
                message: format!("activities request failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::UpstreamCallFailed {
                status: Some(status.as_u16()),
                message: format!("Strava answered {status}: {body}"),
            });
        }

        resp.json()
            .await
            .map_err(|e| ProxyError::UpstreamCallFailed {
                status: Some(status.as_u16()),
                message: format!("failed to parse activities response: {e}"),
            })
    }
}
