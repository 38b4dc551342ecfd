use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the strava-token-proxy service.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    // ── Credential lifecycle ────────────────────────────────────────────
    #[error("Not authenticated: no Strava credential has been stored")]
    NotAuthenticated,

    #[error("Stored credential has no refresh token")]
    MissingRefreshToken,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    // ── Upstream API ────────────────────────────────────────────────────
    #[error("Upstream call failed: {message}")]
    UpstreamCallFailed {
        status: Option<u16>,
        message: String,
    },

    // ── Request Errors ──────────────────────────────────────────────────
    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Bad request: {0}")]
    BadRequest(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Whether the upstream rejected the bearer token outright.
    pub fn is_upstream_unauthorized(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamCallFailed {
                status: Some(401),
                ..
            }
        )
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ProxyError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "not_authenticated"),
            ProxyError::MissingRefreshToken => (StatusCode::BAD_REQUEST, "missing_refresh_token"),
            ProxyError::RefreshFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "refresh_failed"),
            ProxyError::ExchangeFailed(_) => (StatusCode::BAD_GATEWAY, "exchange_failed"),
            ProxyError::UpstreamCallFailed { status, .. } => match status {
                Some(401) => (StatusCode::UNAUTHORIZED, "upstream_unauthorized"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_call_failed"),
            },
            ProxyError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state"),
            ProxyError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ProxyError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            ProxyError::Crypto(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crypto_error"),
            ProxyError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<sqlx::Error> for ProxyError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        ProxyError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        tracing::error!("Token file error: {e}");
        ProxyError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        ProxyError::Storage(format!("malformed credential record: {e}"))
    }
}

impl From<anyhow::Error> for ProxyError {
    fn from(e: anyhow::Error) -> Self {
        ProxyError::Internal(e.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code, "{self}");
        } else {
            tracing::warn!(code, "{self}");
        }

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
