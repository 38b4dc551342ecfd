//! Route handlers for the strava-token-proxy front door.
//!
//! All handlers receive `SharedState` via Axum state extraction and return
//! `ProxyError` on failure, which renders as a JSON error body.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::credential::Credential;
use crate::error::ProxyError;
use crate::SharedState;

pub fn app_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/", get(root))
        .route("/status", get(status))
        // ── Auth ─────────────────────────────────────────────────────────
        .route("/auth/login", get(auth_login))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/refresh", get(auth_refresh))
        // ── Data ─────────────────────────────────────────────────────────
        .route("/api/activities", get(activities))
        .with_state(state)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Health
// =============================================================================

async fn root() -> &'static str {
    "Strava token proxy is up and running"
}

async fn status(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ProxyError> {
    let credential = state.manager.state().await?;

    Ok(Json(json!({
        "status": "ok",
        "service": "strava-token-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "storage": state.manager.store().backend(),
        "credential": credential,
    })))
}

// =============================================================================
// Auth Endpoints
// =============================================================================

/// GET /auth/login — Redirect the browser to the Strava consent screen.
async fn auth_login(State(state): State<SharedState>) -> Result<Response, ProxyError> {
    let signed_state = state.crypto.issue_state(now())?;
    let url = state.manager.provider().authorize_url(&signed_state);

    Ok(Redirect::temporary(&url).into_response())
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    /// Set by Strava when the athlete denies access.
    error: Option<String>,
}

/// GET /auth/callback — Exchange the authorization code and store the first credential.
async fn auth_callback(
    State(state): State<SharedState>,
    Query(q): Query<CallbackQuery>,
) -> Result<Response, ProxyError> {
    if let Some(error) = q.error {
        return Err(ProxyError::BadRequest(format!(
            "authorization was not granted: {error}"
        )));
    }

    let signed_state = q.state.ok_or(ProxyError::InvalidState)?;
    state.crypto.verify_state(&signed_state, now())?;

    let code = q
        .code
        .ok_or_else(|| ProxyError::BadRequest("missing authorization code".into()))?;

    state.manager.complete_authorization(&code).await?;
    info!("Authorization complete; redirecting to dashboard");

    Ok(Redirect::temporary(&state.dashboard_url).into_response())
}

/// GET /auth/refresh — Force a refresh and return the new credential.
async fn auth_refresh(State(state): State<SharedState>) -> Result<Json<Credential>, ProxyError> {
    let credential = state.manager.force_refresh().await?;
    Ok(Json(credential))
}

// =============================================================================
// Data Endpoints
// =============================================================================

/// GET /api/activities — Forward the athlete's activity list.
///
/// A 401 from Strava triggers one refresh and one retry; a second failure is returned as-is.
async fn activities(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ProxyError> {
    let provider = state.manager.provider();
    let token = state.manager.access_token().await?;

    match provider.list_activities(&token).await {
        Ok(body) => Ok(Json(body)),
        Err(e) if e.is_upstream_unauthorized() => {
            warn!("Strava rejected the access token; refreshing and retrying once");
            let token = state.manager.recover_rejected(&token).await?;
            let body = provider.list_activities(&token).await?;
            Ok(Json(body))
        }
        Err(e) => Err(e),
    }
}
