//! HTTP front door.
//!
//! - `/`, `/status`   — liveness and credential state
//! - `/auth/*`        — login redirect, OAuth callback, forced refresh
//! - `/api/activities` — forwarded Strava activity list

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::app_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
