//! Background token refresh daemon.
//!
//! Wakes every `refresh_interval` and refreshes the credential when it
//! expires within `refresh_window`. Request-time refresh still covers
//! whatever the daemon misses.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::manager::TokenManager;

/// Start the refresh daemon loop. Returns immediately when `interval` is zero.
pub async fn refresh_daemon(manager: Arc<TokenManager>, interval: Duration, window: Duration) {
    if interval.is_zero() {
        info!("Token refresh daemon disabled");
        return;
    }

    info!(
        "Token refresh daemon started (interval: {}s, window: {}s)",
        interval.as_secs(),
        window.as_secs()
    );

    let mut ticker = tokio::time::interval(interval);
    // First tick fires immediately; skip it so startup doesn't race the first request.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match manager.refresh_if_expiring(window).await {
            Ok(true) => info!("Proactively refreshed Strava credential"),
            Ok(false) => {}
            Err(e) => error!("Refresh cycle error: {e}"),
        }
    }
}
