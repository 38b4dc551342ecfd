use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use strava_token_proxy::config::{Config, StorageBackend};
use strava_token_proxy::crypto::CryptoEngine;
use strava_token_proxy::providers::StravaProvider;
use strava_token_proxy::store::{self, CredentialStore, FileCredentialStore, PgCredentialStore};
use strava_token_proxy::{api, AppState, SharedState, TokenManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strava_token_proxy=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("strava-token-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    let crypto = Arc::new(CryptoEngine::new(&config.master_key, &config.hmac_secret)?);

    let credential_store: Arc<dyn CredentialStore> = match &config.storage {
        StorageBackend::Postgres { database_url } => {
            let pg = PgCredentialStore::connect(database_url, crypto.clone()).await?;
            pg.migrate().await?;
            info!("Database connected and migrated ✓");
            Arc::new(pg)
        }
        StorageBackend::File { path } => {
            info!("Storing credential in {}", path.display());
            Arc::new(FileCredentialStore::new(path.clone(), crypto.clone()))
        }
    };

    let provider = Arc::new(StravaProvider::new(&config.strava)?);
    let manager = Arc::new(TokenManager::new(credential_store, provider, config.expiry_skew));
    info!("Credential state at startup: {}", manager.state().await?);

    let daemon_manager = manager.clone();
    let (interval, window) = (config.refresh_interval, config.refresh_window);
    tokio::spawn(async move {
        store::refresh_daemon(daemon_manager, interval, window).await;
    });

    let state: SharedState = Arc::new(AppState {
        manager,
        crypto,
        dashboard_url: config.dashboard_url.clone(),
    });

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
