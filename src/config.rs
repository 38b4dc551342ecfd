use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Where the credential record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Single-row Postgres table.
    Postgres { database_url: String },
    /// Single JSON file on disk.
    File { path: PathBuf },
}

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    pub base_url: String,
    /// Dashboard frontend URL for post-OAuth redirects
    pub dashboard_url: String,

    // ── Storage ─────────────────────────────────────────────────────────
    pub storage: StorageBackend,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM token sealing.
    pub master_key: String,
    /// 32-byte base64-encoded HMAC key for state parameter signing.
    pub hmac_secret: String,

    // ── Strava ──────────────────────────────────────────────────────────
    pub strava: StravaConfig,

    // ── Token lifecycle ─────────────────────────────────────────────────
    /// Tokens expiring within this margin are treated as already expired.
    pub expiry_skew: Duration,
    /// How often the refresh daemon wakes up. Zero disables it.
    pub refresh_interval: Duration,
    /// Lookahead window for proactive refreshes.
    pub refresh_window: Duration,
}

/// OAuth client registration and endpoint URLs for Strava.
#[derive(Debug, Clone)]
pub struct StravaConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_url: String,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:5000".into());

        let storage = match std::env::var("DATABASE_URL") {
            Ok(database_url) if !database_url.is_empty() => {
                StorageBackend::Postgres { database_url }
            }
            _ => StorageBackend::File {
                path: std::env::var("TOKEN_FILE")
                    .unwrap_or_else(|_| "./token.json".into())
                    .into(),
            },
        };

        let strava = StravaConfig {
            client_id: std::env::var("STRAVA_CLIENT_ID")
                .context("STRAVA_CLIENT_ID is required")?,
            client_secret: std::env::var("STRAVA_CLIENT_SECRET")
                .context("STRAVA_CLIENT_SECRET is required")?,
            redirect_uri: std::env::var("STRAVA_REDIRECT_URI")
                .unwrap_or_else(|_| format!("{base_url}/auth/callback")),
            scope: std::env::var("STRAVA_SCOPE")
                .unwrap_or_else(|_| "read,activity:read_all".into()),
            authorize_url: std::env::var("STRAVA_AUTHORIZE_URL")
                .unwrap_or_else(|_| "https://www.strava.com/oauth/authorize".into()),
            token_url: std::env::var("STRAVA_TOKEN_URL")
                .unwrap_or_else(|_| "https://www.strava.com/oauth/token".into()),
            api_url: std::env::var("STRAVA_API_URL")
                .unwrap_or_else(|_| "https://www.strava.com/api/v3".into()),
            timeout: secs_var("UPSTREAM_TIMEOUT_SECS", 30)?,
        };

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".into())
                .parse()
                .context("Invalid PORT")?,
            dashboard_url: std::env::var("DASHBOARD_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            base_url,

            storage,

            master_key: std::env::var("MASTER_KEY")
                .context("MASTER_KEY is required (32 bytes, base64)")?,
            hmac_secret: std::env::var("HMAC_SECRET")
                .context("HMAC_SECRET is required (32 bytes, base64)")?,

            strava,

            expiry_skew: secs_var("EXPIRY_SKEW_SECS", 60)?,
            refresh_interval: secs_var("REFRESH_INTERVAL_SECS", 300)?,
            refresh_window: secs_var("REFRESH_WINDOW_SECS", 600)?,
        })
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    let secs = match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("Invalid {name}: expected whole seconds"))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}
