pub mod api;
pub mod config;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod manager;
pub mod providers;
pub mod store;

pub use config::Config;
pub use credential::{Credential, CredentialState};
pub use error::ProxyError;
pub use manager::TokenManager;

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub manager: Arc<TokenManager>,
    pub crypto: Arc<crypto::CryptoEngine>,
    /// Where the browser lands after a successful authorization.
    pub dashboard_url: String,
}

pub type SharedState = Arc<AppState>;
