//! Credential storage — one record per deployment, replaced wholesale.
//!
//! Backends:
//! - `db`: single-row PostgreSQL table (when `DATABASE_URL` is set)
//! - `file`: single JSON file, written via temp-file + rename
//! - `memory`: process-local, for tests and throwaway runs

pub mod db;
pub mod file;
pub mod memory;
pub mod refresh;

pub use db::PgCredentialStore;
pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
pub use refresh::refresh_daemon;

use async_trait::async_trait;

use crate::credential::Credential;
use crate::error::ProxyError;

/// Durable home of the deployment's single [`Credential`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Short backend name for logs and `/status`.
    fn backend(&self) -> &'static str;

    /// Read the current credential, `None` if none was ever saved.
    async fn load(&self) -> Result<Option<Credential>, ProxyError>;

    /// Create-or-replace all three fields in one atomic step.
    async fn save(&self, credential: &Credential) -> Result<(), ProxyError>;
}
