use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::CredentialStore;
use crate::credential::Credential;
use crate::error::ProxyError;

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Option<Credential>>,
    writes: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a credential already in place.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful `save` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<Option<Credential>, ProxyError> {
        Ok(self.credential.read().await.clone())
    }

    async fn save(&self, credential: &Credential) -> Result<(), ProxyError> {
        *self.credential.write().await = Some(credential.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
