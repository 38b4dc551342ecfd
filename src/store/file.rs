//! JSON-file credential store.
//!
//! The record is written to a sibling temp file and renamed over the target,
//! so readers see either the old record or the new one, never a mix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::CredentialStore;
use crate::credential::Credential;
use crate::crypto::CryptoEngine;
use crate::error::ProxyError;

/// On-disk shape. Token fields are sealed.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
    updated_at: DateTime<Utc>,
}

pub struct FileCredentialStore {
    path: PathBuf,
    crypto: Arc<CryptoEngine>,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>, crypto: Arc<CryptoEngine>) -> Self {
        Self {
            path: path.into(),
            crypto,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "token.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn load(&self) -> Result<Option<Credential>, ProxyError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: StoredRecord = serde_json::from_slice(&raw)?;

        Ok(Some(Credential {
            access_token: self.crypto.open(&record.access_token)?,
            refresh_token: self.crypto.open(&record.refresh_token)?,
            expires_at: record.expires_at,
        }))
    }

    async fn save(&self, credential: &Credential) -> Result<(), ProxyError> {
        let record = StoredRecord {
            access_token: self.crypto.seal(&credential.access_token)?,
            refresh_token: self.crypto.seal(&credential.refresh_token)?,
            expires_at: credential.expires_at,
            updated_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&record)?;

        let _guard = self.write_lock.lock().await;
        let temp = self.temp_path();

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp, &self.path).await?;
        debug!("Credential written to {}", self.path.display());

        Ok(())
    }
}
