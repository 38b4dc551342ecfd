//! PostgreSQL-backed credential store.
//!
//! Table `strava_credentials` holds at most one row, pinned to `id = 1`.
//! Tokens are sealed with the [`CryptoEngine`] before they reach the database.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::CredentialStore;
use crate::credential::Credential;
use crate::crypto::CryptoEngine;
use crate::error::ProxyError;

/// Credential store backed by PostgreSQL.
pub struct PgCredentialStore {
    pool: PgPool,
    crypto: Arc<CryptoEngine>,
}

impl PgCredentialStore {
    pub async fn connect(db_url: &str, crypto: Arc<CryptoEngine>) -> Result<Self, ProxyError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .map_err(|e| ProxyError::Storage(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self::with_pool(pool, crypto))
    }

    pub fn with_pool(pool: PgPool, crypto: Arc<CryptoEngine>) -> Self {
        Self { pool, crypto }
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), ProxyError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strava_credentials (
                id              SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
                access_token    TEXT NOT NULL,
                refresh_token   TEXT NOT NULL,
                expires_at      BIGINT NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn load(&self) -> Result<Option<Credential>, ProxyError> {
        let row = sqlx::query(
            "SELECT access_token, refresh_token, expires_at FROM strava_credentials WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let sealed_access: String = row.try_get(0)?;
        let sealed_refresh: String = row.try_get(1)?;
        let expires_at: i64 = row.try_get(2)?;

        Ok(Some(Credential {
            access_token: self.crypto.open(&sealed_access)?,
            refresh_token: self.crypto.open(&sealed_refresh)?,
            expires_at,
        }))
    }

    async fn save(&self, credential: &Credential) -> Result<(), ProxyError> {
        let sealed_access = self.crypto.seal(&credential.access_token)?;
        let sealed_refresh = self.crypto.seal(&credential.refresh_token)?;

        sqlx::query(
            r#"
            INSERT INTO strava_credentials (id, access_token, refresh_token, expires_at)
            VALUES (1, $1, $2, $3)
            ON CONFLICT (id)
            DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(&sealed_access)
        .bind(&sealed_refresh)
        .bind(credential.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
