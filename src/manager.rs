//! Token lifecycle manager.
//!
//! Owns the read → check → refresh → write sequence for the deployment's
//! single Strava credential. Refreshes are single-flight: a caller that sees
//! an expired token takes `refresh_guard`, re-reads the store, and only calls
//! the upstream if the token is still stale.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialState};
use crate::error::ProxyError;
use crate::providers::UpstreamProvider;
use crate::store::CredentialStore;

fn now() -> i64 {
    Utc::now().timestamp()
}

pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn UpstreamProvider>,
    skew_secs: i64,
    refresh_guard: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn UpstreamProvider>,
        expiry_skew: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            skew_secs: expiry_skew.as_secs() as i64,
            refresh_guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    pub fn provider(&self) -> &dyn UpstreamProvider {
        self.provider.as_ref()
    }

    /// Where the stored credential currently sits.
    pub async fn state(&self) -> Result<CredentialState, ProxyError> {
        let stored = self.store.load().await?;
        Ok(CredentialState::of(stored.as_ref(), now(), self.skew_secs))
    }

    /// Return a usable access token, refreshing first if the stored one has expired.
    pub async fn access_token(&self) -> Result<String, ProxyError> {
        let credential = self.load_required().await?;
        if !credential.is_expired_at(now(), self.skew_secs) {
            return Ok(credential.access_token);
        }

        let _guard = self.refresh_guard.lock().await;

        let credential = self.load_required().await?;
        if !credential.is_expired_at(now(), self.skew_secs) {
            debug!("Credential was refreshed while waiting for the guard");
            return Ok(credential.access_token);
        }

        info!(
            expires_at = credential.expires_at,
            "Access token expired; refreshing"
        );
        let fresh = self.refresh_locked(&credential.refresh_token).await?;
        Ok(fresh.access_token)
    }

    /// Exchange `current_refresh_token` for a new credential and persist it.
    pub async fn refresh(&self, current_refresh_token: &str) -> Result<Credential, ProxyError> {
        let _guard = self.refresh_guard.lock().await;
        self.refresh_locked(current_refresh_token).await
    }

    /// Refresh the stored credential regardless of its expiry.
    pub async fn force_refresh(&self) -> Result<Credential, ProxyError> {
        let _guard = self.refresh_guard.lock().await;
        let credential = self.load_required().await?;
        self.refresh_locked(&credential.refresh_token).await
    }

    /// Recover after the upstream rejected `rejected_access_token`.
    ///
    /// Refreshes only if the store still holds the rejected token; otherwise
    /// another request already replaced it and the stored token is returned.
    pub async fn recover_rejected(&self, rejected_access_token: &str) -> Result<String, ProxyError> {
        let _guard = self.refresh_guard.lock().await;
        let credential = self.load_required().await?;

        if credential.access_token != rejected_access_token {
            debug!("Rejected token already replaced; reusing stored token");
            return Ok(credential.access_token);
        }

        warn!("Upstream rejected the stored access token; forcing a refresh");
        let fresh = self.refresh_locked(&credential.refresh_token).await?;
        Ok(fresh.access_token)
    }

    /// Refresh if the credential expires within `window`. Returns whether a refresh ran.
    pub async fn refresh_if_expiring(&self, window: Duration) -> Result<bool, ProxyError> {
        let window_secs = window.as_secs() as i64;

        let due = |c: &Credential| c.is_expired_at(now(), window_secs.max(self.skew_secs));

        match self.store.load().await? {
            Some(c) if due(&c) => {}
            _ => return Ok(false),
        }

        let _guard = self.refresh_guard.lock().await;
        let credential = match self.store.load().await? {
            Some(c) if due(&c) => c,
            _ => return Ok(false),
        };

        self.refresh_locked(&credential.refresh_token).await?;
        Ok(true)
    }

    /// Exchange an authorization code and persist the first credential.
    pub async fn complete_authorization(&self, code: &str) -> Result<Credential, ProxyError> {
        if code.is_empty() {
            return Err(ProxyError::BadRequest("missing authorization code".into()));
        }

        let grant = self
            .provider
            .exchange_code(code)
            .await
            .map_err(|e| match e {
                ProxyError::ExchangeFailed(_) => e,
                other => ProxyError::ExchangeFailed(other.to_string()),
            })?;

        if let Some(athlete_id) = grant.athlete.as_ref().and_then(|a| a.get("id")) {
            info!(%athlete_id, provider = self.provider.id(), "Authorized athlete");
        }

        let credential = grant
            .into_credential(now())
            .map_err(|reason| ProxyError::ExchangeFailed(reason.into()))?;

        let _guard = self.refresh_guard.lock().await;
        self.store.save(&credential).await?;
        info!(
            expires_at = credential.expires_at,
            backend = self.store.backend(),
            "Stored initial credential"
        );

        Ok(credential)
    }

    /// Persist `credential`, replacing whatever is stored.
    pub async fn save_credential(&self, credential: &Credential) -> Result<(), ProxyError> {
        self.store.save(credential).await
    }

    async fn load_required(&self) -> Result<Credential, ProxyError> {
        self.store.load().await?.ok_or(ProxyError::NotAuthenticated)
    }

    // Caller must hold `refresh_guard`.
    async fn refresh_locked(&self, current_refresh_token: &str) -> Result<Credential, ProxyError> {
        if current_refresh_token.is_empty() {
            return Err(ProxyError::MissingRefreshToken);
        }

        let grant = self
            .provider
            .refresh_token(current_refresh_token)
            .await
            .map_err(|e| match e {
                ProxyError::RefreshFailed(_) => e,
                other => ProxyError::RefreshFailed(other.to_string()),
            })?;

        let credential = grant
            .into_credential(now())
            .map_err(|reason| ProxyError::RefreshFailed(reason.into()))?;

        self.store.save(&credential).await?;
        info!(
            expires_at = credential.expires_at,
            provider = self.provider.id(),
            "Refreshed access token"
        );

        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::TokenGrant;
    use crate::store::MemoryCredentialStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upstream double: answers refreshes with a scripted grant and counts calls.
    struct FakeUpstream {
        next: Option<TokenGrant>,
        refresh_calls: AtomicUsize,
        exchange_calls: AtomicUsize,
        seen_refresh_tokens: std::sync::Mutex<Vec<String>>,
        delay: Duration,
    }

    impl FakeUpstream {
        fn answering(grant: TokenGrant) -> Self {
            Self {
                next: Some(grant),
                refresh_calls: AtomicUsize::new(0),
                exchange_calls: AtomicUsize::new(0),
                seen_refresh_tokens: std::sync::Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            Self {
                next: None,
                ..Self::answering(grant("unused", "unused", 0))
            }
        }

        fn refreshes(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamProvider for FakeUpstream {
        fn id(&self) -> &str {
            "fake"
        }

        fn authorize_url(&self, state: &str) -> String {
            format!("https://upstream.test/authorize?state={state}")
        }

        async fn exchange_code(&self, _code: &str) -> Result<TokenGrant, ProxyError> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            self.next
                .clone()
                .ok_or_else(|| ProxyError::ExchangeFailed("400 Bad Request".into()))
        }

        async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProxyError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_refresh_tokens
                .lock()
                .unwrap()
                .push(refresh_token.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.next
                .clone()
                .ok_or_else(|| ProxyError::RefreshFailed("400 Bad Request".into()))
        }

        async fn list_activities(&self, _token: &str) -> Result<serde_json::Value, ProxyError> {
            Ok(serde_json::json!([]))
        }
    }

    fn grant(access: &str, refresh: &str, expires_at: i64) -> TokenGrant {
        TokenGrant {
            access_token: access.into(),
            refresh_token: Some(refresh.into()),
            token_type: Some("Bearer".into()),
            expires_at: Some(expires_at),
            expires_in: None,
            athlete: None,
        }
    }

    fn manager(
        store: Arc<MemoryCredentialStore>,
        upstream: Arc<FakeUpstream>,
    ) -> TokenManager {
        TokenManager::new(store, upstream, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let stored = Credential::new("A1", "R1", now() + 3600);
        let store = Arc::new(MemoryCredentialStore::with_credential(stored.clone()));
        let upstream = Arc::new(FakeUpstream::failing());
        let manager = manager(store.clone(), upstream.clone());

        assert_eq!(manager.access_token().await.unwrap(), "A1");
        assert_eq!(upstream.refreshes(), 0);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_and_replaced_wholesale() {
        let new_expiry = now() + 3600;
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "A1",
            "R1",
            now() - 10,
        )));
        let upstream = Arc::new(FakeUpstream::answering(grant("A2", "R2", new_expiry)));
        let manager = manager(store.clone(), upstream.clone());

        assert_eq!(manager.access_token().await.unwrap(), "A2");
        assert_eq!(upstream.refreshes(), 1);
        assert_eq!(*upstream.seen_refresh_tokens.lock().unwrap(), vec!["R1"]);
        assert_eq!(
            store.load().await.unwrap(),
            Some(Credential::new("A2", "R2", new_expiry))
        );
    }

    #[tokio::test]
    async fn absent_credential_is_not_authenticated() {
        let store = Arc::new(MemoryCredentialStore::new());
        let upstream = Arc::new(FakeUpstream::failing());
        let manager = manager(store, upstream.clone());

        assert!(matches!(
            manager.access_token().await,
            Err(ProxyError::NotAuthenticated)
        ));
        assert!(matches!(
            manager.force_refresh().await,
            Err(ProxyError::NotAuthenticated)
        ));
        assert_eq!(upstream.refreshes(), 0);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_store_untouched() {
        let stored = Credential::new("A1", "R1", now() - 10);
        let store = Arc::new(MemoryCredentialStore::with_credential(stored.clone()));
        let upstream = Arc::new(FakeUpstream::failing());
        let manager = manager(store.clone(), upstream.clone());

        assert!(matches!(
            manager.access_token().await,
            Err(ProxyError::RefreshFailed(_))
        ));
        assert_eq!(store.load().await.unwrap(), Some(stored));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn incomplete_refresh_response_is_rejected() {
        let stored = Credential::new("A1", "R1", now() - 10);
        let store = Arc::new(MemoryCredentialStore::with_credential(stored.clone()));
        let upstream = Arc::new(FakeUpstream::answering(TokenGrant {
            refresh_token: None,
            ..grant("A2", "", now() + 3600)
        }));
        let manager = manager(store.clone(), upstream);

        assert!(matches!(
            manager.access_token().await,
            Err(ProxyError::RefreshFailed(_))
        ));
        assert_eq!(store.load().await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn empty_refresh_token_never_reaches_upstream() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "A1",
            "",
            now() - 10,
        )));
        let upstream = Arc::new(FakeUpstream::answering(grant("A2", "R2", now() + 3600)));
        let manager = manager(store, upstream.clone());

        assert!(matches!(
            manager.refresh("").await,
            Err(ProxyError::MissingRefreshToken)
        ));
        assert!(matches!(
            manager.access_token().await,
            Err(ProxyError::MissingRefreshToken)
        ));
        assert_eq!(upstream.refreshes(), 0);
    }

    #[tokio::test]
    async fn token_inside_skew_margin_counts_as_expired() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "A1",
            "R1",
            now() + 30,
        )));
        let upstream = Arc::new(FakeUpstream::answering(grant("A2", "R2", now() + 3600)));
        let manager = manager(store, upstream.clone());

        assert_eq!(manager.state().await.unwrap(), CredentialState::Expired);
        assert_eq!(manager.access_token().await.unwrap(), "A2");
        assert_eq!(manager.state().await.unwrap(), CredentialState::Valid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "A1",
            "R1",
            now() - 10,
        )));
        let upstream = Arc::new(FakeUpstream {
            delay: Duration::from_millis(50),
            ..FakeUpstream::answering(grant("A2", "R2", now() + 3600))
        });
        let manager = Arc::new(manager(store.clone(), upstream.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.access_token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "A2");
        }
        assert_eq!(upstream.refreshes(), 1);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn recover_rejected_skips_refresh_when_token_already_rotated() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "A2",
            "R2",
            now() + 3600,
        )));
        let upstream = Arc::new(FakeUpstream::answering(grant("A3", "R3", now() + 7200)));
        let manager = manager(store, upstream.clone());

        assert_eq!(manager.recover_rejected("A1").await.unwrap(), "A2");
        assert_eq!(upstream.refreshes(), 0);

        assert_eq!(manager.recover_rejected("A2").await.unwrap(), "A3");
        assert_eq!(upstream.refreshes(), 1);
    }

    #[tokio::test]
    async fn refresh_if_expiring_respects_window() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "A1",
            "R1",
            now() + 300,
        )));
        let upstream = Arc::new(FakeUpstream::answering(grant("A2", "R2", now() + 21_600)));
        let manager = manager(store, upstream.clone());

        assert!(!manager
            .refresh_if_expiring(Duration::from_secs(120))
            .await
            .unwrap());
        assert!(manager
            .refresh_if_expiring(Duration::from_secs(600))
            .await
            .unwrap());
        assert_eq!(upstream.refreshes(), 1);
    }

    #[tokio::test]
    async fn refresh_if_expiring_ignores_absent_credential() {
        let manager = manager(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(FakeUpstream::failing()),
        );
        assert!(!manager
            .refresh_if_expiring(Duration::from_secs(600))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn authorization_code_creates_first_credential() {
        let store = Arc::new(MemoryCredentialStore::new());
        let expiry = now() + 21_600;
        let upstream = Arc::new(FakeUpstream::answering(TokenGrant {
            athlete: Some(serde_json::json!({ "id": 134815 })),
            ..grant("A1", "R1", expiry)
        }));
        let manager = manager(store.clone(), upstream.clone());

        assert_eq!(manager.state().await.unwrap(), CredentialState::Absent);
        let created = manager.complete_authorization("code-123").await.unwrap();

        assert_eq!(created, Credential::new("A1", "R1", expiry));
        assert_eq!(store.load().await.unwrap(), Some(created));
        assert_eq!(upstream.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_authorization_code_stores_nothing() {
        let store = Arc::new(MemoryCredentialStore::new());
        let manager = manager(store.clone(), Arc::new(FakeUpstream::failing()));

        assert!(matches!(
            manager.complete_authorization("bad").await,
            Err(ProxyError::ExchangeFailed(_))
        ));
        assert!(matches!(
            manager.complete_authorization("").await,
            Err(ProxyError::BadRequest(_))
        ));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_credential_twice_matches_once() {
        let store = Arc::new(MemoryCredentialStore::new());
        let manager = manager(store.clone(), Arc::new(FakeUpstream::failing()));
        let c = Credential::new("A1", "R1", now() + 3600);

        manager.save_credential(&c).await.unwrap();
        let once = store.load().await.unwrap();
        manager.save_credential(&c).await.unwrap();

        assert_eq!(store.load().await.unwrap(), once);
    }
}
