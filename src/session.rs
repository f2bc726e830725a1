//! Session credential management
//!
//! Keeps one valid provider session token available across evaluation
//! cycles. The token lives in a durable cache; each cycle reads it, checks
//! it against the provider, and replaces it when it has gone stale. A broken
//! validity check is treated as an invalid token (fail closed) so a flaky
//! whoami endpoint can never permanently block delivery.
//!
//! Concurrent cycles may race on replacement: a cycle can briefly use a
//! token that a sibling is about to replace. That inconsistency window is
//! tolerated; the cache is not locked across the check.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::provider::AuthApi;

/// Cached provider credential
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCredentials {
    pub auth_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl SessionCredentials {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            refresh_token: None,
        }
    }
}

/// Durable key-value cache for the session credential
///
/// `replace` has delete-then-set semantics: a successful call leaves no
/// partial or mixed state behind.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<SessionCredentials>>;
    async fn replace(&self, creds: &SessionCredentials) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// File-backed session cache
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<SessionCredentials>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Store(format!("Failed to read session cache: {}", e)))?;
        let creds = serde_json::from_str(&data)
            .map_err(|e| Error::Store(format!("Failed to parse session cache: {}", e)))?;
        Ok(Some(creds))
    }

    async fn replace(&self, creds: &SessionCredentials) -> Result<()> {
        if self.path.exists() {
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(|e| Error::Store(format!("Failed to delete stale session: {}", e)))?;
        }
        let data = serde_json::to_string_pretty(creds)?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| Error::Store(format!("Failed to write session cache: {}", e)))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if self.path.exists() {
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(|e| Error::Store(format!("Failed to clear session cache: {}", e)))?;
        }
        Ok(())
    }
}

/// In-memory session cache for tests and ephemeral runs
#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<Option<SessionCredentials>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<SessionCredentials>> {
        Ok(self.inner.read().await.clone())
    }

    async fn replace(&self, creds: &SessionCredentials) -> Result<()> {
        let mut guard = self.inner.write().await;
        *guard = None;
        *guard = Some(creds.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.inner.write().await = None;
        Ok(())
    }
}

/// Keeps a valid upstream session token available
pub struct SessionTokenManager {
    store: Arc<dyn SessionStore>,
    auth: Arc<dyn AuthApi>,
}

impl SessionTokenManager {
    pub fn new(store: Arc<dyn SessionStore>, auth: Arc<dyn AuthApi>) -> Self {
        Self { store, auth }
    }

    /// Return a token the provider currently accepts
    ///
    /// Cache hit -> whoami check -> refresh -> fresh login, in that order.
    /// Fails with `AuthUnavailable` only when every path is exhausted.
    pub async fn get_valid_token(&self) -> Result<String> {
        let cached = match self.store.load().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Session cache unreadable, treating as empty");
                None
            }
        };

        let cached = match cached {
            Some(creds) => creds,
            None => {
                debug!("No cached session token");
                return self.login_and_persist().await;
            }
        };

        match self.auth.check_token(&cached.auth_token).await {
            Ok(true) => {
                debug!("Cached session token is valid");
                return Ok(cached.auth_token);
            }
            Ok(false) => {
                info!("Cached session token rejected by provider");
            }
            Err(e) => {
                // Fail closed: an unreachable whoami endpoint must force
                // re-auth rather than block the cycle
                warn!(error = %e, "Session validity check failed, re-authenticating");
            }
        }

        if let Some(refresh_token) = &cached.refresh_token {
            match self.auth.refresh(refresh_token).await {
                Ok(Some(token)) => {
                    info!("Session token refreshed");
                    self.persist(&SessionCredentials {
                        auth_token: token.clone(),
                        refresh_token: cached.refresh_token.clone(),
                    })
                    .await;
                    return Ok(token);
                }
                Ok(None) => debug!("Provider does not support token refresh"),
                Err(e) => warn!(error = %e, "Token refresh failed"),
            }
        }

        self.login_and_persist().await
    }

    async fn login_and_persist(&self) -> Result<String> {
        let token = self
            .auth
            .login()
            .await
            .map_err(|e| Error::AuthUnavailable(e.to_string()))?;

        info!("Fresh session token obtained via login");
        self.persist(&SessionCredentials::new(token.clone())).await;

        Ok(token)
    }

    async fn persist(&self, creds: &SessionCredentials) {
        // Best effort: a cache write failure must not discard a good token
        if let Err(e) = self.store.replace(creds).await {
            warn!(error = %e, "Failed to persist session token");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scriptable auth backend counting calls per endpoint
    #[derive(Default)]
    struct ScriptedAuth {
        login_calls: AtomicU32,
        check_calls: AtomicU32,
        check_result: Option<bool>, // None = network error
        login_fails: bool,
        refresh_token: Option<String>,
    }

    #[async_trait]
    impl AuthApi for ScriptedAuth {
        async fn login(&self) -> Result<String> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            if self.login_fails {
                Err(Error::LoginRejected("bad password".into()))
            } else {
                Ok("fresh-token".to_string())
            }
        }

        async fn check_token(&self, _token: &str) -> Result<bool> {
            self.check_calls.fetch_add(1, Ordering::SeqCst);
            match self.check_result {
                Some(valid) => Ok(valid),
                None => Err(Error::UpstreamFetch("whoami unreachable".into())),
            }
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<Option<String>> {
            Ok(self.refresh_token.clone())
        }
    }

    #[tokio::test]
    async fn test_cache_miss_performs_single_login_and_persists() {
        let store = Arc::new(MemorySessionStore::default());
        let auth = Arc::new(ScriptedAuth::default());
        let manager = SessionTokenManager::new(store.clone(), auth.clone());

        let token = manager.get_valid_token().await.unwrap();

        assert_eq!(token, "fresh-token");
        assert_eq!(auth.login_calls.load(Ordering::SeqCst), 1);
        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.auth_token, "fresh-token");
    }

    #[tokio::test]
    async fn test_valid_cached_token_skips_login() {
        let store = Arc::new(MemorySessionStore::default());
        store
            .replace(&SessionCredentials::new("cached-token"))
            .await
            .unwrap();
        let auth = Arc::new(ScriptedAuth {
            check_result: Some(true),
            ..Default::default()
        });
        let manager = SessionTokenManager::new(store, auth.clone());

        let token = manager.get_valid_token().await.unwrap();

        assert_eq!(token, "cached-token");
        assert_eq!(auth.login_calls.load(Ordering::SeqCst), 0);
        assert_eq!(auth.check_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_cached_token_falls_back_to_login() {
        let store = Arc::new(MemorySessionStore::default());
        store
            .replace(&SessionCredentials::new("stale-token"))
            .await
            .unwrap();
        let auth = Arc::new(ScriptedAuth {
            check_result: Some(false),
            ..Default::default()
        });
        let manager = SessionTokenManager::new(store.clone(), auth.clone());

        let token = manager.get_valid_token().await.unwrap();

        assert_eq!(token, "fresh-token");
        assert_eq!(auth.login_calls.load(Ordering::SeqCst), 1);
        // Stale value replaced, not merged
        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.auth_token, "fresh-token");
    }

    #[tokio::test]
    async fn test_check_network_error_fails_closed() {
        let store = Arc::new(MemorySessionStore::default());
        store
            .replace(&SessionCredentials::new("unverifiable-token"))
            .await
            .unwrap();
        let auth = Arc::new(ScriptedAuth {
            check_result: None, // whoami unreachable
            ..Default::default()
        });
        let manager = SessionTokenManager::new(store, auth.clone());

        let token = manager.get_valid_token().await.unwrap();

        // Re-authenticated instead of trusting the unverifiable token
        assert_eq!(token, "fresh-token");
        assert_eq!(auth.login_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_used_before_login() {
        let store = Arc::new(MemorySessionStore::default());
        store
            .replace(&SessionCredentials {
                auth_token: "stale-token".to_string(),
                refresh_token: Some("refresh-me".to_string()),
            })
            .await
            .unwrap();
        let auth = Arc::new(ScriptedAuth {
            check_result: Some(false),
            refresh_token: Some("refreshed-token".to_string()),
            ..Default::default()
        });
        let manager = SessionTokenManager::new(store.clone(), auth.clone());

        let token = manager.get_valid_token().await.unwrap();

        assert_eq!(token, "refreshed-token");
        assert_eq!(auth.login_calls.load(Ordering::SeqCst), 0);
        // Refresh token survives the replacement
        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-me"));
    }

    #[tokio::test]
    async fn test_everything_failing_reports_auth_unavailable() {
        let store = Arc::new(MemorySessionStore::default());
        let auth = Arc::new(ScriptedAuth {
            login_fails: true,
            ..Default::default()
        });
        let manager = SessionTokenManager::new(store, auth);

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, Error::AuthUnavailable(_)));
    }

    #[tokio::test]
    async fn test_file_store_replace_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));

        assert!(store.load().await.unwrap().is_none());

        store
            .replace(&SessionCredentials::new("persisted"))
            .await
            .unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.auth_token, "persisted");

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
