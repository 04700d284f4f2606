//! Credential Store (C1, spec §4.1).
//!
//! Persists per-account secrets (OAuth tokens, app passwords) and
//! transparently refreshes expiring OAuth access tokens. Prefers the OS
//! keychain; falls back to a user-scoped file with restrictive permissions.

mod file_store;

use crate::config::AppPaths;
use crate::error::{EngineError, EngineResult};
use crate::oauth::OAuthManager;
use crate::types::CredentialKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use file_store::FileCredentialStore;

/// Safety margin before expiry at which `get` transparently refreshes an
/// OAuth access token (spec §4.1: "within a safety margin (≥ 60 s)").
const REFRESH_SAFETY_MARGIN: Duration = Duration::seconds(60);

/// Deadline for an OAuth refresh exchange (spec §5).
const OAUTH_REFRESH_DEADLINE_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSecret {
    pub secret: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Which secret-storage backend is active on this platform.
enum Backend {
    Keychain { service_prefix: String },
    File(Arc<RwLock<FileCredentialStore>>),
}

/// Persists per-account tokens/app-passwords and refreshes expiring OAuth
/// access tokens.
pub struct CredentialStore {
    backend: Backend,
    oauth: Arc<OAuthManager>,
}

impl CredentialStore {
    /// Try the OS keychain first; fall back to the file store at
    /// `paths.credentials_file()` if the keychain is unavailable on this
    /// platform (spec §4.1: "Prefer OS keychain; fall back to a user-scoped
    /// file under a well-known path").
    pub async fn open(paths: &AppPaths, oauth: Arc<OAuthManager>) -> EngineResult<Self> {
        let service_prefix = "mail-intel-engine".to_string();
        if keyring_available(&service_prefix) {
            Ok(Self {
                backend: Backend::Keychain { service_prefix },
                oauth,
            })
        } else {
            let store = FileCredentialStore::open(paths.credentials_file()).await?;
            Ok(Self {
                backend: Backend::File(Arc::new(RwLock::new(store))),
                oauth,
            })
        }
    }

    fn key(account_id: Uuid, kind: CredentialKind) -> String {
        format!("{account_id}:{}", kind.as_str())
    }

    /// Store a secret. Never logs the secret value.
    pub async fn put(
        &self,
        account_id: Uuid,
        kind: CredentialKind,
        secret: StoredSecret,
    ) -> EngineResult<()> {
        tracing::debug!(%account_id, kind = kind.as_str(), "storing credential");
        let key = Self::key(account_id, kind);
        match &self.backend {
            Backend::Keychain { service_prefix } => {
                let entry = keyring::Entry::new(service_prefix, &key)
                    .map_err(|e| EngineError::other(format!("keychain error: {e}")))?;
                let payload = serde_json::to_string(&secret)?;
                entry
                    .set_password(&payload)
                    .map_err(|e| EngineError::other(format!("keychain error: {e}")))?;
                Ok(())
            }
            Backend::File(store) => store.write().await.put(&key, secret).await,
        }
    }

    /// Retrieve a secret. For an OAuth access token nearing expiry, this
    /// transparently refreshes it first and persists the refreshed value.
    pub async fn get(
        &self,
        account_id: Uuid,
        kind: CredentialKind,
    ) -> EngineResult<Option<String>> {
        let stored = self.read_raw(account_id, kind).await?;
        let Some(stored) = stored else {
            return Ok(None);
        };

        if kind == CredentialKind::OauthAccess {
            if let Some(expires_at) = stored.expires_at {
                if expires_at - Utc::now() < REFRESH_SAFETY_MARGIN {
                    return self.refresh_oauth(account_id).await.map(Some);
                }
            }
        }
        Ok(Some(stored.secret))
    }

    async fn read_raw(
        &self,
        account_id: Uuid,
        kind: CredentialKind,
    ) -> EngineResult<Option<StoredSecret>> {
        let key = Self::key(account_id, kind);
        match &self.backend {
            Backend::Keychain { service_prefix } => {
                let entry = keyring::Entry::new(service_prefix, &key)
                    .map_err(|e| EngineError::other(format!("keychain error: {e}")))?;
                match entry.get_password() {
                    Ok(payload) => Ok(Some(serde_json::from_str(&payload)?)),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(e) => Err(EngineError::other(format!("keychain error: {e}"))),
                }
            }
            Backend::File(store) => Ok(store.read().await.get(&key)),
        }
    }

    pub async fn delete(&self, account_id: Uuid, kind: CredentialKind) -> EngineResult<()> {
        let key = Self::key(account_id, kind);
        match &self.backend {
            Backend::Keychain { service_prefix } => {
                let entry = keyring::Entry::new(service_prefix, &key)
                    .map_err(|e| EngineError::other(format!("keychain error: {e}")))?;
                match entry.delete_password() {
                    Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                    Err(e) => Err(EngineError::other(format!("keychain error: {e}"))),
                }
            }
            Backend::File(store) => store.write().await.delete(&key).await,
        }
    }

    /// Exchange the stored refresh token for a new access token, persist it,
    /// and return the new access token. Surfaces `CredentialExpired` if the
    /// refresh itself fails (spec §4.1).
    pub async fn refresh_oauth(&self, account_id: Uuid) -> EngineResult<String> {
        let refresh_token = self
            .read_raw(account_id, CredentialKind::OauthRefresh)
            .await?
            .ok_or_else(|| EngineError::auth_required(account_id.to_string()))?;

        let refreshed = tokio::time::timeout(
            std::time::Duration::from_secs(OAUTH_REFRESH_DEADLINE_SECS),
            self.oauth.refresh_access_token(&refresh_token.secret),
        )
        .await
        .map_err(|_| EngineError::credential_expired(account_id.to_string(), "refresh timed out"))?
        .map_err(|e| EngineError::credential_expired(account_id.to_string(), e.to_string()))?;

        self.put(
            account_id,
            CredentialKind::OauthAccess,
            StoredSecret {
                secret: refreshed.access_token.clone(),
                expires_at: Some(refreshed.expires_at),
            },
        )
        .await?;

        if let Some(new_refresh) = refreshed.refresh_token {
            self.put(
                account_id,
                CredentialKind::OauthRefresh,
                StoredSecret {
                    secret: new_refresh,
                    expires_at: None,
                },
            )
            .await?;
        }

        tracing::info!(%account_id, "refreshed oauth access token");
        Ok(refreshed.access_token)
    }
}

/// Probe keychain availability once. Most headless/server environments
/// (and CI) have no secret-service/keychain backend; in that case we fall
/// back to the file store rather than failing every credential call.
fn keyring_available(service_prefix: &str) -> bool {
    match keyring::Entry::new(service_prefix, "__probe__") {
        Ok(entry) => {
            let probe = entry.set_password("probe");
            let _ = entry.delete_password();
            probe.is_ok()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::OAuthManager;

    async fn store_with_temp_file() -> (CredentialStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("credentials.json"))
            .await
            .unwrap();
        let oauth = Arc::new(OAuthManager::new());
        (
            CredentialStore {
                backend: Backend::File(Arc::new(RwLock::new(store))),
                oauth,
            },
            dir,
        )
    }

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let (store, _dir) = store_with_temp_file().await;
        let account_id = Uuid::new_v4();
        store
            .put(
                account_id,
                CredentialKind::AppPassword,
                StoredSecret {
                    secret: "hunter2".to_string(),
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        let got = store
            .get(account_id, CredentialKind::AppPassword)
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("hunter2"));

        store
            .delete(account_id, CredentialKind::AppPassword)
            .await
            .unwrap();
        let gone = store
            .get(account_id, CredentialKind::AppPassword)
            .await
            .unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn missing_refresh_token_surfaces_auth_required() {
        let (store, _dir) = store_with_temp_file().await;
        let account_id = Uuid::new_v4();
        let err = store.refresh_oauth(account_id).await.unwrap_err();
        assert!(err.requires_reauth());
    }
}
