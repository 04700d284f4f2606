//! User-scoped file fallback for the credential store, used when no OS
//! keychain is available (spec §4.1, §6).

use super::StoredSecret;
use crate::error::EngineResult;
use std::collections::HashMap;
use std::path::PathBuf;

/// A flat JSON document of `key -> secret`, written with `0600` permissions
/// on Unix. `key` is `{account_id}:{kind}`.
pub struct FileCredentialStore {
    path: PathBuf,
    entries: HashMap<String, StoredSecret>,
}

impl FileCredentialStore {
    pub async fn open(path: PathBuf) -> EngineResult<Self> {
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            Ok(_) => HashMap::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries })
    }

    pub fn get(&self, key: &str) -> Option<StoredSecret> {
        self.entries.get(key).cloned()
    }

    pub async fn put(&mut self, key: &str, secret: StoredSecret) -> EngineResult<()> {
        self.entries.insert(key.to_string(), secret);
        self.flush().await
    }

    pub async fn delete(&mut self, key: &str) -> EngineResult<()> {
        self.entries.remove(key);
        self.flush().await
    }

    async fn flush(&self) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(&self.entries)?;
        tokio::fs::write(&self.path, bytes).await?;
        restrict_permissions(&self.path).await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &std::path::Path) -> EngineResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &std::path::Path) -> EngineResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let mut store = FileCredentialStore::open(path.clone()).await.unwrap();
        store
            .put(
                "acct:app_password",
                StoredSecret {
                    secret: "s3cret".to_string(),
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        let reopened = FileCredentialStore::open(path).await.unwrap();
        assert_eq!(
            reopened.get("acct:app_password").unwrap().secret,
            "s3cret"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let mut store = FileCredentialStore::open(path.clone()).await.unwrap();
        store
            .put(
                "acct:app_password",
                StoredSecret {
                    secret: "s3cret".to_string(),
                    expires_at: None,
                },
            )
            .await
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
