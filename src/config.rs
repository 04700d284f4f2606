//! Application-data path resolution and user-tunable settings (spec §6, §9).

use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Resolves the single application-data directory used by every component.
/// The same resolution must be used by the metadata DB, the vector DB and
/// the LLM model cache to avoid split-brain state (spec §8, "Path Agreement").
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// Resolve the platform-appropriate application-data directory.
    pub fn resolve() -> EngineResult<Self> {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| crate::error::EngineError::other("could not resolve a data directory"))?;
        Ok(Self::at(base.join("mail-intel-engine")))
    }

    /// Root a new `AppPaths` at an explicit directory (used by tests).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.db_dir().join("messages.sqlite")
    }

    pub fn vector_db_path(&self) -> PathBuf {
        self.db_dir().join("vectors.sqlite")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.root.join("credentials.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Create every directory this engine writes into.
    pub async fn ensure_dirs(&self) -> EngineResult<()> {
        tokio::fs::create_dir_all(self.db_dir()).await?;
        tokio::fs::create_dir_all(self.models_dir()).await?;
        Ok(())
    }
}

/// User-tunable options, persisted at `settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Whether the local cache (bodies, embeddings) may be retained at all.
    pub cache_enabled: bool,
    /// Messages older than this many days are eligible for retention pruning.
    /// Also bounds the incremental "auto-sync on start" pass (spec §9).
    pub retention_days: u32,
    /// Max messages fetched by an incremental auto-sync pass on startup.
    pub auto_sync_max_messages: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            retention_days: 90,
            auto_sync_max_messages: 200,
        }
    }
}

impl Settings {
    pub async fn load_or_default(path: &Path) -> EngineResult<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> EngineResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

/// Initialize the process-wide tracing subscriber. Safe to call more than
/// once; only the first call takes effect.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_agree_across_components() {
        let paths = AppPaths::at("/tmp/mail-intel-engine-test");
        assert_eq!(
            paths.metadata_db_path().parent(),
            paths.vector_db_path().parent()
        );
        assert!(paths.models_dir().starts_with(paths.root()));
    }

    #[tokio::test]
    async fn settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut s = Settings::default();
        s.retention_days = 30;
        s.save(&path).await.unwrap();
        let loaded = Settings::load_or_default(&path).await.unwrap();
        assert_eq!(loaded.retention_days, 30);
    }

    #[tokio::test]
    async fn settings_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded = Settings::load_or_default(&path).await.unwrap();
        assert_eq!(loaded.retention_days, Settings::default().retention_days);
    }
}
