use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::TokenStore;
use crate::models::{TokenKind, TokenPair};

/// Persists the two tokens as a small JSON object keyed by the fixed
/// storage names, so a restart picks the session back up.
pub struct FileTokenStore {
    path: PathBuf,
    // Serialises read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileTokenStore {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_document(&self) -> Result<HashMap<String, String>, String> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| format!("token file {} is corrupt: {}", self.path.display(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(format!("failed to read {}: {}", self.path.display(), e)),
        }
    }

    async fn write_document(&self, doc: &HashMap<String, String>) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
            }
        }
        let bytes = serde_json::to_vec(doc).map_err(|e| e.to_string())?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| format!("failed to write {}: {}", tmp.display(), e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| format!("failed to replace {}: {}", self.path.display(), e))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self, kind: TokenKind) -> Option<String> {
        match self.read_document().await {
            Ok(mut doc) => doc.remove(kind.key()),
            Err(e) => {
                warn!("Treating unreadable token file as empty: {}", e);
                None
            }
        }
    }

    async fn set(&self, pair: &TokenPair) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        let doc = HashMap::from([
            (TokenKind::Access.key().to_string(), pair.access.clone()),
            (TokenKind::Refresh.key().to_string(), pair.refresh.clone()),
        ]);
        self.write_document(&doc).await?;
        debug!(path = %self.path.display(), "Stored token pair");
        Ok(())
    }

    async fn set_access(&self, access: &str) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        if !doc.contains_key(TokenKind::Refresh.key()) {
            return Err("cannot store an access token without a refresh token".into());
        }
        doc.insert(TokenKind::Access.key().to_string(), access.to_string());
        self.write_document(&doc).await
    }

    async fn clear(&self) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("failed to remove {}: {}", self.path.display(), e)),
        }
    }

    fn get_name(&self) -> &str {
        "file"
    }
}
