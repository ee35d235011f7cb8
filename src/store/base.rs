use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{file_store::FileTokenStore, memory_store::MemoryTokenStore};
use crate::config::StoreConfig;
use crate::models::{TokenKind, TokenPair};

/// The TokenStore trait abstracts persistence of the access/refresh pair.
///
/// Implementations do no validation of token content. `get` never fails: a
/// missing key, or a backend that cannot be read, is reported as absent.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, kind: TokenKind) -> Option<String>;
    /// Replace both tokens.
    async fn set(&self, pair: &TokenPair) -> Result<(), String>;
    /// Replace the access token only, keeping the stored refresh token.
    async fn set_access(&self, access: &str) -> Result<(), String>;
    async fn clear(&self) -> Result<(), String>;
    fn get_name(&self) -> &str;
}

/// Creates a concrete store implementation based on the StoreConfig.
pub fn create_store(config: &StoreConfig) -> Arc<dyn TokenStore> {
    match config {
        StoreConfig::File(file_config) => {
            info!(path = file_config.path.as_str(), "Using file token store");
            Arc::new(FileTokenStore::new(&file_config.path))
        }
        StoreConfig::Memory => {
            info!("Using in-memory token store; tokens will not survive a restart");
            Arc::new(MemoryTokenStore::new())
        }
    }
}
