use async_trait::async_trait;
use tokio::sync::RwLock;

use super::TokenStore;
use crate::models::{TokenKind, TokenPair};

/// A volatile store. Useful for tests and for one-shot runs where nothing
/// should be written to disk.
pub struct MemoryTokenStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        MemoryTokenStore {
            tokens: RwLock::new(None),
        }
    }

    /// A store that starts out holding `pair`.
    pub fn with_tokens(pair: TokenPair) -> Self {
        MemoryTokenStore {
            tokens: RwLock::new(Some(pair)),
        }
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, kind: TokenKind) -> Option<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|pair| pair.get(kind).to_string())
    }

    async fn set(&self, pair: &TokenPair) -> Result<(), String> {
        *self.tokens.write().await = Some(pair.clone());
        Ok(())
    }

    async fn set_access(&self, access: &str) -> Result<(), String> {
        let mut tokens = self.tokens.write().await;
        match tokens.as_mut() {
            Some(pair) => {
                pair.access = access.to_string();
                Ok(())
            }
            None => Err("cannot store an access token without a refresh token".into()),
        }
    }

    async fn clear(&self) -> Result<(), String> {
        *self.tokens.write().await = None;
        Ok(())
    }

    fn get_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_keys_are_absent() {
        let store = MemoryTokenStore::new();
        assert!(store.get(TokenKind::Access).await.is_none());
        assert!(store.get(TokenKind::Refresh).await.is_none());
    }

    #[tokio::test]
    async fn set_access_keeps_refresh() {
        let store = MemoryTokenStore::with_tokens(TokenPair::new("a1", "r1"));
        store.set_access("a2").await.unwrap();
        assert_eq!(store.get(TokenKind::Access).await.as_deref(), Some("a2"));
        assert_eq!(store.get(TokenKind::Refresh).await.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn set_access_without_pair_is_refused() {
        let store = MemoryTokenStore::new();
        assert!(store.set_access("a").await.is_err());
        assert!(store.get(TokenKind::Access).await.is_none());
    }

    #[tokio::test]
    async fn clear_removes_both() {
        let store = MemoryTokenStore::with_tokens(TokenPair::new("a", "r"));
        store.clear().await.unwrap();
        assert!(store.get(TokenKind::Access).await.is_none());
        assert!(store.get(TokenKind::Refresh).await.is_none());
    }
}
