//! In-Memory Credential Store
//!
//! Holds the single credential the gateway attaches to protected requests.
//!
//! ## Concurrency
//!
//! The credential lives behind a `tokio::sync::RwLock`, so a reader sees
//! either the previous or the next credential, never a partial write. Clones
//! of a `TokenStore` share the same slot.
//!
//! ## Example
//!
//! ```
//! use core_auth::{Credential, TokenStore};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = TokenStore::new();
//! assert!(store.is_empty().await);
//!
//! store.set(Credential::new("T1")).await;
//! assert_eq!(store.get().await.map(|c| c.token().to_string()), Some("T1".to_string()));
//!
//! store.clear().await;
//! assert!(store.get().await.is_none());
//! # }
//! ```

use crate::types::Credential;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Shared holder of the current credential.
///
/// Created empty at session start, populated by sign-in or refresh, and
/// cleared on sign-out or when a refresh is denied.
#[derive(Clone, Default)]
pub struct TokenStore {
    credential: Arc<RwLock<Option<Credential>>>,
}

impl TokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        debug!("Initializing TokenStore");
        Self::default()
    }

    /// Create a store that already holds `credential`
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Arc::new(RwLock::new(Some(credential))),
        }
    }

    /// Snapshot of the current credential, if any.
    pub async fn get(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    /// Replace the current credential.
    pub async fn set(&self, credential: Credential) {
        let expires_at = credential.expires_at();
        let previous = self.credential.write().await.replace(credential);

        info!(
            replaced = previous.is_some(),
            expires_at = ?expires_at,
            "Credential stored"
        );
    }

    /// Remove the current credential.
    ///
    /// Returns whether a credential was present.
    pub async fn clear(&self) -> bool {
        let removed = self.credential.write().await.take().is_some();
        if removed {
            info!("Credential cleared");
        } else {
            debug!("Clear requested on empty credential store");
        }
        removed
    }

    pub async fn is_empty(&self) -> bool {
        self.credential.read().await.is_none()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let populated = self
            .credential
            .try_read()
            .map(|guard| guard.is_some().to_string())
            .unwrap_or_else(|_| "locked".to_string());
        f.debug_struct("TokenStore")
            .field("populated", &populated)
            .finish()
    }
}
