//! Secure keystore for credentials, session secrets and flags.
//!
//! The core only sees the [`SecureStore`] trait; the mobile shell
//! provides a platform keychain implementation. [`SledStore`] is the
//! durable on-disk implementation used by tooling and tests that need
//! restart survival; [`MemoryStore`] backs unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::types::OwnerCredential;

/// Namespaced keys used in the secure store. The version suffix is
/// part of the key; migrations write a new suffix and leave old data
/// in place for rollback.
pub mod keys {
    /// Prefix owned by this app inside the platform store.
    pub const NAMESPACE: &str = "starkclaw.";
    /// Owner credential (JSON).
    pub const OWNER: &str = "starkclaw.wallet.v1";
    /// Session credential index (JSON list).
    pub const SESSION_INDEX: &str = "starkclaw.session_keys.v1";
    /// Feature flag map (JSON).
    pub const FEATURE_FLAGS: &str = "starkclaw.feature_flags.v1";
    /// Bounded activity log (JSON list).
    pub const ACTIVITY: &str = "starkclaw.activity.v1";
    /// Remote signer credentials.
    pub const REMOTE_CLIENT_ID: &str = "starkclaw.remote_signer.client_id.v1";
    pub const REMOTE_HMAC_SECRET: &str = "starkclaw.remote_signer.hmac_secret.v1";
    pub const REMOTE_KEY_ID: &str = "starkclaw.remote_signer.key_id.v1";

    /// Per-session private key slot, keyed by the session public key.
    pub fn session_secret(public_key: &str) -> String {
        format!("starkclaw.session_pk.{public_key}")
    }
}

/// Platform-backed secret storage.
///
/// `get` never fails on a missing key: it returns `Ok(None)`.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;
    async fn delete(&self, key: &str) -> Result<(), CoreError>;
    /// Enumerate stored keys under a prefix. Used by reset.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoreError>;
}

/// In-memory store for tests and the demo shell.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.inner.lock().expect("store lock").get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.inner
            .lock()
            .expect("store lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.inner.lock().expect("store lock").remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        Ok(self
            .inner
            .lock()
            .expect("store lock")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Durable sled-backed store.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let db = sled::open(path.as_ref())
            .map_err(|e| CoreError::Unavailable(format!("keystore open failed: {e}")))?;
        debug!("opened keystore at {:?}", path.as_ref());
        Ok(Self { db })
    }
}

#[async_trait]
impl SecureStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| CoreError::Unavailable(format!("keystore read failed: {e}")))?;
        match value {
            Some(bytes) => Ok(Some(String::from_utf8(bytes.to_vec()).map_err(|_| {
                CoreError::Internal(format!("non-utf8 value under key {key}"))
            })?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.db
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| CoreError::Unavailable(format!("keystore write failed: {e}")))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| CoreError::Unavailable(format!("keystore flush failed: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| CoreError::Unavailable(format!("keystore delete failed: {e}")))?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) =
                entry.map_err(|e| CoreError::Unavailable(format!("keystore scan failed: {e}")))?;
            if let Ok(key) = String::from_utf8(key.to_vec()) {
                out.push(key);
            }
        }
        Ok(out)
    }
}

/// Load the owner credential, if one has been created on this device.
pub async fn load_owner(store: &dyn SecureStore) -> Result<Option<OwnerCredential>, CoreError> {
    match store.get(keys::OWNER).await? {
        Some(json) => Ok(Some(serde_json::from_str(&json).map_err(|e| {
            CoreError::Internal(format!("owner credential is corrupt: {e}"))
        })?)),
        None => Ok(None),
    }
}

/// Persist the owner credential.
pub async fn save_owner(
    store: &dyn SecureStore,
    owner: &OwnerCredential,
) -> Result<(), CoreError> {
    let json = serde_json::to_string(owner)
        .map_err(|e| CoreError::Internal(format!("owner credential serialize failed: {e}")))?;
    store.set(keys::OWNER, &json).await
}

/// Proof that the caller holds the device owner credential. Policy
/// mutations and registry write operations require one.
#[derive(Clone, Debug)]
pub struct OwnerAuth {
    pub account_address: String,
}

/// Authenticate as the device owner by resolving the stored
/// credential. Fails when no owner credential exists on this device.
pub async fn authenticate_owner(store: &dyn SecureStore) -> Result<OwnerAuth, CoreError> {
    let owner = load_owner(store)
        .await?
        .ok_or_else(|| CoreError::Unavailable("no owner credential on this device".into()))?;
    Ok(OwnerAuth {
        account_address: owner.account_address,
    })
}

/// Wipe every namespaced key. In-memory state must already be cleared
/// by the caller; storage failures here are swallowed after logging so
/// a reset never half-fails from the user's point of view.
pub async fn reset(store: &dyn SecureStore) {
    let keys = match store.keys_with_prefix(keys::NAMESPACE).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!("keystore reset: enumeration failed: {e}");
            return;
        }
    };
    for key in keys {
        if let Err(e) = store.delete(&key).await {
            warn!("keystore reset: failed to delete {key}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("starkclaw.wallet.v1").await.expect("get"), None);
    }

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let store = MemoryStore::new();
        store.set("starkclaw.wallet.v1", "{}").await.expect("set");
        assert_eq!(
            store.get("starkclaw.wallet.v1").await.expect("get").as_deref(),
            Some("{}")
        );
        store.delete("starkclaw.wallet.v1").await.expect("delete");
        assert_eq!(store.get("starkclaw.wallet.v1").await.expect("get"), None);
    }

    #[tokio::test]
    async fn reset_wipes_only_namespace() {
        let store = MemoryStore::new();
        store.set(keys::OWNER, "{}").await.expect("set");
        store
            .set(&keys::session_secret("0xabc"), "0x1")
            .await
            .expect("set");
        store.set("other.app.key", "keep").await.expect("set");

        reset(&store).await;

        assert_eq!(store.get(keys::OWNER).await.expect("get"), None);
        assert_eq!(store.get(&keys::session_secret("0xabc")).await.expect("get"), None);
        assert_eq!(store.get("other.app.key").await.expect("get").as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn sled_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = SledStore::open(dir.path()).expect("open");
            store.set(keys::OWNER, "persisted").await.expect("set");
        }
        let store = SledStore::open(dir.path()).expect("reopen");
        assert_eq!(store.get(keys::OWNER).await.expect("get").as_deref(), Some("persisted"));
    }
}
