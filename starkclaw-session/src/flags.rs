//! Persisted feature flags.
//!
//! `session_signer_v2` is hard-enforced on: reads always report it
//! enabled and writes cannot turn it off. A flag regression there
//! would be a silent signature-format downgrade.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::CoreError;
use crate::keystore::{keys, SecureStore};

/// The strict-v2 session signing flag. Always on.
pub const SESSION_SIGNER_V2: &str = "session_signer_v2";

/// Feature flag store backed by the secure keystore.
pub struct FeatureFlags {
    store: Arc<dyn SecureStore>,
}

impl FeatureFlags {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store }
    }

    /// Read a flag, falling back to its default when unset.
    pub async fn is_enabled(&self, flag: &str) -> Result<bool, CoreError> {
        if flag == SESSION_SIGNER_V2 {
            return Ok(true);
        }
        let map = self.load().await?;
        Ok(map.get(flag).copied().unwrap_or_else(|| default_for(flag)))
    }

    /// Persist a flag. Setting `session_signer_v2` to false is coerced
    /// back to true.
    pub async fn set_flag(&self, flag: &str, value: bool) -> Result<(), CoreError> {
        let value = if flag == SESSION_SIGNER_V2 && !value {
            warn!("ignoring attempt to disable {SESSION_SIGNER_V2}");
            true
        } else {
            value
        };
        let mut map = self.load().await?;
        map.insert(flag.to_string(), value);
        let json = serde_json::to_string(&map)
            .map_err(|e| CoreError::Internal(format!("flag serialize failed: {e}")))?;
        self.store.set(keys::FEATURE_FLAGS, &json).await
    }

    async fn load(&self) -> Result<HashMap<String, bool>, CoreError> {
        match self.store.get(keys::FEATURE_FLAGS).await? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| CoreError::Internal(format!("flag map is corrupt: {e}"))),
            None => Ok(HashMap::new()),
        }
    }
}

fn default_for(flag: &str) -> bool {
    match flag {
        SESSION_SIGNER_V2 => true,
        _ => false,
    }
}
