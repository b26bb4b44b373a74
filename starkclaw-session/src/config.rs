//! Runtime configuration for the signing path.
//!
//! Remote mode is only usable after load-time validation passes:
//! proxy URL present, transport policy satisfied, credentials present
//! in the keystore. The loaded config is immutable; changing signing
//! mode means loading a new one.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CoreError;
use crate::keystore::{keys, SecureStore};

/// Minimum accepted request timeout.
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
/// Default remote signing timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 20_000;

/// Which signer variant executes session transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerRuntimeMode {
    #[default]
    Local,
    Remote,
}

/// Raw, unvalidated options as supplied by the shell.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SignerRuntimeOptions {
    #[serde(default)]
    pub mode: SignerRuntimeMode,
    pub proxy_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub requester: Option<String>,
    #[serde(default)]
    pub mtls_required: bool,
    /// Production builds must require mTLS for remote signing.
    #[serde(default)]
    pub production: bool,
}

/// Validated remote-signer configuration.
#[derive(Clone, Debug)]
pub struct RemoteSignerConfig {
    proxy_url: Url,
    client_id: String,
    hmac_secret: String,
    key_id: Option<String>,
    request_timeout_ms: u64,
    requester: String,
    mtls_required: bool,
}

impl RemoteSignerConfig {
    /// Proxy base URL, normalized to end with a trailing slash.
    pub fn proxy_url(&self) -> &Url {
        &self.proxy_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The HMAC secret. Never logged; never surfaced in errors.
    pub fn hmac_secret(&self) -> &str {
        &self.hmac_secret
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn mtls_required(&self) -> bool {
        self.mtls_required
    }
}

/// Validated signing runtime configuration.
#[derive(Clone, Debug)]
pub struct SignerRuntimeConfig {
    mode: SignerRuntimeMode,
    remote: Option<RemoteSignerConfig>,
}

impl SignerRuntimeConfig {
    pub fn mode(&self) -> SignerRuntimeMode {
        self.mode
    }

    /// Remote config; present exactly when `mode` is remote.
    pub fn remote(&self) -> Option<&RemoteSignerConfig> {
        self.remote.as_ref()
    }
}

/// Load and validate the signing runtime configuration.
pub async fn load_signer_runtime_config(
    store: &dyn SecureStore,
    options: &SignerRuntimeOptions,
) -> Result<SignerRuntimeConfig, CoreError> {
    if options.mode == SignerRuntimeMode::Local {
        return Ok(SignerRuntimeConfig {
            mode: SignerRuntimeMode::Local,
            remote: None,
        });
    }

    let raw_url = options
        .proxy_url
        .as_deref()
        .ok_or_else(|| {
            CoreError::ConfigMissingProxyUrl("remote mode requires a proxy URL".into())
        })?
        .trim();
    if raw_url.is_empty() {
        return Err(CoreError::ConfigMissingProxyUrl(
            "remote mode requires a proxy URL".into(),
        ));
    }

    let mut proxy_url: Url = raw_url
        .parse()
        .map_err(|e| CoreError::InvalidInput(format!("invalid proxy URL: {e}")))?;
    check_transport_policy(&proxy_url)?;

    if options.production && !options.mtls_required {
        return Err(CoreError::ConfigMtlsRequired(
            "production remote signing requires mTLS".into(),
        ));
    }

    let timeout = options
        .request_timeout_ms
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    if timeout < MIN_REQUEST_TIMEOUT_MS {
        return Err(CoreError::InvalidInput(format!(
            "request timeout must be at least {MIN_REQUEST_TIMEOUT_MS} ms"
        )));
    }

    let client_id = require_credential(store, keys::REMOTE_CLIENT_ID, "client id").await?;
    let hmac_secret = require_credential(store, keys::REMOTE_HMAC_SECRET, "HMAC secret").await?;
    let key_id = store.get(keys::REMOTE_KEY_ID).await?;

    if !proxy_url.path().ends_with('/') {
        proxy_url.set_path(&format!("{}/", proxy_url.path()));
    }

    Ok(SignerRuntimeConfig {
        mode: SignerRuntimeMode::Remote,
        remote: Some(RemoteSignerConfig {
            proxy_url,
            client_id,
            hmac_secret,
            key_id,
            request_timeout_ms: timeout,
            requester: options
                .requester
                .clone()
                .unwrap_or_else(|| "starkclaw-mobile".to_string()),
            mtls_required: options.mtls_required,
        }),
    })
}

fn check_transport_policy(url: &Url) -> Result<(), CoreError> {
    if url.scheme() == "https" {
        return Ok(());
    }
    let loopback = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
    if url.scheme() == "http" && loopback {
        return Ok(());
    }
    Err(CoreError::ConfigInsecureTransport(format!(
        "proxy URL must use https or a loopback host, got {url}"
    )))
}

async fn require_credential(
    store: &dyn SecureStore,
    key: &str,
    what: &str,
) -> Result<String, CoreError> {
    store
        .get(key)
        .await?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::Unavailable(format!("remote signer {what} is not configured")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryStore;

    async fn store_with_credentials() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .set(keys::REMOTE_CLIENT_ID, "client-1")
            .await
            .expect("set");
        store
            .set(keys::REMOTE_HMAC_SECRET, "super-secret")
            .await
            .expect("set");
        store
    }

    fn remote_options(url: &str) -> SignerRuntimeOptions {
        SignerRuntimeOptions {
            mode: SignerRuntimeMode::Remote,
            proxy_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn local_mode_needs_nothing() {
        let store = MemoryStore::new();
        let config = load_signer_runtime_config(&store, &SignerRuntimeOptions::default())
            .await
            .expect("load");
        assert_eq!(config.mode(), SignerRuntimeMode::Local);
        assert!(config.remote().is_none());
    }

    #[tokio::test]
    async fn remote_without_url_is_missing_proxy() {
        let store = store_with_credentials().await;
        let options = SignerRuntimeOptions {
            mode: SignerRuntimeMode::Remote,
            ..Default::default()
        };
        let err = load_signer_runtime_config(&store, &options)
            .await
            .expect_err("should fail");
        assert_eq!(err.code(), "CONFIG_MISSING_PROXY_URL");
    }

    #[tokio::test]
    async fn plain_http_is_rejected_except_loopback() {
        let store = store_with_credentials().await;

        let err = load_signer_runtime_config(&store, &remote_options("http://signer.example.com"))
            .await
            .expect_err("should fail");
        assert_eq!(err.code(), "CONFIG_INSECURE_TRANSPORT");

        for url in ["http://localhost:8443/", "http://127.0.0.1:9000"] {
            let config = load_signer_runtime_config(&store, &remote_options(url))
                .await
                .expect("loopback allowed");
            assert_eq!(config.mode(), SignerRuntimeMode::Remote);
        }
    }

    #[tokio::test]
    async fn production_requires_mtls() {
        let store = store_with_credentials().await;
        let mut options = remote_options("https://signer.example.com");
        options.production = true;
        let err = load_signer_runtime_config(&store, &options)
            .await
            .expect_err("should fail");
        assert_eq!(err.code(), "CONFIG_MTLS_REQUIRED");

        options.mtls_required = true;
        assert!(load_signer_runtime_config(&store, &options).await.is_ok());
    }

    #[tokio::test]
    async fn missing_credentials_fail_closed() {
        let store = MemoryStore::new();
        let err = load_signer_runtime_config(&store, &remote_options("https://signer.example.com"))
            .await
            .expect_err("should fail");
        assert_eq!(err.code(), "UNAVAILABLE");
    }

    #[tokio::test]
    async fn proxy_url_gains_trailing_slash() {
        let store = store_with_credentials().await;
        let config =
            load_signer_runtime_config(&store, &remote_options("https://signer.example.com/api"))
                .await
                .expect("load");
        assert_eq!(
            config.remote().expect("remote").proxy_url().as_str(),
            "https://signer.example.com/api/"
        );
    }

    #[tokio::test]
    async fn timeout_floor_enforced() {
        let store = store_with_credentials().await;
        let mut options = remote_options("https://signer.example.com");
        options.request_timeout_ms = Some(500);
        let err = load_signer_runtime_config(&store, &options)
            .await
            .expect_err("should fail");
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
