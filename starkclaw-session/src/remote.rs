//! Remote keyring-proxy session signer.
//!
//! The session scalar never leaves the signing enclave; this client
//! sends an HMAC-authenticated request describing the transaction and
//! validates the returned signature strictly before emitting the
//! canonical 5-felt session signature. Responses are pinned to the
//! first session public key observed: a proxy that rotates keys
//! mid-lifetime is treated as an error, never silently accepted.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use starknet::core::types::FieldElement;
use tracing::{debug, warn};

use crate::codec::{felt_hex, parse_felt};
use crate::config::RemoteSignerConfig;
use crate::error::CoreError;
use crate::signer::{
    SessionSignature, SessionTransactionRequest, TransactionSigner, SIGNATURE_MODE_V2,
    SPEC_VERSION,
};
use crate::types::{now_unix, SignerMode};

const SIGN_PATH: &str = "v1/sign/session-transaction";

type HmacSha256 = Hmac<Sha256>;

/// Session signer backed by a remote keyring proxy.
pub struct RemoteSigner {
    config: RemoteSignerConfig,
    http: reqwest::Client,
    /// Session public key pinned from the first successful response.
    pinned_pubkey: Mutex<Option<FieldElement>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireCall {
    contract_address: String,
    entrypoint: String,
    calldata: Vec<String>,
}

#[derive(Serialize)]
struct WireContext {
    requester: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mobile_action_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequestBody {
    account_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_id: Option<String>,
    chain_id: String,
    nonce: String,
    valid_until: u64,
    calls: Vec<WireCall>,
    context: WireContext,
}

#[derive(Debug, Deserialize)]
struct SignResponseBody {
    signature: Vec<String>,
    #[serde(rename = "sessionPublicKey")]
    session_public_key: Option<String>,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
}

impl RemoteSigner {
    pub fn new(config: RemoteSignerConfig) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms()))
            .build()
            .map_err(|e| CoreError::Internal(format!("http client build failed: {e}")))?;
        Ok(Self {
            config,
            http,
            pinned_pubkey: Mutex::new(None),
        })
    }

    fn build_body(&self, request: &SessionTransactionRequest) -> SignRequestBody {
        SignRequestBody {
            account_address: felt_hex(&request.account_address),
            key_id: self.config.key_id().map(str::to_string),
            chain_id: felt_hex(&request.chain_id),
            nonce: felt_hex(&request.nonce),
            valid_until: request.valid_until,
            calls: request
                .calls
                .iter()
                .map(|call| WireCall {
                    contract_address: felt_hex(&call.contract_address),
                    entrypoint: call.entrypoint.clone(),
                    calldata: call.calldata_hex(),
                })
                .collect(),
            context: WireContext {
                requester: self.config.requester().to_string(),
                tool: request.context.tool.clone(),
                reason: request.context.reason.clone(),
                client_id: self.config.client_id().to_string(),
                mobile_action_id: request.context.mobile_action_id.clone(),
            },
        }
    }

    /// Strip known sensitive values out of upstream text before it can
    /// reach an error message or log line.
    fn redact(&self, body: &str) -> String {
        let mut out = body.to_string();
        for secret in [self.config.hmac_secret(), self.config.client_id()] {
            if !secret.is_empty() {
                out = out.replace(secret, "[redacted]");
            }
        }
        out.chars().take(300).collect()
    }

    fn pin_pubkey(&self, pubkey: FieldElement) -> Result<(), CoreError> {
        let mut pinned = self.pinned_pubkey.lock().expect("pubkey lock");
        match *pinned {
            Some(existing) if existing != pubkey => Err(CoreError::SignerPubkeyChanged(format!(
                "expected {}, proxy returned {}",
                felt_hex(&existing),
                felt_hex(&pubkey)
            ))),
            _ => {
                *pinned = Some(pubkey);
                Ok(())
            }
        }
    }
}

/// Canonical HMAC payload over a request:
/// `timestamp.nonce.METHOD.path.sha256hex(body)`.
fn canonical_payload(timestamp: i64, nonce: &str, method: &str, path: &str, body: &[u8]) -> String {
    let body_digest = hex::encode(Sha256::digest(body));
    format!("{timestamp}.{nonce}.{method}.{path}.{body_digest}")
}

fn hmac_hex(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn fresh_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Validate a proxy response against the request it answers.
///
/// Returns the parsed `[pubkey, r, s, valid_until]` felts. All checks
/// are mandatory; any failure is a malformed-response error.
fn validate_response(
    response: &SignResponseBody,
    requested_valid_until: u64,
) -> Result<[FieldElement; 4], CoreError> {
    if response.signature.len() != 4 {
        return Err(CoreError::SignerMalformedResponse(format!(
            "expected 4 signature felts (pubkey, r, s, valid_until), got {}",
            response.signature.len()
        )));
    }
    let mut felts = [FieldElement::ZERO; 4];
    for (i, raw) in response.signature.iter().enumerate() {
        felts[i] = parse_felt(raw).map_err(|_| {
            CoreError::SignerMalformedResponse(format!(
                "signature element {i} is not a felt (expected pubkey, r, s, valid_until)"
            ))
        })?;
    }
    if let Some(raw) = &response.session_public_key {
        let declared = parse_felt(raw).map_err(|_| {
            CoreError::SignerMalformedResponse("sessionPublicKey is not a felt".into())
        })?;
        if declared != felts[0] {
            return Err(CoreError::SignerMalformedResponse(
                "sessionPublicKey does not match the signature's first felt".into(),
            ));
        }
    }
    if felts[3] != FieldElement::from(requested_valid_until) {
        return Err(CoreError::SignerMalformedResponse(format!(
            "signature valid_until {} does not echo the request's {}",
            felt_hex(&felts[3]),
            requested_valid_until
        )));
    }
    Ok(felts)
}

#[async_trait]
impl TransactionSigner for RemoteSigner {
    fn mode(&self) -> SignerMode {
        SignerMode::Remote
    }

    async fn sign_session_transaction(
        &self,
        request: &SessionTransactionRequest,
    ) -> Result<SessionSignature, CoreError> {
        if request.valid_until <= now_unix() as u64 {
            return Err(CoreError::SignerValidityExpired(
                "session valid_until is already in the past".into(),
            ));
        }

        let body = serde_json::to_vec(&self.build_body(request))
            .map_err(|e| CoreError::Internal(format!("request serialize failed: {e}")))?;

        let timestamp = now_unix();
        let nonce = fresh_nonce();
        let path = format!("/{SIGN_PATH}");
        let payload = canonical_payload(timestamp, &nonce, "POST", &path, &body);
        let signature = hmac_hex(self.config.hmac_secret(), &payload);

        let url = self
            .config
            .proxy_url()
            .join(SIGN_PATH)
            .map_err(|e| CoreError::Internal(format!("proxy URL join failed: {e}")))?;

        debug!(valid_until = request.valid_until, "sending remote signing request");
        let response = self
            .http
            .post(url)
            .header("content-type", "application/json")
            .header("x-keyring-client-id", self.config.client_id())
            .header("x-keyring-timestamp", timestamp.to_string())
            .header("x-keyring-nonce", nonce.as_str())
            .header("x-keyring-signature", signature.as_str())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::TransportTimeout("remote signing request timed out".into())
                } else {
                    CoreError::Transport(format!("remote signing request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = self.redact(&text);
            warn!(%status, "remote signer rejected request");
            return Err(if status.as_u16() == 401 {
                let lowered = text.to_ascii_lowercase();
                if lowered.contains("replay") || lowered.contains("nonce") {
                    CoreError::SignerReplayNonce(text)
                } else {
                    CoreError::SignerAuth(text)
                }
            } else if status.is_client_error() {
                CoreError::SignerPolicyDenied(text)
            } else {
                CoreError::Unavailable(format!("signer server error {status}: {text}"))
            });
        }

        let parsed: SignResponseBody = response.json().await.map_err(|e| {
            CoreError::SignerMalformedResponse(format!("response is not valid JSON: {e}"))
        })?;

        let felts = validate_response(&parsed, request.valid_until)?;
        self.pin_pubkey(felts[0])?;

        Ok(SessionSignature {
            felts: vec![felts[0], felts[1], felts[2], SIGNATURE_MODE_V2, SPEC_VERSION],
            session_public_key: felts[0],
            request_id: parsed.request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_signer_runtime_config, SignerRuntimeMode, SignerRuntimeOptions};
    use crate::keystore::{keys, MemoryStore, SecureStore};

    fn response(signature: &[&str], pubkey: Option<&str>) -> SignResponseBody {
        SignResponseBody {
            signature: signature.iter().map(|s| s.to_string()).collect(),
            session_public_key: pubkey.map(str::to_string),
            request_id: Some("req-1".into()),
        }
    }

    #[test]
    fn canonical_payload_layout() {
        let payload = canonical_payload(1700000000, "00ff", "POST", "/v1/sign/session-transaction", b"{}");
        let body_digest = hex::encode(Sha256::digest(b"{}"));
        assert_eq!(
            payload,
            format!("1700000000.00ff.POST./v1/sign/session-transaction.{body_digest}")
        );
    }

    #[test]
    fn hmac_is_deterministic_and_secret_bound() {
        let a = hmac_hex("secret-a", "payload");
        assert_eq!(a, hmac_hex("secret-a", "payload"));
        assert_ne!(a, hmac_hex("secret-b", "payload"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn short_signature_is_malformed() {
        let err = validate_response(&response(&["0x11", "0x22", "0x33"], None), 2000)
            .expect_err("should fail");
        assert_eq!(err.code(), "SIGNER_MALFORMED_RESPONSE");
        assert!(err.to_string().contains("pubkey, r, s, valid_until"));
    }

    #[test]
    fn valid_until_echo_is_mandatory() {
        let err = validate_response(&response(&["0xaaa", "0x1", "0x2", "0x7d1"], None), 2000)
            .expect_err("should fail");
        assert_eq!(err.code(), "SIGNER_MALFORMED_RESPONSE");
    }

    #[test]
    fn declared_pubkey_must_match_first_felt() {
        // 0x0aaa equals 0xaaa numerically; casing and zeros don't matter.
        let ok = validate_response(
            &response(&["0x0AAA", "0x1", "0x2", "0x7d0"], Some("0xaaa")),
            2000,
        );
        assert!(ok.is_ok());

        let err = validate_response(
            &response(&["0xaaa", "0x1", "0x2", "0x7d0"], Some("0xbbb")),
            2000,
        )
        .expect_err("should fail");
        assert_eq!(err.code(), "SIGNER_MALFORMED_RESPONSE");
    }

    async fn remote_signer() -> RemoteSigner {
        let store = MemoryStore::new();
        store.set(keys::REMOTE_CLIENT_ID, "client-1").await.expect("set");
        store
            .set(keys::REMOTE_HMAC_SECRET, "super-secret")
            .await
            .expect("set");
        let options = SignerRuntimeOptions {
            mode: SignerRuntimeMode::Remote,
            proxy_url: Some("https://signer.example.com".into()),
            ..Default::default()
        };
        let config = load_signer_runtime_config(&store, &options)
            .await
            .expect("config");
        RemoteSigner::new(config.remote().expect("remote").clone()).expect("signer")
    }

    #[tokio::test]
    async fn pubkey_rotation_is_rejected() {
        let signer = remote_signer().await;
        signer
            .pin_pubkey(parse_felt("0xaaa").expect("felt"))
            .expect("first pin");
        // Same key is fine on subsequent responses.
        signer
            .pin_pubkey(parse_felt("0x0aaa").expect("felt"))
            .expect("same key re-pin");
        let err = signer
            .pin_pubkey(parse_felt("0xbbb").expect("felt"))
            .expect_err("rotation");
        assert_eq!(err.code(), "SIGNER_PUBKEY_CHANGED");
    }

    #[tokio::test]
    async fn redaction_strips_credentials() {
        let signer = remote_signer().await;
        let leaked = "denied for client-1 with secret super-secret";
        let redacted = signer.redact(leaked);
        assert!(!redacted.contains("super-secret"));
        assert!(!redacted.contains("client-1"));
        assert!(redacted.contains("[redacted]"));
    }

    #[tokio::test]
    async fn expired_validity_fails_before_sending() {
        let signer = remote_signer().await;
        let request = SessionTransactionRequest {
            account_address: FieldElement::ONE,
            chain_id: FieldElement::TWO,
            nonce: FieldElement::ZERO,
            valid_until: 1, // long past
            calls: vec![],
            transaction_hash: FieldElement::THREE,
            context: Default::default(),
        };
        let err = signer
            .sign_session_transaction(&request)
            .await
            .expect_err("should fail");
        assert_eq!(err.code(), "SIGNER_VALIDITY_EXPIRED");
    }
}
