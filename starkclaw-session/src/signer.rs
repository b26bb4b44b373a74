//! Transaction and typed-data signers.
//!
//! Two variants sit behind [`TransactionSigner`]: the local session
//! signer holding the session scalar in-process, and the remote
//! keyring-proxy signer in `remote.rs`. The owner signer is separate;
//! it signs administrative transactions and typed-data with the
//! device owner's key and is never used for session spends.
//! Deploy-account and declare transactions always route to the owner
//! signer.
//!
//! Strict v2: every session signature emitted by this crate is the
//! 5-felt array `[session_pubkey, r, s, signature_mode, spec_version]`.
//! No code path emits any other shape.

use async_trait::async_trait;
use rand::RngCore;
use starknet::core::types::FieldElement;
use starknet::signers::SigningKey;
use starknet_crypto::poseidon_hash_many;

use crate::codec::{felt_hex, parse_felt};
use crate::error::CoreError;
use crate::types::{Call, SignerMode};

/// Signature-mode marker felt in slot 3 of a session signature.
pub const SIGNATURE_MODE_V2: FieldElement = FieldElement::TWO;
/// Typed-data spec version felt in slot 4 of a session signature.
pub const SPEC_VERSION: FieldElement = FieldElement::TWO;

/// Context metadata attached to signing requests for audit.
#[derive(Clone, Debug, Default)]
pub struct SigningContext {
    pub requester: String,
    pub tool: Option<String>,
    pub reason: Option<String>,
    pub mobile_action_id: Option<String>,
}

/// A fully specified session-transaction signing request.
#[derive(Clone, Debug)]
pub struct SessionTransactionRequest {
    pub account_address: FieldElement,
    pub chain_id: FieldElement,
    pub nonce: FieldElement,
    pub valid_until: u64,
    pub calls: Vec<Call>,
    /// Invoke transaction hash the account contract will verify.
    pub transaction_hash: FieldElement,
    pub context: SigningContext,
}

/// A produced session signature plus correlation metadata.
#[derive(Clone, Debug)]
pub struct SessionSignature {
    /// Exactly 5 felts: `[session_pubkey, r, s, mode, spec_version]`.
    pub felts: Vec<FieldElement>,
    pub session_public_key: FieldElement,
    /// Remote signer request id, when one was issued.
    pub request_id: Option<String>,
}

/// Signer interface consumed by the execute path.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn mode(&self) -> SignerMode;

    async fn sign_session_transaction(
        &self,
        request: &SessionTransactionRequest,
    ) -> Result<SessionSignature, CoreError>;
}

/// Poseidon hash over the flattened call array, used to bind calls
/// into session typed-data.
pub fn calls_hash(calls: &[Call]) -> FieldElement {
    let mut elements = vec![FieldElement::from(calls.len() as u64)];
    for call in calls {
        elements.push(call.contract_address);
        elements.push(call.selector);
        elements.push(FieldElement::from(call.calldata.len() as u64));
        elements.extend_from_slice(&call.calldata);
    }
    poseidon_hash_many(&elements)
}

// ── Owner signer ───────────────────────────────────────────────────────

/// Signs with the device owner's key. Produces bare `[r, s]`
/// signatures over transaction hashes and typed-data message hashes.
pub struct OwnerSigner {
    signing_key: SigningKey,
}

impl OwnerSigner {
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, CoreError> {
        let scalar = parse_felt(private_key_hex)?;
        Ok(Self {
            signing_key: SigningKey::from_secret_scalar(scalar),
        })
    }

    pub fn public_key(&self) -> FieldElement {
        self.signing_key.verifying_key().scalar()
    }

    /// Sign a hash (transaction or typed-data), returning `[r, s]`.
    pub fn sign_hash(&self, hash: &FieldElement) -> Result<Vec<FieldElement>, CoreError> {
        let signature = self
            .signing_key
            .sign(hash)
            .map_err(|e| CoreError::Internal(format!("owner signing failed: {e}")))?;
        Ok(vec![signature.r, signature.s])
    }
}

// ── Local session signer ───────────────────────────────────────────────

/// Session signer holding the session scalar in process memory for
/// the duration of the signing call.
pub struct LocalSessionSigner {
    signing_key: SigningKey,
    public_key: FieldElement,
}

impl LocalSessionSigner {
    /// Build from stored key material. The stored public key must
    /// match the one derived from the scalar.
    pub fn new(private_key_hex: &str, public_key_hex: &str) -> Result<Self, CoreError> {
        let scalar = parse_felt(private_key_hex)?;
        let expected = parse_felt(public_key_hex)?;
        let signing_key = SigningKey::from_secret_scalar(scalar);
        let derived = signing_key.verifying_key().scalar();
        if derived != expected {
            return Err(CoreError::Internal(
                "session key material is inconsistent with its public key".into(),
            ));
        }
        Ok(Self {
            signing_key,
            public_key: derived,
        })
    }

    pub fn public_key(&self) -> FieldElement {
        self.public_key
    }

    /// Sign a typed-data message hash with the session key.
    pub fn sign_typed_data_hash(
        &self,
        hash: &FieldElement,
    ) -> Result<SessionSignature, CoreError> {
        self.sign(hash)
    }

    fn sign(&self, hash: &FieldElement) -> Result<SessionSignature, CoreError> {
        let signature = self
            .signing_key
            .sign(hash)
            .map_err(|e| CoreError::Internal(format!("session signing failed: {e}")))?;
        Ok(SessionSignature {
            felts: vec![
                self.public_key,
                signature.r,
                signature.s,
                SIGNATURE_MODE_V2,
                SPEC_VERSION,
            ],
            session_public_key: self.public_key,
            request_id: None,
        })
    }
}

#[async_trait]
impl TransactionSigner for LocalSessionSigner {
    fn mode(&self) -> SignerMode {
        SignerMode::Local
    }

    async fn sign_session_transaction(
        &self,
        request: &SessionTransactionRequest,
    ) -> Result<SessionSignature, CoreError> {
        self.sign(&request.transaction_hash)
    }
}

// ── Key generation ─────────────────────────────────────────────────────

/// Generate a fresh session keypair.
///
/// Draws 32 random bytes and masks to 251 bits so the scalar is
/// always below the Stark curve order. Returns the private scalar and
/// derived public key as canonical hex.
pub fn generate_session_keypair() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] &= 0x07;
    let scalar = FieldElement::from_bytes_be(&bytes).expect("masked scalar is in range");
    let signing_key = SigningKey::from_secret_scalar(scalar);
    let public_key = signing_key.verifying_key().scalar();
    (felt_hex(&scalar), felt_hex(&public_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(hash: FieldElement) -> SessionTransactionRequest {
        SessionTransactionRequest {
            account_address: FieldElement::from(0x1aau64),
            chain_id: FieldElement::from(0x534e5f5345504f4c4941u128),
            nonce: FieldElement::ONE,
            valid_until: 2_000_000_000,
            calls: vec![],
            transaction_hash: hash,
            context: SigningContext::default(),
        }
    }

    #[tokio::test]
    async fn session_signature_has_exactly_five_felts() {
        let (sk, pk) = generate_session_keypair();
        let signer = LocalSessionSigner::new(&sk, &pk).expect("signer");
        let signature = signer
            .sign_session_transaction(&sample_request(FieldElement::from(42u64)))
            .await
            .expect("sign");

        assert_eq!(signature.felts.len(), 5);
        assert_eq!(signature.felts[0], signer.public_key());
        assert_eq!(signature.felts[3], SIGNATURE_MODE_V2);
        assert_eq!(signature.felts[4], SPEC_VERSION);
    }

    #[test]
    fn owner_signature_is_two_felts() {
        let (sk, _) = generate_session_keypair();
        let owner = OwnerSigner::from_private_key(&sk).expect("owner");
        let signature = owner.sign_hash(&FieldElement::from(7u64)).expect("sign");
        assert_eq!(signature.len(), 2);
    }

    #[test]
    fn session_signer_rejects_mismatched_public_key() {
        let (sk, _) = generate_session_keypair();
        let (_, other_pk) = generate_session_keypair();
        assert!(LocalSessionSigner::new(&sk, &other_pk).is_err());
    }

    #[test]
    fn generated_scalars_are_in_range() {
        for _ in 0..16 {
            let (sk, pk) = generate_session_keypair();
            assert!(LocalSessionSigner::new(&sk, &pk).is_ok());
        }
    }

    #[test]
    fn calls_hash_distinguishes_call_sets() {
        let call = Call {
            contract_address: FieldElement::from(0xaau64),
            entrypoint: "transfer".into(),
            selector: FieldElement::from(0xbbu64),
            calldata: vec![FieldElement::ONE, FieldElement::TWO],
        };
        let mut other = call.clone();
        other.calldata = vec![FieldElement::TWO, FieldElement::ONE];
        assert_ne!(calls_hash(&[call.clone()]), calls_hash(&[other]));
        assert_ne!(calls_hash(&[call.clone()]), calls_hash(&[call.clone(), call]));
    }
}
