//! Deterministic SNIP-12 typed-data construction.
//!
//! Every payload binds the fixed domain `{ name: "Starkclaw",
//! version: "2", chainId, verifyingContract }`. Field order inside a
//! type is part of the hash, so messages are plain structs whose
//! declaration order is the wire order; nothing here goes through a
//! map. There is no version-1 construction path in this module or
//! anywhere else in the crate.

use serde::Serialize;
use starknet::core::types::FieldElement;
use starknet::core::utils::{cairo_short_string_to_felt, starknet_keccak};
use starknet_crypto::poseidon_hash_many;

use crate::codec::{felt_hex, parse_felt, U256};
use crate::error::CoreError;
use crate::types::MAX_ALLOWED_TARGETS;

/// Typed-data domain name.
pub const DOMAIN_NAME: &str = "Starkclaw";
/// Typed-data domain version. Strict v2; there is no other value.
pub const DOMAIN_VERSION: &str = "2";

const STARKNET_MESSAGE_PREFIX: &str = "StarkNet Message";

const DOMAIN_TYPE: &str =
    "StarknetDomain(name:felt,version:felt,chainId:felt,verifyingContract:felt)";
const REGISTER_TYPE: &str = "RegisterSessionKey(session_key:felt,valid_after:felt,\
valid_until:felt,spending_limit_low:felt,spending_limit_high:felt,spending_token:felt,\
allowed_contract_0:felt,allowed_contract_1:felt,allowed_contract_2:felt,allowed_contract_3:felt)";
const REVOKE_TYPE: &str = "RevokeSessionKey(session_key:felt)";
const EMERGENCY_TYPE: &str = "EmergencyRevokeAll(nonce:felt,timestamp:felt)";
const SESSION_TX_TYPE: &str =
    "SessionTransaction(nonce:felt,valid_until:felt,calls_hash:felt)";

/// One field descriptor inside `types`.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: &'static str,
}

fn field(name: &'static str) -> FieldDef {
    FieldDef { name, ty: "felt" }
}

fn domain_fields() -> Vec<FieldDef> {
    vec![
        field("name"),
        field("version"),
        field("chainId"),
        field("verifyingContract"),
    ]
}

/// The fixed signing domain.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Domain {
    pub name: &'static str,
    pub version: &'static str,
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "verifyingContract")]
    pub verifying_contract: String,
}

impl Domain {
    fn new(chain_id: &FieldElement, account_address: &FieldElement) -> Self {
        Self {
            name: DOMAIN_NAME,
            version: DOMAIN_VERSION,
            chain_id: felt_hex(chain_id),
            verifying_contract: felt_hex(account_address),
        }
    }

    fn hash(&self) -> Result<FieldElement, CoreError> {
        Ok(poseidon_hash_many(&[
            starknet_keccak(DOMAIN_TYPE.as_bytes()),
            short_string(self.name)?,
            short_string(self.version)?,
            parse_felt(&self.chain_id)?,
            parse_felt(&self.verifying_contract)?,
        ]))
    }
}

fn short_string(s: &str) -> Result<FieldElement, CoreError> {
    cairo_short_string_to_felt(s)
        .map_err(|e| CoreError::Internal(format!("short string encoding failed: {e}")))
}

fn message_hash(
    domain: &Domain,
    struct_hash: FieldElement,
) -> Result<FieldElement, CoreError> {
    Ok(poseidon_hash_many(&[
        short_string(STARKNET_MESSAGE_PREFIX)?,
        domain.hash()?,
        parse_felt(&domain.verifying_contract)?,
        struct_hash,
    ]))
}

// ── RegisterSessionKey ─────────────────────────────────────────────────

/// Inputs for a session registration payload.
#[derive(Clone, Debug)]
pub struct RegisterSessionKeyInput {
    pub chain_id: FieldElement,
    pub account_address: FieldElement,
    pub session_key: FieldElement,
    pub valid_after: u64,
    pub valid_until: u64,
    pub spending_limit: U256,
    pub spending_token: FieldElement,
    /// At most [`MAX_ALLOWED_TARGETS`]; unused slots become zero felts.
    pub allowed_contracts: Vec<FieldElement>,
}

/// RegisterSessionKey message; declaration order is the wire order.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RegisterSessionKeyMessage {
    pub session_key: String,
    pub valid_after: String,
    pub valid_until: String,
    pub spending_limit_low: String,
    pub spending_limit_high: String,
    pub spending_token: String,
    pub allowed_contract_0: String,
    pub allowed_contract_1: String,
    pub allowed_contract_2: String,
    pub allowed_contract_3: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RegisterSessionKeyTypes {
    #[serde(rename = "StarknetDomain")]
    pub starknet_domain: Vec<FieldDef>,
    #[serde(rename = "RegisterSessionKey")]
    pub register_session_key: Vec<FieldDef>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RegisterSessionKeyTypedData {
    pub types: RegisterSessionKeyTypes,
    #[serde(rename = "primaryType")]
    pub primary_type: &'static str,
    pub domain: Domain,
    pub message: RegisterSessionKeyMessage,
}

impl RegisterSessionKeyTypedData {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("typed data serializes")
    }

    /// SNIP-12 message hash this payload signs to.
    pub fn message_hash(&self) -> Result<FieldElement, CoreError> {
        let m = &self.message;
        let struct_hash = poseidon_hash_many(&[
            starknet_keccak(REGISTER_TYPE.as_bytes()),
            parse_felt(&m.session_key)?,
            parse_felt(&m.valid_after)?,
            parse_felt(&m.valid_until)?,
            parse_felt(&m.spending_limit_low)?,
            parse_felt(&m.spending_limit_high)?,
            parse_felt(&m.spending_token)?,
            parse_felt(&m.allowed_contract_0)?,
            parse_felt(&m.allowed_contract_1)?,
            parse_felt(&m.allowed_contract_2)?,
            parse_felt(&m.allowed_contract_3)?,
        ]);
        message_hash(&self.domain, struct_hash)
    }
}

/// Build a RegisterSessionKey payload.
pub fn build_register_session_key(
    input: &RegisterSessionKeyInput,
) -> Result<RegisterSessionKeyTypedData, CoreError> {
    if input.allowed_contracts.len() > MAX_ALLOWED_TARGETS {
        return Err(CoreError::InvalidInput(format!(
            "at most {MAX_ALLOWED_TARGETS} allowed contracts"
        )));
    }
    if input.valid_after >= input.valid_until {
        return Err(CoreError::InvalidInput(
            "valid_after must precede valid_until".into(),
        ));
    }
    let mut slots = [FieldElement::ZERO; MAX_ALLOWED_TARGETS];
    for (slot, contract) in slots.iter_mut().zip(input.allowed_contracts.iter()) {
        *slot = *contract;
    }
    let (limit_low, limit_high) = input.spending_limit.to_felts();

    Ok(RegisterSessionKeyTypedData {
        types: RegisterSessionKeyTypes {
            starknet_domain: domain_fields(),
            register_session_key: vec![
                field("session_key"),
                field("valid_after"),
                field("valid_until"),
                field("spending_limit_low"),
                field("spending_limit_high"),
                field("spending_token"),
                field("allowed_contract_0"),
                field("allowed_contract_1"),
                field("allowed_contract_2"),
                field("allowed_contract_3"),
            ],
        },
        primary_type: "RegisterSessionKey",
        domain: Domain::new(&input.chain_id, &input.account_address),
        message: RegisterSessionKeyMessage {
            session_key: felt_hex(&input.session_key),
            valid_after: felt_hex(&FieldElement::from(input.valid_after)),
            valid_until: felt_hex(&FieldElement::from(input.valid_until)),
            spending_limit_low: felt_hex(&limit_low),
            spending_limit_high: felt_hex(&limit_high),
            spending_token: felt_hex(&input.spending_token),
            allowed_contract_0: felt_hex(&slots[0]),
            allowed_contract_1: felt_hex(&slots[1]),
            allowed_contract_2: felt_hex(&slots[2]),
            allowed_contract_3: felt_hex(&slots[3]),
        },
    })
}

// ── RevokeSessionKey ───────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RevokeSessionKeyMessage {
    pub session_key: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RevokeSessionKeyTypes {
    #[serde(rename = "StarknetDomain")]
    pub starknet_domain: Vec<FieldDef>,
    #[serde(rename = "RevokeSessionKey")]
    pub revoke_session_key: Vec<FieldDef>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RevokeSessionKeyTypedData {
    pub types: RevokeSessionKeyTypes,
    #[serde(rename = "primaryType")]
    pub primary_type: &'static str,
    pub domain: Domain,
    pub message: RevokeSessionKeyMessage,
}

impl RevokeSessionKeyTypedData {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("typed data serializes")
    }

    pub fn message_hash(&self) -> Result<FieldElement, CoreError> {
        let struct_hash = poseidon_hash_many(&[
            starknet_keccak(REVOKE_TYPE.as_bytes()),
            parse_felt(&self.message.session_key)?,
        ]);
        message_hash(&self.domain, struct_hash)
    }
}

/// Build a RevokeSessionKey payload.
pub fn build_revoke_session_key(
    chain_id: &FieldElement,
    account_address: &FieldElement,
    session_key: &FieldElement,
) -> RevokeSessionKeyTypedData {
    RevokeSessionKeyTypedData {
        types: RevokeSessionKeyTypes {
            starknet_domain: domain_fields(),
            revoke_session_key: vec![field("session_key")],
        },
        primary_type: "RevokeSessionKey",
        domain: Domain::new(chain_id, account_address),
        message: RevokeSessionKeyMessage {
            session_key: felt_hex(session_key),
        },
    }
}

// ── EmergencyRevokeAll ─────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct EmergencyRevokeAllMessage {
    pub nonce: String,
    pub timestamp: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct EmergencyRevokeAllTypes {
    #[serde(rename = "StarknetDomain")]
    pub starknet_domain: Vec<FieldDef>,
    #[serde(rename = "EmergencyRevokeAll")]
    pub emergency_revoke_all: Vec<FieldDef>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct EmergencyRevokeAllTypedData {
    pub types: EmergencyRevokeAllTypes,
    #[serde(rename = "primaryType")]
    pub primary_type: &'static str,
    pub domain: Domain,
    pub message: EmergencyRevokeAllMessage,
}

impl EmergencyRevokeAllTypedData {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("typed data serializes")
    }

    pub fn message_hash(&self) -> Result<FieldElement, CoreError> {
        let struct_hash = poseidon_hash_many(&[
            starknet_keccak(EMERGENCY_TYPE.as_bytes()),
            parse_felt(&self.message.nonce)?,
            parse_felt(&self.message.timestamp)?,
        ]);
        message_hash(&self.domain, struct_hash)
    }
}

/// Build an EmergencyRevokeAll payload.
pub fn build_emergency_revoke_all(
    chain_id: &FieldElement,
    account_address: &FieldElement,
    nonce: u64,
    timestamp: u64,
) -> EmergencyRevokeAllTypedData {
    EmergencyRevokeAllTypedData {
        types: EmergencyRevokeAllTypes {
            starknet_domain: domain_fields(),
            emergency_revoke_all: vec![field("nonce"), field("timestamp")],
        },
        primary_type: "EmergencyRevokeAll",
        domain: Domain::new(chain_id, account_address),
        message: EmergencyRevokeAllMessage {
            nonce: felt_hex(&FieldElement::from(nonce)),
            timestamp: felt_hex(&FieldElement::from(timestamp)),
        },
    }
}

// ── SessionTransaction ─────────────────────────────────────────────────

/// Typed-data binding for a session-signed transaction: the nonce and
/// validity deadline plus a hash over the calls.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SessionTransactionMessage {
    pub nonce: String,
    pub valid_until: String,
    pub calls_hash: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SessionTransactionTypes {
    #[serde(rename = "StarknetDomain")]
    pub starknet_domain: Vec<FieldDef>,
    #[serde(rename = "SessionTransaction")]
    pub session_transaction: Vec<FieldDef>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SessionTransactionTypedData {
    pub types: SessionTransactionTypes,
    #[serde(rename = "primaryType")]
    pub primary_type: &'static str,
    pub domain: Domain,
    pub message: SessionTransactionMessage,
}

impl SessionTransactionTypedData {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("typed data serializes")
    }

    pub fn message_hash(&self) -> Result<FieldElement, CoreError> {
        let struct_hash = poseidon_hash_many(&[
            starknet_keccak(SESSION_TX_TYPE.as_bytes()),
            parse_felt(&self.message.nonce)?,
            parse_felt(&self.message.valid_until)?,
            parse_felt(&self.message.calls_hash)?,
        ]);
        message_hash(&self.domain, struct_hash)
    }
}

/// Build a SessionTransaction payload. `calls_hash` is a poseidon hash
/// over the flattened call array, computed by the signer layer.
pub fn build_session_transaction(
    chain_id: &FieldElement,
    account_address: &FieldElement,
    nonce: &FieldElement,
    valid_until: u64,
    calls_hash: &FieldElement,
) -> SessionTransactionTypedData {
    SessionTransactionTypedData {
        types: SessionTransactionTypes {
            starknet_domain: domain_fields(),
            session_transaction: vec![
                field("nonce"),
                field("valid_until"),
                field("calls_hash"),
            ],
        },
        primary_type: "SessionTransaction",
        domain: Domain::new(chain_id, account_address),
        message: SessionTransactionMessage {
            nonce: felt_hex(nonce),
            valid_until: felt_hex(&FieldElement::from(valid_until)),
            calls_hash: felt_hex(calls_hash),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_felt;

    fn sample_input() -> RegisterSessionKeyInput {
        RegisterSessionKeyInput {
            chain_id: parse_felt("0x534e5f5345504f4c4941").expect("chain id"),
            account_address: parse_felt(
                "0x01aaf2c9e91ea6107c70b9a3ffcabcbc7ab9699e5f099dc60eda41bb2f3233ef",
            )
            .expect("account"),
            session_key: parse_felt("0xabc123").expect("key"),
            valid_after: 1000,
            valid_until: 2000,
            spending_limit: U256::from_u128(0x64),
            spending_token: parse_felt(
                "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7",
            )
            .expect("token"),
            allowed_contracts: vec![
                parse_felt("0x0444").expect("c0"),
                parse_felt("0x0555").expect("c1"),
            ],
        }
    }

    #[test]
    fn register_payload_is_deterministic() {
        let input = sample_input();
        let a = build_register_session_key(&input).expect("build");
        let b = build_register_session_key(&input).expect("build");
        assert_eq!(a.to_json(), b.to_json());
        assert_eq!(
            a.message_hash().expect("hash"),
            b.message_hash().expect("hash")
        );
    }

    #[test]
    fn register_message_field_values() {
        let payload = build_register_session_key(&sample_input()).expect("build");
        assert_eq!(payload.domain.version, "2");
        assert_eq!(payload.message.valid_after, "0x3e8");
        assert_eq!(payload.message.valid_until, "0x7d0");
        assert_eq!(payload.message.spending_limit_low, "0x64");
        assert_eq!(payload.message.spending_limit_high, "0x0");
        assert_eq!(payload.message.allowed_contract_0, "0x444");
        assert_eq!(payload.message.allowed_contract_1, "0x555");
        assert_eq!(payload.message.allowed_contract_2, "0x0");
        assert_eq!(payload.message.allowed_contract_3, "0x0");
    }

    #[test]
    fn register_field_order_precedes_alphabetical() {
        // session_key must serialize before valid_after even though
        // "s" > "a"; the builder must never alphabetize.
        let json = build_register_session_key(&sample_input())
            .expect("build")
            .to_json();
        let key_pos = json.find("\"session_key\"").expect("session_key present");
        let after_pos = json.find("\"valid_after\"").expect("valid_after present");
        assert!(key_pos < after_pos);
    }

    #[test]
    fn account_binding_changes_payload_and_hash() {
        let input = sample_input();
        let mut other = sample_input();
        other.account_address = parse_felt("0x0bbb").expect("other account");

        let a = build_register_session_key(&input).expect("build");
        let b = build_register_session_key(&other).expect("build");
        assert_ne!(a.to_json(), b.to_json());
        assert_ne!(
            a.message_hash().expect("hash"),
            b.message_hash().expect("hash")
        );
    }

    #[test]
    fn register_rejects_inverted_window() {
        let mut input = sample_input();
        input.valid_after = 3000;
        assert!(build_register_session_key(&input).is_err());
    }

    #[test]
    fn register_rejects_oversized_target_list() {
        let mut input = sample_input();
        input.allowed_contracts = (0..5)
            .map(|i| FieldElement::from(i as u64 + 1))
            .collect();
        assert!(build_register_session_key(&input).is_err());
    }

    #[test]
    fn revoke_and_emergency_payloads() {
        let chain = parse_felt("0x534e5f5345504f4c4941").expect("chain");
        let account = parse_felt("0x01ef").expect("account");
        let key = parse_felt("0xabc123").expect("key");

        let revoke = build_revoke_session_key(&chain, &account, &key);
        assert_eq!(revoke.primary_type, "RevokeSessionKey");
        assert_eq!(revoke.message.session_key, "0xabc123");
        assert_eq!(revoke.domain.version, "2");

        let emergency = build_emergency_revoke_all(&chain, &account, 7, 1_700_000_000);
        assert_eq!(emergency.primary_type, "EmergencyRevokeAll");
        assert_eq!(emergency.message.nonce, "0x7");
        assert!(emergency.message_hash().is_ok());
    }
}
