//! Type definitions for the session authority core.

use serde::{Deserialize, Serialize};
use starknet::core::types::FieldElement;

use crate::codec::{felt_hex, parse_felt};
use crate::error::CoreError;

/// Maximum number of per-session contract targets stored locally.
pub const MAX_ALLOWED_TARGETS: usize = 4;

/// Minimum session lifetime accepted at creation.
pub const MIN_SESSION_VALIDITY_SECS: i64 = 60;

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Supported Starknet networks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Sepolia,
    Mainnet,
}

impl NetworkId {
    /// Chain ID as the hex encoding of the short name felt.
    pub fn chain_id_hex(&self) -> &'static str {
        match self {
            NetworkId::Sepolia => "0x534e5f5345504f4c4941", // "SN_SEPOLIA"
            NetworkId::Mainnet => "0x534e5f4d41494e",       // "SN_MAIN"
        }
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            NetworkId::Sepolia => "https://starknet-sepolia.public.blastapi.io",
            NetworkId::Mainnet => "https://starknet-mainnet.public.blastapi.io",
        }
    }

    pub fn explorer_url(&self) -> &'static str {
        match self {
            NetworkId::Sepolia => "https://sepolia.starkscan.co",
            NetworkId::Mainnet => "https://starkscan.co",
        }
    }
}

/// Network endpoint configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network: NetworkId,
    pub rpc_url: String,
    pub chain_id_hex: String,
}

impl NetworkConfig {
    pub fn sepolia(rpc_url: impl Into<String>) -> Self {
        Self {
            network: NetworkId::Sepolia,
            rpc_url: rpc_url.into(),
            chain_id_hex: NetworkId::Sepolia.chain_id_hex().to_string(),
        }
    }

    pub fn mainnet(rpc_url: impl Into<String>) -> Self {
        Self {
            network: NetworkId::Mainnet,
            rpc_url: rpc_url.into(),
            chain_id_hex: NetworkId::Mainnet.chain_id_hex().to_string(),
        }
    }

    pub fn for_network(network: NetworkId) -> Self {
        match network {
            NetworkId::Sepolia => Self::sepolia(NetworkId::Sepolia.default_rpc_url()),
            NetworkId::Mainnet => Self::mainnet(NetworkId::Mainnet.default_rpc_url()),
        }
    }

    pub fn chain_id(&self) -> Result<FieldElement, CoreError> {
        parse_felt(&self.chain_id_hex)
    }
}

/// Known token addresses on Starknet.
pub mod known_tokens {
    /// ETH token address (same contract on mainnet and Sepolia).
    pub const ETH: &str = "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7";
    /// STRK token address (same contract on mainnet and Sepolia).
    pub const STRK: &str = "0x04718f5a0fc34cc1af16a1cdee98ffb20c31f5cd61d6ab07201858f4287c938d";
    /// USDC token address on mainnet.
    pub const USDC_MAINNET: &str =
        "0x053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8";
    /// USDC token address on Sepolia.
    pub const USDC_SEPOLIA: &str =
        "0x053b40a647cedfca6ca84f542a0fe36736031905a9639a7f19a3c1e66bfd5080";
}

/// Token descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Token {
    /// Token symbol (uppercase).
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Decimal places; immutable per token.
    pub decimals: u32,
    /// Contract address by network.
    pub address_sepolia: String,
    pub address_mainnet: String,
    /// USD price hint in cents, for policy cap evaluation.
    pub usd_price_cents: u64,
}

impl Token {
    pub fn address_on(&self, network: NetworkId) -> &str {
        match network {
            NetworkId::Sepolia => &self.address_sepolia,
            NetworkId::Mainnet => &self.address_mainnet,
        }
    }
}

/// The closed token list this wallet supports.
pub fn token_list() -> Vec<Token> {
    vec![
        Token {
            symbol: "ETH".into(),
            name: "Ether".into(),
            decimals: 18,
            address_sepolia: known_tokens::ETH.into(),
            address_mainnet: known_tokens::ETH.into(),
            usd_price_cents: 250_000,
        },
        Token {
            symbol: "STRK".into(),
            name: "Starknet Token".into(),
            decimals: 18,
            address_sepolia: known_tokens::STRK.into(),
            address_mainnet: known_tokens::STRK.into(),
            usd_price_cents: 50,
        },
        Token {
            symbol: "USDC".into(),
            name: "USD Coin".into(),
            decimals: 6,
            address_sepolia: known_tokens::USDC_SEPOLIA.into(),
            address_mainnet: known_tokens::USDC_MAINNET.into(),
            usd_price_cents: 100,
        },
    ]
}

/// Look up a supported token by symbol, case-insensitive.
pub fn token_by_symbol(symbol: &str) -> Option<Token> {
    token_list()
        .into_iter()
        .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
}

/// The device owner's account credential.
///
/// Created once per device and persisted in the secure keystore;
/// destroyed only by an explicit reset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OwnerCredential {
    /// Owner private key (secret; never logged).
    pub private_key: String,
    pub public_key: String,
    pub account_address: String,
    pub class_hash: String,
    pub network: NetworkId,
}

/// A stored session credential. The private key is persisted
/// separately in the keystore, keyed by this credential's public key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionCredential {
    /// Session public key; the credential's identity.
    pub public_key: String,
    pub token_symbol: String,
    pub token_address: String,
    /// Spending limit in token base units, as a decimal string.
    pub spending_limit_base_units: String,
    pub valid_after: i64,
    pub valid_until: i64,
    /// Local-only target list, at most [`MAX_ALLOWED_TARGETS`] entries.
    /// Empty means wildcard.
    pub allowed_contracts: Vec<String>,
    pub created_at: i64,
    pub registered_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub last_tx_hash: Option<String>,
}

impl SessionCredential {
    /// Locally usable: not revoked and inside the validity window.
    /// On-chain usability is checked separately and fail-closed.
    pub fn is_usable_at(&self, now: i64) -> bool {
        self.revoked_at.is_none() && now >= self.valid_after && now < self.valid_until
    }
}

/// A single contract call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub contract_address: FieldElement,
    pub entrypoint: String,
    pub selector: FieldElement,
    pub calldata: Vec<FieldElement>,
}

impl Call {
    /// Hex view used in remote signing requests and logs.
    pub fn calldata_hex(&self) -> Vec<String> {
        self.calldata.iter().map(felt_hex).collect()
    }
}

/// Which signer variant executed a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerMode {
    Local,
    Remote,
}

/// Action kinds the preparer can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Erc20Transfer,
    Swap,
}

/// Policy snapshot attached to a prepared action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionPolicy {
    pub spending_limit_base_units: String,
    pub valid_until: i64,
}

/// An immutable, validated description of a pending on-chain operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreparedAction {
    pub kind: ActionKind,
    pub token_symbol: String,
    pub token_address: String,
    pub to: String,
    /// Human-entered amount text, normalized.
    pub amount: String,
    pub amount_base_units: String,
    pub balance_base_units: String,
    /// ERC-20 calldata: `[to, amount.low, amount.high]` as hex felts.
    pub calldata: Vec<String>,
    pub session_public_key: String,
    pub policy: ActionPolicy,
    pub warnings: Vec<String>,
    /// Swap only: one-line route summary from the aggregator.
    pub route_summary: Option<String>,
    /// Swap only: bounded approval amount (exact sell amount, never MAX).
    pub approval_base_units: Option<String>,
}

/// Result of executing a prepared action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub tx_hash: String,
    pub signer_mode: SignerMode,
    pub signer_request_id: Option<String>,
    pub mobile_action_id: Option<String>,
}

/// Transaction status tracked by the activity log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Succeeded,
    Reverted,
    Unknown,
}

impl TxStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// Kinds of policy-relevant events recorded in the activity log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Onboarding,
    PolicyUpdated,
    SessionCreated,
    SessionRegistered,
    SessionRevoked,
    EmergencyRevoke,
    TransferSubmitted,
    TransferSucceeded,
    TransferReverted,
    SwapSubmitted,
}

/// One activity log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Monotonically increasing id.
    pub id: u64,
    pub created_at: i64,
    pub kind: ActivityKind,
    pub title: String,
    pub subtitle: Option<String>,
    pub tx_hash: Option<String>,
    pub status: TxStatus,
    pub execution_status: Option<String>,
    pub revert_reason: Option<String>,
    pub signer_mode: Option<SignerMode>,
    pub signer_request_id: Option<String>,
    pub mobile_action_id: Option<String>,
    pub explorer_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lookup_is_case_insensitive() {
        assert!(token_by_symbol("usdc").is_some());
        assert!(token_by_symbol("USDC").is_some());
        assert!(token_by_symbol("DOGE").is_none());
    }

    #[test]
    fn usdc_has_six_decimals() {
        assert_eq!(token_by_symbol("USDC").expect("usdc").decimals, 6);
        assert_eq!(token_by_symbol("ETH").expect("eth").decimals, 18);
    }

    #[test]
    fn session_usability_window() {
        let cred = SessionCredential {
            public_key: "0xabc".into(),
            token_symbol: "USDC".into(),
            token_address: known_tokens::USDC_SEPOLIA.into(),
            spending_limit_base_units: "10000000".into(),
            valid_after: 100,
            valid_until: 200,
            allowed_contracts: vec![],
            created_at: 90,
            registered_at: None,
            revoked_at: None,
            last_tx_hash: None,
        };
        assert!(!cred.is_usable_at(99));
        assert!(cred.is_usable_at(100));
        assert!(cred.is_usable_at(199));
        assert!(!cred.is_usable_at(200));

        let revoked = SessionCredential { revoked_at: Some(150), ..cred };
        assert!(!revoked.is_usable_at(150));
    }
}
