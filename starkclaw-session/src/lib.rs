//! starkclaw-session
//!
//! Session authority core for the Starkclaw agent wallet: a
//! human-owned Starknet account whose execution authority can be
//! delegated to an autonomous agent only through revocable,
//! scope-bounded session keys enforced by the on-chain account
//! contract.
//!
//! # Architecture
//!
//! - [`codec`]: felt and u256 `(low, high)` encoding plus exact
//!   decimal amount parsing.
//! - [`keystore`]: platform-backed secret storage behind a trait,
//!   with the namespaced key layout and reset semantics.
//! - [`typed_data`]: deterministic SNIP-12 v2 payloads for session
//!   administration and transaction binding. Strict v2: there is no
//!   version-1 code path.
//! - [`signer`] / [`remote`]: the local session signer and the
//!   HMAC-authenticated keyring-proxy signer. Both emit the single
//!   canonical 5-felt session signature shape.
//! - [`registry`]: session credential lifecycle, owner-signed
//!   on-chain administration, fail-closed validity reads.
//! - [`policy`]: pre-flight checks covering lockdown, caps,
//!   allow-lists and the 24 h rolling spend window.
//! - [`prepare`]: intents in, immutable prepared actions out;
//!   execution with signer selection and activity correlation.
//! - [`rpc`] / [`poller`]: JSON-RPC client, invoke assembly, and the
//!   bounded-concurrency receipt poller.
//! - [`activity`]: the append-only, persisted activity log.
//! - [`config`] / [`flags`]: validated signing runtime configuration
//!   and persisted feature flags.

pub mod activity;
pub mod codec;
pub mod config;
pub mod error;
pub mod flags;
pub mod keystore;
pub mod policy;
pub mod poller;
pub mod prepare;
pub mod registry;
pub mod remote;
pub mod rpc;
pub mod signer;
pub mod typed_data;
pub mod types;

pub use activity::{ActivityDraft, ActivityLog, StatusUpdate, MAX_RECORDS};
pub use codec::{felt_hex, format_units, parse_felt, parse_units, U256};
pub use config::{
    load_signer_runtime_config, RemoteSignerConfig, SignerRuntimeConfig, SignerRuntimeMode,
    SignerRuntimeOptions,
};
pub use error::CoreError;
pub use flags::{FeatureFlags, SESSION_SIGNER_V2};
pub use keystore::{
    authenticate_owner, load_owner, reset, save_owner, MemoryStore, OwnerAuth, SecureStore,
    SledStore,
};
pub use policy::{ContractAllowlistMode, EvaluationInput, Policy, PolicyEngine};
pub use poller::{PollerSubscription, StatusPoller, MAX_CONCURRENT_RECEIPTS, POLL_INTERVAL};
pub use prepare::{
    HttpSwapQuoter, IntentPreparer, QuoteRequest, SwapIntent, SwapQuote, SwapQuoter,
    TransferIntent,
};
pub use registry::{CreateSessionParams, SessionRegistry};
pub use remote::RemoteSigner;
pub use rpc::{
    erc20_balance_of, wait_for_receipt, ChainProvider, HttpProvider, InvokeTransactionV1,
    ReceiptStatus,
};
pub use signer::{
    calls_hash, generate_session_keypair, LocalSessionSigner, OwnerSigner, SessionSignature,
    SessionTransactionRequest, SigningContext, TransactionSigner, SIGNATURE_MODE_V2,
    SPEC_VERSION,
};
pub use typed_data::{
    build_emergency_revoke_all, build_register_session_key, build_revoke_session_key,
    build_session_transaction, RegisterSessionKeyInput, DOMAIN_NAME, DOMAIN_VERSION,
};
pub use types::{
    now_unix, token_by_symbol, token_list, ActionKind, ActivityKind, ActivityRecord, Call,
    ExecutionOutcome, NetworkConfig, NetworkId, OwnerCredential, PreparedAction,
    SessionCredential, SignerMode, Token, TxStatus, MAX_ALLOWED_TARGETS,
};
