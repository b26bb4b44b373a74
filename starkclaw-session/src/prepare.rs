//! Intent preparation and execution.
//!
//! An intent (from the UI or an agent tool) becomes an immutable
//! [`PreparedAction`] only after token resolution, amount parsing,
//! balance and session binding, and the policy pre-flight. Callers
//! must never execute on a non-ok preparation result. Execution picks
//! the signer variant from the runtime config and records the
//! submission before confirmation exists.

use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use starknet::core::utils::get_selector_from_name;
use tracing::{debug, info};

use crate::activity::{ActivityDraft, ActivityLog};
use crate::codec::{felt_hex, parse_felt, parse_units, U256};
use crate::config::{SignerRuntimeConfig, SignerRuntimeMode};
use crate::error::CoreError;
use crate::keystore::{keys, load_owner, SecureStore};
use crate::policy::{EvaluationInput, PolicyEngine};
use crate::registry::SessionRegistry;
use crate::remote::RemoteSigner;
use crate::rpc::{
    erc20_balance_of, flatten_calls, invoke_v1_hash, ChainProvider, InvokeTransactionV1,
};
use crate::signer::{
    calls_hash, LocalSessionSigner, SessionTransactionRequest, SigningContext,
    TransactionSigner,
};
use crate::typed_data::build_session_transaction;
use crate::types::{
    now_unix, token_by_symbol, ActionKind, ActionPolicy, ActivityKind, Call, ExecutionOutcome,
    NetworkConfig, NetworkId, PreparedAction,
};

/// A transfer intent as it arrives from the shell.
#[derive(Clone, Debug)]
pub struct TransferIntent {
    pub network: NetworkId,
    pub token_symbol: String,
    pub amount_text: String,
    pub to: String,
    /// Bind to this session; `None` resolves the most recent usable one.
    pub session_public_key: Option<String>,
}

/// A swap intent.
#[derive(Clone, Debug)]
pub struct SwapIntent {
    pub network: NetworkId,
    pub sell_token_symbol: String,
    pub buy_token_symbol: String,
    pub sell_amount_text: String,
    pub session_public_key: Option<String>,
}

/// Quote request sent to the aggregator.
#[derive(Clone, Debug)]
pub struct QuoteRequest {
    pub network: NetworkId,
    pub sell_token_address: String,
    pub buy_token_address: String,
    pub sell_amount_base_units: String,
}

/// Aggregator quote.
#[derive(Clone, Debug)]
pub struct SwapQuote {
    pub router_address: String,
    pub buy_amount_base_units: String,
    pub route_summary: String,
}

/// External swap aggregator.
#[async_trait]
pub trait SwapQuoter: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, CoreError>;
}

/// HTTP aggregator client. The router addresses it may return are
/// bounded by the configured preset; anything else is rejected.
pub struct HttpSwapQuoter {
    http: reqwest::Client,
    base_url: String,
    allowed_routers: Vec<String>,
}

impl HttpSwapQuoter {
    pub fn new(base_url: impl Into<String>, allowed_routers: Vec<String>) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::Internal(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            allowed_routers,
        })
    }
}

#[async_trait]
impl SwapQuoter for HttpSwapQuoter {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, CoreError> {
        #[derive(serde::Serialize)]
        #[serde(rename_all = "camelCase")]
        struct WireRequest<'a> {
            network: &'a str,
            sell_token: &'a str,
            buy_token: &'a str,
            sell_amount: &'a str,
        }
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct WireQuote {
            router: String,
            buy_amount: String,
            route: String,
        }

        let network = match request.network {
            NetworkId::Sepolia => "sepolia",
            NetworkId::Mainnet => "mainnet",
        };
        let response = self
            .http
            .post(format!("{}/quote", self.base_url))
            .json(&WireRequest {
                network,
                sell_token: &request.sell_token_address,
                buy_token: &request.buy_token_address,
                sell_amount: &request.sell_amount_base_units,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::TransportTimeout("aggregator quote timed out".into())
                } else {
                    CoreError::Transport(format!("aggregator quote failed: {e}"))
                }
            })?;
        if !response.status().is_success() {
            return Err(CoreError::Rpc(format!(
                "aggregator returned {}",
                response.status()
            )));
        }
        let quote: WireQuote = response
            .json()
            .await
            .map_err(|e| CoreError::Rpc(format!("aggregator quote parse failed: {e}")))?;

        let router = parse_felt(&quote.router)?;
        let trusted = self.allowed_routers.iter().any(|allowed| {
            parse_felt(allowed).map(|a| a == router).unwrap_or(false)
        });
        if !trusted {
            return Err(CoreError::PolicyDenied(format!(
                "Aggregator routed through an unknown contract {}",
                quote.router
            )));
        }
        Ok(SwapQuote {
            router_address: felt_hex(&router),
            buy_amount_base_units: quote.buy_amount,
            route_summary: quote.route,
        })
    }
}

/// The intent preparer and executor.
pub struct IntentPreparer {
    store: Arc<dyn SecureStore>,
    provider: Arc<dyn ChainProvider>,
    registry: Arc<SessionRegistry>,
    policy: Arc<PolicyEngine>,
    activity: Arc<ActivityLog>,
    network: NetworkConfig,
    runtime: SignerRuntimeConfig,
}

impl IntentPreparer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SecureStore>,
        provider: Arc<dyn ChainProvider>,
        registry: Arc<SessionRegistry>,
        policy: Arc<PolicyEngine>,
        activity: Arc<ActivityLog>,
        network: NetworkConfig,
        runtime: SignerRuntimeConfig,
    ) -> Self {
        Self {
            store,
            provider,
            registry,
            policy,
            activity,
            network,
            runtime,
        }
    }

    /// Validate a transfer intent into an immutable prepared action.
    pub async fn prepare_transfer(
        &self,
        intent: &TransferIntent,
    ) -> Result<PreparedAction, CoreError> {
        if intent.network != self.network.network {
            return Err(CoreError::InvalidInput(format!(
                "intent targets {:?} but this wallet is on {:?}",
                intent.network, self.network.network
            )));
        }
        let token = token_by_symbol(&intent.token_symbol).ok_or_else(|| {
            CoreError::InvalidInput(format!("unsupported token {}", intent.token_symbol))
        })?;
        let token_address = token.address_on(intent.network).to_string();

        let amount = parse_units(&intent.amount_text, token.decimals)?;
        let to = parse_felt(&intent.to)?;

        let owner = load_owner(self.store.as_ref())
            .await?
            .ok_or_else(|| CoreError::Unavailable("no owner credential".into()))?;
        let account = parse_felt(&owner.account_address)?;

        let mut warnings = Vec::new();
        let balance =
            erc20_balance_of(self.provider.as_ref(), parse_felt(&token_address)?, account).await?;
        if amount > balance {
            warnings.push(format!(
                "Amount exceeds the current balance of {} base units",
                balance.to_dec_string()
            ));
        }

        let now = now_unix();
        let session = self
            .registry
            .resolve_usable(intent.session_public_key.as_deref(), now)
            .await?;
        let session_limit = U256::from_dec_str(&session.spending_limit_base_units)?;

        let (low, high) = amount.to_felts();
        let calldata = vec![felt_hex(&to), felt_hex(&low), felt_hex(&high)];

        let policy_warnings = self.policy.evaluate(
            &EvaluationInput {
                token: &token,
                amount_base_units: amount,
                session_limit_base_units: session_limit,
                target_contract: &token_address,
                recipient: &intent.to,
                session_allowed_contracts: &session.allowed_contracts,
            },
            now,
        )?;
        warnings.extend(policy_warnings);

        Ok(PreparedAction {
            kind: ActionKind::Erc20Transfer,
            token_symbol: token.symbol.clone(),
            token_address,
            to: felt_hex(&to),
            amount: intent.amount_text.trim().to_string(),
            amount_base_units: amount.to_dec_string(),
            balance_base_units: balance.to_dec_string(),
            calldata,
            session_public_key: session.public_key.clone(),
            policy: ActionPolicy {
                spending_limit_base_units: session.spending_limit_base_units.clone(),
                valid_until: session.valid_until,
            },
            warnings,
            route_summary: None,
            approval_base_units: None,
        })
    }

    /// Validate a swap intent. Extends the transfer flow with an
    /// aggregator quote and a bounded approval hint: the approval is
    /// the exact sell amount, never unlimited.
    pub async fn prepare_swap(
        &self,
        intent: &SwapIntent,
        quoter: &dyn SwapQuoter,
    ) -> Result<PreparedAction, CoreError> {
        if intent.network != self.network.network {
            return Err(CoreError::InvalidInput(format!(
                "intent targets {:?} but this wallet is on {:?}",
                intent.network, self.network.network
            )));
        }
        let sell_token = token_by_symbol(&intent.sell_token_symbol).ok_or_else(|| {
            CoreError::InvalidInput(format!("unsupported token {}", intent.sell_token_symbol))
        })?;
        let buy_token = token_by_symbol(&intent.buy_token_symbol).ok_or_else(|| {
            CoreError::InvalidInput(format!("unsupported token {}", intent.buy_token_symbol))
        })?;
        let sell_address = sell_token.address_on(intent.network).to_string();
        let buy_address = buy_token.address_on(intent.network).to_string();

        let sell_amount = parse_units(&intent.sell_amount_text, sell_token.decimals)?;

        let owner = load_owner(self.store.as_ref())
            .await?
            .ok_or_else(|| CoreError::Unavailable("no owner credential".into()))?;
        let account = parse_felt(&owner.account_address)?;

        let mut warnings = Vec::new();
        let balance =
            erc20_balance_of(self.provider.as_ref(), parse_felt(&sell_address)?, account).await?;
        if sell_amount > balance {
            warnings.push(format!(
                "Amount exceeds the current balance of {} base units",
                balance.to_dec_string()
            ));
        }

        let quote = quoter
            .quote(&QuoteRequest {
                network: intent.network,
                sell_token_address: sell_address.clone(),
                buy_token_address: buy_address.clone(),
                sell_amount_base_units: sell_amount.to_dec_string(),
            })
            .await?;
        let buy_amount = U256::from_dec_str(&quote.buy_amount_base_units)?;

        let now = now_unix();
        let session = self
            .registry
            .resolve_usable(intent.session_public_key.as_deref(), now)
            .await?;
        let session_limit = U256::from_dec_str(&session.spending_limit_base_units)?;

        let (sell_low, sell_high) = sell_amount.to_felts();
        let (buy_low, buy_high) = buy_amount.to_felts();
        let calldata = vec![
            felt_hex(&parse_felt(&sell_address)?),
            felt_hex(&sell_low),
            felt_hex(&sell_high),
            felt_hex(&parse_felt(&buy_address)?),
            felt_hex(&buy_low),
            felt_hex(&buy_high),
        ];

        let policy_warnings = self.policy.evaluate(
            &EvaluationInput {
                token: &sell_token,
                amount_base_units: sell_amount,
                session_limit_base_units: session_limit,
                target_contract: &quote.router_address,
                recipient: &quote.router_address,
                session_allowed_contracts: &session.allowed_contracts,
            },
            now,
        )?;
        warnings.extend(policy_warnings);

        Ok(PreparedAction {
            kind: ActionKind::Swap,
            token_symbol: sell_token.symbol.clone(),
            token_address: sell_address,
            to: quote.router_address.clone(),
            amount: intent.sell_amount_text.trim().to_string(),
            amount_base_units: sell_amount.to_dec_string(),
            balance_base_units: balance.to_dec_string(),
            calldata,
            session_public_key: session.public_key.clone(),
            policy: ActionPolicy {
                spending_limit_base_units: session.spending_limit_base_units.clone(),
                valid_until: session.valid_until,
            },
            warnings,
            route_summary: Some(quote.route_summary),
            approval_base_units: Some(sell_amount.to_dec_string()),
        })
    }

    /// Sign and submit a prepared transfer.
    pub async fn execute_transfer(
        &self,
        prepared: &PreparedAction,
        context: SigningContext,
    ) -> Result<ExecutionOutcome, CoreError> {
        if prepared.kind != ActionKind::Erc20Transfer {
            return Err(CoreError::InvalidInput(
                "execute_transfer only accepts prepared transfers".into(),
            ));
        }

        let owner = load_owner(self.store.as_ref())
            .await?
            .ok_or_else(|| CoreError::Unavailable("no owner credential".into()))?;
        let account = parse_felt(&owner.account_address)?;
        let chain_id = self.network.chain_id()?;

        let call = Call {
            contract_address: parse_felt(&prepared.token_address)?,
            entrypoint: "transfer".into(),
            selector: get_selector_from_name("transfer")
                .map_err(|e| CoreError::Internal(format!("selector derivation failed: {e}")))?,
            calldata: prepared
                .calldata
                .iter()
                .map(|c| parse_felt(c))
                .collect::<Result<Vec<_>, _>>()?,
        };
        let calls = vec![call];

        let nonce = self.provider.get_nonce(account).await?;
        let mut transaction = InvokeTransactionV1 {
            sender_address: account,
            calldata: flatten_calls(&calls),
            max_fee: starknet::core::types::FieldElement::ZERO,
            nonce,
            signature: vec![],
        };
        transaction.max_fee = self.provider.estimate_invoke_fee(&transaction).await?;
        let transaction_hash = invoke_v1_hash(&chain_id, &transaction);

        // Typed-data binding the session signature surfaces on-chain.
        let binding = build_session_transaction(
            &chain_id,
            &account,
            &nonce,
            prepared.policy.valid_until as u64,
            &calls_hash(&calls),
        );
        debug!(hash = %felt_hex(&binding.message_hash()?), "session transaction bound");

        let mobile_action_id = context
            .mobile_action_id
            .clone()
            .unwrap_or_else(fresh_action_id);
        let request = SessionTransactionRequest {
            account_address: account,
            chain_id,
            nonce,
            valid_until: prepared.policy.valid_until as u64,
            calls,
            transaction_hash,
            context: SigningContext {
                mobile_action_id: Some(mobile_action_id.clone()),
                ..context
            },
        };

        let signer = self.build_signer(&prepared.session_public_key).await?;
        let signer_mode = signer.mode();
        let signature = signer.sign_session_transaction(&request).await?;
        transaction.signature = signature.felts.clone();

        let tx_hash = self.provider.add_invoke_transaction(&transaction).await?;
        info!(%tx_hash, mode = ?signer_mode, "transfer submitted");

        if let Some(token) = token_by_symbol(&prepared.token_symbol) {
            if let Ok(amount) = U256::from_dec_str(&prepared.amount_base_units) {
                self.policy.record_spend(&amount, &token, now_unix());
            }
        }

        self.activity
            .append(ActivityDraft {
                subtitle: Some(format!("to {}", prepared.to)),
                tx_hash: Some(tx_hash.clone()),
                signer_mode: Some(signer_mode),
                signer_request_id: signature.request_id.clone(),
                mobile_action_id: Some(mobile_action_id.clone()),
                explorer_url: Some(format!(
                    "{}/tx/{}",
                    self.network.network.explorer_url(),
                    tx_hash
                )),
                ..ActivityDraft::new(
                    ActivityKind::TransferSubmitted,
                    format!("Sent {} {}", prepared.amount, prepared.token_symbol),
                )
            })
            .await?;

        Ok(ExecutionOutcome {
            tx_hash,
            signer_mode,
            signer_request_id: signature.request_id,
            mobile_action_id: Some(mobile_action_id),
        })
    }

    /// Pick the signer variant for the current runtime mode. A signer
    /// error never falls back to the other variant.
    async fn build_signer(
        &self,
        session_public_key: &str,
    ) -> Result<Box<dyn TransactionSigner>, CoreError> {
        match self.runtime.mode() {
            SignerRuntimeMode::Local => {
                let secret = self
                    .store
                    .get(&keys::session_secret(session_public_key))
                    .await?
                    .ok_or_else(|| {
                        CoreError::SessionNotFound(format!(
                            "no private key stored for session {session_public_key}"
                        ))
                    })?;
                Ok(Box::new(LocalSessionSigner::new(&secret, session_public_key)?))
            }
            SignerRuntimeMode::Remote => {
                let config = self.runtime.remote().ok_or_else(|| {
                    CoreError::Internal("remote mode without remote config".into())
                })?;
                Ok(Box::new(RemoteSigner::new(config.clone())?))
            }
        }
    }
}

fn fresh_action_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ma-{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_ids_are_unique() {
        let a = fresh_action_id();
        let b = fresh_action_id();
        assert_ne!(a, b);
        assert!(a.starts_with("ma-"));
    }
}
