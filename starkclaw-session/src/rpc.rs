//! Starknet JSON-RPC client and transaction submission.
//!
//! Single-method JSON-RPC v2 over POST with a fixed request id: this
//! client never multiplexes. Reads use a tighter timeout than writes.
//! HTTP non-2xx and JSON `error` objects both surface as
//! [`CoreError::Rpc`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use starknet::core::crypto::compute_hash_on_elements;
use starknet::core::types::FieldElement;
use starknet::core::utils::{cairo_short_string_to_felt, get_selector_from_name};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::codec::{felt_hex, parse_felt, U256};
use crate::error::CoreError;
use crate::types::{Call, TxStatus};

/// Default timeout for submissions.
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for read-only calls.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Fallback max fee when estimation fails, in wei.
const FALLBACK_MAX_FEE: u128 = 0x2386f26fc10000; // 0.01 ETH

/// Confirmation polling: attempts and spacing.
pub const CONFIRM_RETRIES: u32 = 60;
pub const CONFIRM_INTERVAL: Duration = Duration::from_secs(3);

/// Starknet JSON-RPC error code for an unknown transaction hash.
const TXN_HASH_NOT_FOUND: i64 = 29;

/// Transaction receipt status fields the poller consumes.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub execution_status: Option<String>,
    pub finality_status: Option<String>,
    pub revert_reason: Option<String>,
}

impl ReceiptStatus {
    /// Map receipt fields to an activity status.
    ///
    /// `REVERTED`/`FAILED` are terminal failures; `SUCCEEDED` or any
    /// accepted finality is success; anything else stays pending.
    pub fn to_tx_status(&self) -> TxStatus {
        match self.execution_status.as_deref() {
            Some("REVERTED") | Some("FAILED") => TxStatus::Reverted,
            Some("SUCCEEDED") => TxStatus::Succeeded,
            _ => match self.finality_status.as_deref() {
                Some("ACCEPTED_ON_L1") | Some("ACCEPTED_ON_L2") => TxStatus::Succeeded,
                _ => TxStatus::Pending,
            },
        }
    }
}

/// An invoke v1 transaction ready for submission.
#[derive(Clone, Debug)]
pub struct InvokeTransactionV1 {
    pub sender_address: FieldElement,
    /// `__execute__` calldata (flattened call array).
    pub calldata: Vec<FieldElement>,
    pub max_fee: FieldElement,
    pub nonce: FieldElement,
    pub signature: Vec<FieldElement>,
}

/// Chain access used by the registry, preparer and poller.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn chain_id(&self) -> Result<FieldElement, CoreError>;

    async fn call_contract(
        &self,
        contract_address: FieldElement,
        selector: FieldElement,
        calldata: Vec<FieldElement>,
    ) -> Result<Vec<FieldElement>, CoreError>;

    async fn get_class_hash_at(&self, address: FieldElement) -> Result<FieldElement, CoreError>;

    async fn get_nonce(&self, address: FieldElement) -> Result<FieldElement, CoreError>;

    /// `Ok(None)` when the transaction is not yet known to the node.
    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<ReceiptStatus>, CoreError>;

    /// Estimate the fee for an invoke; implementations may fall back
    /// to a conservative constant when estimation is unavailable.
    async fn estimate_invoke_fee(
        &self,
        transaction: &InvokeTransactionV1,
    ) -> Result<FieldElement, CoreError>;

    /// Submit an invoke transaction, returning its hash.
    async fn add_invoke_transaction(
        &self,
        transaction: &InvokeTransactionV1,
    ) -> Result<String, CoreError>;
}

/// Read an ERC-20 balance as a U256.
pub async fn erc20_balance_of(
    provider: &dyn ChainProvider,
    token: FieldElement,
    account: FieldElement,
) -> Result<U256, CoreError> {
    let selector = get_selector_from_name("balanceOf")
        .map_err(|e| CoreError::Internal(format!("selector derivation failed: {e}")))?;
    let result = provider.call_contract(token, selector, vec![account]).await?;
    if result.len() < 2 {
        return Err(CoreError::Rpc(format!(
            "unexpected balanceOf response of {} felts",
            result.len()
        )));
    }
    U256::from_felts(&result[0], &result[1])
}

/// Flatten calls into `__execute__` calldata:
/// `[n_calls, (to, selector, n_data, data...)*]`.
pub fn flatten_calls(calls: &[Call]) -> Vec<FieldElement> {
    let mut out = vec![FieldElement::from(calls.len() as u64)];
    for call in calls {
        out.push(call.contract_address);
        out.push(call.selector);
        out.push(FieldElement::from(call.calldata.len() as u64));
        out.extend_from_slice(&call.calldata);
    }
    out
}

/// Standard invoke v1 transaction hash.
pub fn invoke_v1_hash(
    chain_id: &FieldElement,
    transaction: &InvokeTransactionV1,
) -> FieldElement {
    let prefix = cairo_short_string_to_felt("invoke").expect("short string");
    compute_hash_on_elements(&[
        prefix,
        FieldElement::ONE, // version
        transaction.sender_address,
        FieldElement::ZERO, // entry point selector, unused in v1
        compute_hash_on_elements(&transaction.calldata),
        transaction.max_fee,
        *chain_id,
        transaction.nonce,
    ])
}

/// Wait for a submitted transaction to reach a terminal status.
///
/// Polls the receipt every [`CONFIRM_INTERVAL`] for up to
/// [`CONFIRM_RETRIES`] attempts. Returns the terminal receipt; errors
/// with a retryable RPC error if the transaction never confirms.
pub async fn wait_for_receipt(
    provider: &dyn ChainProvider,
    tx_hash: &str,
) -> Result<ReceiptStatus, CoreError> {
    for attempt in 1..=CONFIRM_RETRIES {
        match provider.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) if receipt.to_tx_status().is_terminal() => return Ok(receipt),
            Ok(_) => debug!(tx_hash, attempt, "transaction not yet confirmed"),
            Err(e) => debug!(tx_hash, attempt, "receipt fetch failed: {e}"),
        }
        sleep(CONFIRM_INTERVAL).await;
    }
    Err(CoreError::Rpc(format!(
        "transaction {tx_hash} not confirmed after {CONFIRM_RETRIES} attempts"
    )))
}

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    data: Option<Value>,
}

/// HTTP JSON-RPC provider.
pub struct HttpProvider {
    rpc_url: String,
    write_client: reqwest::Client,
    read_client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(rpc_url: impl Into<String>) -> Result<Self, CoreError> {
        let build = |timeout| {
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| CoreError::Internal(format!("http client build failed: {e}")))
        };
        Ok(Self {
            rpc_url: rpc_url.into(),
            write_client: build(WRITE_TIMEOUT)?,
            read_client: build(READ_TIMEOUT)?,
        })
    }

    async fn rpc_call(
        &self,
        client: &reqwest::Client,
        method: &str,
        params: Value,
    ) -> Result<Value, CoreError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = client
            .post(&self.rpc_url)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::TransportTimeout(format!("{method} timed out"))
                } else {
                    CoreError::Transport(format!("{method} failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let snippet: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(CoreError::Rpc(format!("{method} returned {status}: {snippet}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Rpc(format!("{method} response parse failed: {e}")))?;

        if let Some(error) = body.error {
            return Err(CoreError::Rpc(format!(
                "{method} error {}: {}{}",
                error.code,
                error.message,
                error
                    .data
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default()
            )));
        }
        body.result
            .ok_or_else(|| CoreError::Rpc(format!("{method} returned an empty result")))
    }

    fn invoke_json(transaction: &InvokeTransactionV1) -> Value {
        json!({
            "type": "INVOKE",
            "sender_address": felt_hex(&transaction.sender_address),
            "calldata": transaction.calldata.iter().map(felt_hex).collect::<Vec<_>>(),
            "max_fee": felt_hex(&transaction.max_fee),
            "version": "0x1",
            "signature": transaction.signature.iter().map(felt_hex).collect::<Vec<_>>(),
            "nonce": felt_hex(&transaction.nonce),
        })
    }

    fn parse_felt_result(value: &Value, what: &str) -> Result<FieldElement, CoreError> {
        value
            .as_str()
            .ok_or_else(|| CoreError::Rpc(format!("{what} is not a string")))
            .and_then(parse_felt_rpc)
    }
}

fn parse_felt_rpc(s: &str) -> Result<FieldElement, CoreError> {
    parse_felt(s).map_err(|e| CoreError::Rpc(format!("malformed felt in RPC response: {e}")))
}

#[async_trait]
impl ChainProvider for HttpProvider {
    async fn chain_id(&self) -> Result<FieldElement, CoreError> {
        let result = self
            .rpc_call(&self.read_client, "starknet_chainId", json!([]))
            .await?;
        Self::parse_felt_result(&result, "chain id")
    }

    async fn call_contract(
        &self,
        contract_address: FieldElement,
        selector: FieldElement,
        calldata: Vec<FieldElement>,
    ) -> Result<Vec<FieldElement>, CoreError> {
        let params = json!({
            "request": {
                "contract_address": felt_hex(&contract_address),
                "entry_point_selector": felt_hex(&selector),
                "calldata": calldata.iter().map(felt_hex).collect::<Vec<_>>(),
            },
            "block_id": "latest",
        });
        let result = self
            .rpc_call(&self.read_client, "starknet_call", params)
            .await?;
        let values = result
            .as_array()
            .ok_or_else(|| CoreError::Rpc("starknet_call result is not an array".into()))?;
        values
            .iter()
            .map(|v| Self::parse_felt_result(v, "call result element"))
            .collect()
    }

    async fn get_class_hash_at(&self, address: FieldElement) -> Result<FieldElement, CoreError> {
        let params = json!({
            "contract_address": felt_hex(&address),
            "block_id": "latest",
        });
        let result = self
            .rpc_call(&self.read_client, "starknet_getClassHashAt", params)
            .await?;
        Self::parse_felt_result(&result, "class hash")
    }

    async fn get_nonce(&self, address: FieldElement) -> Result<FieldElement, CoreError> {
        let params = json!({
            "contract_address": felt_hex(&address),
            "block_id": "latest",
        });
        let result = self
            .rpc_call(&self.read_client, "starknet_getNonce", params)
            .await?;
        Self::parse_felt_result(&result, "nonce")
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<ReceiptStatus>, CoreError> {
        let params = json!({ "transaction_hash": tx_hash });
        match self
            .rpc_call(&self.read_client, "starknet_getTransactionReceipt", params)
            .await
        {
            Ok(result) => {
                let receipt: ReceiptStatus = serde_json::from_value(result)
                    .map_err(|e| CoreError::Rpc(format!("receipt parse failed: {e}")))?;
                Ok(Some(receipt))
            }
            Err(CoreError::Rpc(message))
                if message.contains(&format!("error {TXN_HASH_NOT_FOUND}:")) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn estimate_invoke_fee(
        &self,
        transaction: &InvokeTransactionV1,
    ) -> Result<FieldElement, CoreError> {
        let params = json!({
            "request": [Self::invoke_json(transaction)],
            "simulation_flags": ["SKIP_VALIDATE"],
            "block_id": "latest",
        });
        match self
            .rpc_call(&self.read_client, "starknet_estimateFee", params)
            .await
        {
            Ok(result) => {
                let fee = result
                    .get(0)
                    .and_then(|r| r.get("overall_fee"))
                    .and_then(|f| f.as_str())
                    .and_then(|f| parse_felt(f).ok());
                match fee {
                    Some(fee) => Ok(fee),
                    None => {
                        warn!("fee estimate response unreadable, using fallback");
                        Ok(FieldElement::from(FALLBACK_MAX_FEE))
                    }
                }
            }
            Err(e) => {
                warn!("fee estimation failed ({e}), using fallback");
                Ok(FieldElement::from(FALLBACK_MAX_FEE))
            }
        }
    }

    async fn add_invoke_transaction(
        &self,
        transaction: &InvokeTransactionV1,
    ) -> Result<String, CoreError> {
        let params = json!({ "invoke_transaction": Self::invoke_json(transaction) });
        let result = self
            .rpc_call(&self.write_client, "starknet_addInvokeTransaction", params)
            .await?;
        result
            .get("transaction_hash")
            .and_then(|h| h.as_str())
            .map(str::to_string)
            .ok_or_else(|| CoreError::Rpc("submission response missing transaction_hash".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(execution: Option<&str>, finality: Option<&str>) -> ReceiptStatus {
        ReceiptStatus {
            execution_status: execution.map(str::to_string),
            finality_status: finality.map(str::to_string),
            revert_reason: None,
        }
    }

    #[test]
    fn receipt_status_mapping() {
        assert_eq!(receipt(Some("SUCCEEDED"), None).to_tx_status(), TxStatus::Succeeded);
        assert_eq!(receipt(Some("REVERTED"), None).to_tx_status(), TxStatus::Reverted);
        assert_eq!(receipt(Some("FAILED"), None).to_tx_status(), TxStatus::Reverted);
        assert_eq!(
            receipt(None, Some("ACCEPTED_ON_L2")).to_tx_status(),
            TxStatus::Succeeded
        );
        assert_eq!(
            receipt(None, Some("ACCEPTED_ON_L1")).to_tx_status(),
            TxStatus::Succeeded
        );
        assert_eq!(receipt(None, None).to_tx_status(), TxStatus::Pending);
        assert_eq!(receipt(None, Some("RECEIVED")).to_tx_status(), TxStatus::Pending);
    }

    #[test]
    fn flatten_single_transfer_call() {
        let call = Call {
            contract_address: FieldElement::from(0x70c0u64),
            entrypoint: "transfer".into(),
            selector: FieldElement::from(0x5e1u64),
            calldata: vec![
                FieldElement::from(0xbeefu64),
                FieldElement::from(0xF4240u64),
                FieldElement::ZERO,
            ],
        };
        let flat = flatten_calls(&[call]);
        assert_eq!(flat.len(), 1 + 3 + 3);
        assert_eq!(flat[0], FieldElement::ONE);
        assert_eq!(flat[3], FieldElement::THREE);
    }

    #[test]
    fn invoke_hash_binds_chain_and_nonce() {
        let transaction = InvokeTransactionV1 {
            sender_address: FieldElement::from(0x1u64),
            calldata: vec![FieldElement::from(0x2u64)],
            max_fee: FieldElement::from(0x3u64),
            nonce: FieldElement::from(0x4u64),
            signature: vec![],
        };
        let sepolia = FieldElement::from(0x534e5f5345504f4c4941u128);
        let mainnet = FieldElement::from(0x534e5f4d41494eu64);
        assert_ne!(
            invoke_v1_hash(&sepolia, &transaction),
            invoke_v1_hash(&mainnet, &transaction)
        );

        let mut bumped = transaction.clone();
        bumped.nonce = FieldElement::from(0x5u64);
        assert_ne!(
            invoke_v1_hash(&sepolia, &transaction),
            invoke_v1_hash(&sepolia, &bumped)
        );
    }
}
