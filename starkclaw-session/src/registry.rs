//! Session credential lifecycle.
//!
//! Creation is local and cheap; registration, revocation and the
//! emergency kill-switch are owner-signed on-chain transactions
//! against the session account contract. Transaction hashes are
//! persisted before confirmation is awaited so an interrupted app
//! resumes with a submitted-but-unconfirmed record rather than a
//! silent gap. On-chain validity reads fail closed.

use std::sync::Arc;

use starknet::core::types::FieldElement;
use starknet::core::utils::get_selector_from_name;
use tracing::{debug, info, warn};

use crate::activity::{ActivityDraft, ActivityLog, StatusUpdate};
use crate::codec::{felt_hex, parse_felt, U256};
use crate::error::CoreError;
use crate::keystore::{keys, load_owner, OwnerAuth, SecureStore};
use crate::rpc::{
    flatten_calls, invoke_v1_hash, wait_for_receipt, ChainProvider, InvokeTransactionV1,
};
use crate::signer::{generate_session_keypair, OwnerSigner};
use crate::typed_data::{
    build_emergency_revoke_all, build_register_session_key, build_revoke_session_key,
    RegisterSessionKeyInput,
};
use crate::types::{
    now_unix, token_by_symbol, ActivityKind, Call, NetworkConfig, SessionCredential,
    TxStatus, MAX_ALLOWED_TARGETS, MIN_SESSION_VALIDITY_SECS,
};

/// Per-session call budget registered on-chain.
const SESSION_MAX_CALLS: u64 = 100;

/// Entrypoints a session key is allowed to reach. The account
/// contract enforces this selector set; per-contract restrictions are
/// a local concern only.
const SESSION_ENTRYPOINTS: [&str; 4] = ["transfer", "transferFrom", "swap", "execute"];

/// Parameters for creating a local session credential.
#[derive(Clone, Debug)]
pub struct CreateSessionParams {
    pub token_symbol: String,
    /// Spending limit in token base units, decimal string.
    pub spending_limit_base_units: String,
    pub valid_for_seconds: i64,
    pub allowed_contracts: Vec<String>,
}

/// Session credential registry.
pub struct SessionRegistry {
    store: Arc<dyn SecureStore>,
    provider: Arc<dyn ChainProvider>,
    activity: Arc<ActivityLog>,
    network: NetworkConfig,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SecureStore>,
        provider: Arc<dyn ChainProvider>,
        activity: Arc<ActivityLog>,
        network: NetworkConfig,
    ) -> Self {
        Self {
            store,
            provider,
            activity,
            network,
        }
    }

    /// All credentials, newest first.
    pub async fn list_session_keys(&self) -> Result<Vec<SessionCredential>, CoreError> {
        let mut index = self.load_index().await?;
        index.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(index)
    }

    /// Generate and persist a new session credential. Local only; the
    /// key has no authority until registered on-chain.
    pub async fn create_local(
        &self,
        params: &CreateSessionParams,
    ) -> Result<SessionCredential, CoreError> {
        if params.valid_for_seconds < MIN_SESSION_VALIDITY_SECS {
            return Err(CoreError::InvalidInput(format!(
                "session must be valid for at least {MIN_SESSION_VALIDITY_SECS} seconds"
            )));
        }
        if params.allowed_contracts.len() > MAX_ALLOWED_TARGETS {
            return Err(CoreError::InvalidInput(format!(
                "at most {MAX_ALLOWED_TARGETS} allowed contracts"
            )));
        }
        for contract in &params.allowed_contracts {
            parse_felt(contract)?;
        }
        let limit = U256::from_dec_str(&params.spending_limit_base_units)?;
        let token = token_by_symbol(&params.token_symbol).ok_or_else(|| {
            CoreError::InvalidInput(format!("unsupported token {}", params.token_symbol))
        })?;

        let (private_key, public_key) = generate_session_keypair();
        self.store
            .set(&keys::session_secret(&public_key), &private_key)
            .await?;

        let now = now_unix();
        let credential = SessionCredential {
            public_key: public_key.clone(),
            token_symbol: token.symbol.clone(),
            token_address: token.address_on(self.network.network).to_string(),
            spending_limit_base_units: limit.to_dec_string(),
            valid_after: now,
            valid_until: now + params.valid_for_seconds,
            allowed_contracts: params.allowed_contracts.clone(),
            created_at: now,
            registered_at: None,
            revoked_at: None,
            last_tx_hash: None,
        };

        let mut index = self.load_index().await?;
        index.push(credential.clone());
        self.save_index(&index).await?;

        self.activity
            .append(ActivityDraft {
                subtitle: Some(format!("{} session", token.symbol)),
                ..ActivityDraft::new(ActivityKind::SessionCreated, "Session key created")
            })
            .await?;

        info!(session = %public_key, "created local session credential");
        Ok(credential)
    }

    /// Register a credential with the account contract.
    ///
    /// The on-chain API accepts entrypoint selectors only; a
    /// credential carrying per-contract restrictions is rejected here
    /// rather than silently down-converted.
    pub async fn register_onchain(
        &self,
        auth: &OwnerAuth,
        public_key: &str,
    ) -> Result<String, CoreError> {
        let mut index = self.load_index().await?;
        let credential = find_credential(&index, public_key)?.clone();
        if !credential.allowed_contracts.is_empty() {
            return Err(CoreError::InvalidInput(
                "the on-chain API does not enforce per-contract restrictions; \
                 clear the allowed-contracts list to register (it is still \
                 enforced locally at prepare time)"
                    .into(),
            ));
        }

        let limit = U256::from_dec_str(&credential.spending_limit_base_units)?;
        let session_key = parse_felt(&credential.public_key)?;
        let account_address = parse_felt(&auth.account_address)?;
        let chain_id = self.network.chain_id()?;

        // Deterministic typed-data payload for the owner's review and
        // signature; the account verifies the invoke signature itself.
        let payload = build_register_session_key(&RegisterSessionKeyInput {
            chain_id,
            account_address,
            session_key,
            valid_after: credential.valid_after as u64,
            valid_until: credential.valid_until as u64,
            spending_limit: limit,
            spending_token: parse_felt(&credential.token_address)?,
            allowed_contracts: vec![],
        })?;
        debug!(hash = %felt_hex(&payload.message_hash()?), "register payload built");

        let mut calldata = vec![
            session_key,
            FieldElement::from(credential.valid_until as u64),
            FieldElement::from(SESSION_MAX_CALLS),
            FieldElement::from(SESSION_ENTRYPOINTS.len() as u64),
        ];
        for entrypoint in SESSION_ENTRYPOINTS {
            calldata.push(selector(entrypoint)?);
        }
        let call = Call {
            contract_address: account_address,
            entrypoint: "add_or_update_session_key".into(),
            selector: selector("add_or_update_session_key")?,
            calldata,
        };

        let tx_hash = self.execute_owner(auth, vec![call]).await?;

        // Persist the hash before waiting on confirmation.
        find_credential_mut(&mut index, public_key)?.last_tx_hash = Some(tx_hash.clone());
        self.save_index(&index).await?;
        self.activity
            .append(ActivityDraft {
                tx_hash: Some(tx_hash.clone()),
                subtitle: Some(format!("{} session", credential.token_symbol)),
                ..ActivityDraft::new(ActivityKind::SessionRegistered, "Session key registered")
            })
            .await?;

        self.confirm(&tx_hash).await?;

        let mut index = self.load_index().await?;
        find_credential_mut(&mut index, public_key)?.registered_at = Some(now_unix());
        self.save_index(&index).await?;
        info!(session = %public_key, %tx_hash, "session registered on-chain");
        Ok(tx_hash)
    }

    /// Revoke one session on-chain; deletes the local private key
    /// once the revocation confirms.
    pub async fn revoke_onchain(
        &self,
        auth: &OwnerAuth,
        public_key: &str,
    ) -> Result<String, CoreError> {
        let mut index = self.load_index().await?;
        let credential = find_credential(&index, public_key)?.clone();

        let session_key = parse_felt(&credential.public_key)?;
        let account_address = parse_felt(&auth.account_address)?;
        let payload =
            build_revoke_session_key(&self.network.chain_id()?, &account_address, &session_key);
        debug!(hash = %felt_hex(&payload.message_hash()?), "revoke payload built");

        let call = Call {
            contract_address: account_address,
            entrypoint: "revoke_session_key".into(),
            selector: selector("revoke_session_key")?,
            calldata: vec![session_key],
        };
        let tx_hash = self.execute_owner(auth, vec![call]).await?;

        find_credential_mut(&mut index, public_key)?.last_tx_hash = Some(tx_hash.clone());
        self.save_index(&index).await?;
        self.activity
            .append(ActivityDraft {
                tx_hash: Some(tx_hash.clone()),
                ..ActivityDraft::new(ActivityKind::SessionRevoked, "Session key revoked")
            })
            .await?;

        self.confirm(&tx_hash).await?;

        let mut index = self.load_index().await?;
        find_credential_mut(&mut index, public_key)?.revoked_at = Some(now_unix());
        self.save_index(&index).await?;
        self.store
            .delete(&keys::session_secret(&credential.public_key))
            .await?;
        info!(session = %public_key, %tx_hash, "session revoked on-chain");
        Ok(tx_hash)
    }

    /// Revoke every session key in a single on-chain call, then wipe
    /// all local session secrets.
    pub async fn emergency_revoke_all_onchain(
        &self,
        auth: &OwnerAuth,
    ) -> Result<String, CoreError> {
        let account_address = parse_felt(&auth.account_address)?;
        let payload = build_emergency_revoke_all(
            &self.network.chain_id()?,
            &account_address,
            now_unix() as u64,
            now_unix() as u64,
        );
        debug!(hash = %felt_hex(&payload.message_hash()?), "emergency payload built");

        let call = Call {
            contract_address: account_address,
            entrypoint: "emergency_revoke_all".into(),
            selector: selector("emergency_revoke_all")?,
            calldata: vec![],
        };
        let tx_hash = self.execute_owner(auth, vec![call]).await?;
        self.activity
            .append(ActivityDraft {
                tx_hash: Some(tx_hash.clone()),
                ..ActivityDraft::new(ActivityKind::EmergencyRevoke, "All session keys revoked")
            })
            .await?;

        self.confirm(&tx_hash).await?;

        let now = now_unix();
        let mut index = self.load_index().await?;
        for credential in index.iter_mut() {
            if credential.revoked_at.is_none() {
                credential.revoked_at = Some(now);
            }
            self.store
                .delete(&keys::session_secret(&credential.public_key))
                .await?;
        }
        self.save_index(&index).await?;
        info!(%tx_hash, "emergency revoke confirmed, all session secrets wiped");
        Ok(tx_hash)
    }

    /// Query the account contract for a session's live validity.
    ///
    /// Any RPC failure yields `false`: an unreachable chain must not
    /// widen authority.
    pub async fn is_valid_onchain(&self, public_key: &str) -> bool {
        let result = self.query_session_data(public_key).await;
        match result {
            Ok((valid_until, max_calls, calls_used)) => {
                valid_until > now_unix() as u64 && calls_used < max_calls
            }
            Err(e) => {
                warn!(session = %public_key, "on-chain validity check failed closed: {e}");
                false
            }
        }
    }

    /// Resolve the credential a transfer should bind to: the supplied
    /// key, or the most recent locally-usable one.
    pub async fn resolve_usable(
        &self,
        requested: Option<&str>,
        now: i64,
    ) -> Result<SessionCredential, CoreError> {
        let index = self.list_session_keys().await?;
        match requested {
            Some(public_key) => {
                let requested_felt = parse_felt(public_key)?;
                let credential = index
                    .iter()
                    .find(|c| {
                        parse_felt(&c.public_key).map(|pk| pk == requested_felt).unwrap_or(false)
                    })
                    .ok_or_else(|| {
                        CoreError::SessionNotFound(format!("no session key {public_key}"))
                    })?;
                if !credential.is_usable_at(now) {
                    return Err(CoreError::SessionExpired(format!(
                        "session {public_key} is revoked or outside its validity window"
                    )));
                }
                Ok(credential.clone())
            }
            None => index
                .into_iter()
                .find(|c| c.is_usable_at(now))
                .ok_or_else(|| {
                    CoreError::SessionNotFound(
                        "no usable session key; create and register one first".into(),
                    )
                }),
        }
    }

    async fn query_session_data(
        &self,
        public_key: &str,
    ) -> Result<(u64, u64, u64), CoreError> {
        let owner = load_owner(self.store.as_ref())
            .await?
            .ok_or_else(|| CoreError::Unavailable("no owner credential".into()))?;
        let account = parse_felt(&owner.account_address)?;
        let session_key = parse_felt(public_key)?;
        let result = self
            .provider
            .call_contract(account, selector("get_session_data")?, vec![session_key])
            .await?;
        if result.len() < 3 {
            return Err(CoreError::Rpc(format!(
                "get_session_data returned {} felts, expected at least 3",
                result.len()
            )));
        }
        let as_u64 = |f: &FieldElement, what: &str| {
            crate::codec::felt_to_u128(f)
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| CoreError::Rpc(format!("{what} out of range")))
        };
        Ok((
            as_u64(&result[0], "valid_until")?,
            as_u64(&result[1], "max_calls")?,
            as_u64(&result[2], "calls_used")?,
        ))
    }

    /// Assemble, owner-sign and submit an invoke for administrative
    /// calls. Owner transactions carry the bare `[r, s]` signature.
    async fn execute_owner(
        &self,
        auth: &OwnerAuth,
        calls: Vec<Call>,
    ) -> Result<String, CoreError> {
        let owner = load_owner(self.store.as_ref())
            .await?
            .ok_or_else(|| CoreError::Unavailable("no owner credential".into()))?;
        if owner.account_address != auth.account_address {
            return Err(CoreError::Internal(
                "owner auth does not match the stored credential".into(),
            ));
        }
        let signer = OwnerSigner::from_private_key(&owner.private_key)?;
        let sender = parse_felt(&owner.account_address)?;
        let chain_id = self.network.chain_id()?;
        let nonce = self.provider.get_nonce(sender).await?;

        let mut transaction = InvokeTransactionV1 {
            sender_address: sender,
            calldata: flatten_calls(&calls),
            max_fee: FieldElement::ZERO,
            nonce,
            signature: vec![],
        };
        transaction.max_fee = self.provider.estimate_invoke_fee(&transaction).await?;
        let hash = invoke_v1_hash(&chain_id, &transaction);
        transaction.signature = signer.sign_hash(&hash)?;

        self.provider.add_invoke_transaction(&transaction).await
    }

    /// Await confirmation and reflect the terminal status into the
    /// activity log. Errors leave the record pending
    /// (submitted-but-unconfirmed) and surface to the caller.
    async fn confirm(&self, tx_hash: &str) -> Result<(), CoreError> {
        let receipt = wait_for_receipt(self.provider.as_ref(), tx_hash).await?;
        let status = receipt.to_tx_status();
        self.activity
            .update_by_tx_hash(
                tx_hash,
                StatusUpdate {
                    status,
                    execution_status: receipt.execution_status.clone(),
                    revert_reason: receipt.revert_reason.clone(),
                },
            )
            .await?;
        if status == TxStatus::Reverted {
            return Err(CoreError::OnchainInvalid(format!(
                "transaction {tx_hash} reverted: {}",
                receipt.revert_reason.unwrap_or_else(|| "unknown reason".into())
            )));
        }
        Ok(())
    }

    async fn load_index(&self) -> Result<Vec<SessionCredential>, CoreError> {
        match self.store.get(keys::SESSION_INDEX).await? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| CoreError::Internal(format!("session index is corrupt: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    async fn save_index(&self, index: &[SessionCredential]) -> Result<(), CoreError> {
        let json = serde_json::to_string(index)
            .map_err(|e| CoreError::Internal(format!("session index serialize failed: {e}")))?;
        self.store.set(keys::SESSION_INDEX, &json).await
    }
}

fn selector(name: &str) -> Result<FieldElement, CoreError> {
    get_selector_from_name(name)
        .map_err(|e| CoreError::Internal(format!("selector derivation failed for {name}: {e}")))
}

fn find_credential<'a>(
    index: &'a [SessionCredential],
    public_key: &str,
) -> Result<&'a SessionCredential, CoreError> {
    index
        .iter()
        .find(|c| c.public_key == public_key)
        .ok_or_else(|| CoreError::SessionNotFound(format!("no session key {public_key}")))
}

fn find_credential_mut<'a>(
    index: &'a mut [SessionCredential],
    public_key: &str,
) -> Result<&'a mut SessionCredential, CoreError> {
    index
        .iter_mut()
        .find(|c| c.public_key == public_key)
        .ok_or_else(|| CoreError::SessionNotFound(format!("no session key {public_key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryStore;

    fn params() -> CreateSessionParams {
        CreateSessionParams {
            token_symbol: "USDC".into(),
            spending_limit_base_units: "10000000".into(),
            valid_for_seconds: 3600,
            allowed_contracts: vec![],
        }
    }

    struct NoopProvider;

    #[async_trait::async_trait]
    impl ChainProvider for NoopProvider {
        async fn chain_id(&self) -> Result<FieldElement, CoreError> {
            Err(CoreError::Rpc("offline".into()))
        }
        async fn call_contract(
            &self,
            _: FieldElement,
            _: FieldElement,
            _: Vec<FieldElement>,
        ) -> Result<Vec<FieldElement>, CoreError> {
            Err(CoreError::Rpc("offline".into()))
        }
        async fn get_class_hash_at(&self, _: FieldElement) -> Result<FieldElement, CoreError> {
            Err(CoreError::Rpc("offline".into()))
        }
        async fn get_nonce(&self, _: FieldElement) -> Result<FieldElement, CoreError> {
            Err(CoreError::Rpc("offline".into()))
        }
        async fn get_transaction_receipt(
            &self,
            _: &str,
        ) -> Result<Option<crate::rpc::ReceiptStatus>, CoreError> {
            Err(CoreError::Rpc("offline".into()))
        }
        async fn estimate_invoke_fee(
            &self,
            _: &InvokeTransactionV1,
        ) -> Result<FieldElement, CoreError> {
            Err(CoreError::Rpc("offline".into()))
        }
        async fn add_invoke_transaction(
            &self,
            _: &InvokeTransactionV1,
        ) -> Result<String, CoreError> {
            Err(CoreError::Rpc("offline".into()))
        }
    }

    async fn registry() -> SessionRegistry {
        let store: Arc<dyn SecureStore> = Arc::new(MemoryStore::new());
        let activity = Arc::new(ActivityLog::load(store.clone()).await.expect("activity"));
        SessionRegistry::new(
            store,
            Arc::new(NoopProvider),
            activity,
            NetworkConfig::for_network(crate::types::NetworkId::Sepolia),
        )
    }

    #[tokio::test]
    async fn create_local_persists_secret_and_credential() {
        let registry = registry().await;
        let credential = registry.create_local(&params()).await.expect("create");

        assert_eq!(credential.token_symbol, "USDC");
        assert_eq!(credential.spending_limit_base_units, "10000000");
        assert!(credential.valid_until - credential.valid_after >= 3600);

        let secret = registry
            .store
            .get(&keys::session_secret(&credential.public_key))
            .await
            .expect("get");
        assert!(secret.is_some());

        let listed = registry.list_session_keys().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].public_key, credential.public_key);
    }

    #[tokio::test]
    async fn create_local_enforces_bounds() {
        let registry = registry().await;

        let mut short = params();
        short.valid_for_seconds = 30;
        assert!(registry.create_local(&short).await.is_err());

        let mut crowded = params();
        crowded.allowed_contracts = (0..5).map(|i| format!("0x{i}")).collect();
        assert!(registry.create_local(&crowded).await.is_err());

        let mut bad_limit = params();
        bad_limit.spending_limit_base_units = "-5".into();
        assert!(registry.create_local(&bad_limit).await.is_err());

        let mut unknown_token = params();
        unknown_token.token_symbol = "DOGE".into();
        assert!(registry.create_local(&unknown_token).await.is_err());
    }

    #[tokio::test]
    async fn list_is_sorted_newest_first() {
        let registry = registry().await;
        let first = registry.create_local(&params()).await.expect("create");
        // Force distinct created_at ordering.
        {
            let mut index = registry.load_index().await.expect("index");
            index[0].created_at -= 10;
            registry.save_index(&index).await.expect("save");
        }
        let second = registry.create_local(&params()).await.expect("create");
        let listed = registry.list_session_keys().await.expect("list");
        assert_eq!(listed[0].public_key, second.public_key);
        assert_eq!(listed[1].public_key, first.public_key);
    }

    #[tokio::test]
    async fn register_rejects_contract_restrictions() {
        let registry = registry().await;
        let mut with_contracts = params();
        with_contracts.allowed_contracts = vec!["0x0444".into()];
        let credential = registry
            .create_local(&with_contracts)
            .await
            .expect("create");

        let auth = OwnerAuth {
            account_address: "0x1".into(),
        };
        let err = registry
            .register_onchain(&auth, &credential.public_key)
            .await
            .expect_err("must reject");
        assert_eq!(err.code(), "INVALID_INPUT");
        assert!(err.to_string().contains("per-contract"));
    }

    #[tokio::test]
    async fn onchain_validity_fails_closed_on_rpc_error() {
        let registry = registry().await;
        let credential = registry.create_local(&params()).await.expect("create");
        // NoopProvider errors on every call; validity must be false.
        assert!(!registry.is_valid_onchain(&credential.public_key).await);
    }

    #[tokio::test]
    async fn resolve_usable_prefers_requested_key() {
        let registry = registry().await;
        let credential = registry.create_local(&params()).await.expect("create");
        let now = now_unix();

        let resolved = registry
            .resolve_usable(Some(&credential.public_key), now)
            .await
            .expect("resolve");
        assert_eq!(resolved.public_key, credential.public_key);

        let err = registry
            .resolve_usable(Some("0xdoesnotexist"), now)
            .await
            .expect_err("unknown key");
        assert_eq!(err.code(), "INVALID_INPUT"); // not parseable as felt

        let err = registry
            .resolve_usable(Some("0x99999"), now)
            .await
            .expect_err("unknown key");
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn resolve_usable_skips_revoked() {
        let registry = registry().await;
        let credential = registry.create_local(&params()).await.expect("create");
        {
            let mut index = registry.load_index().await.expect("index");
            index[0].revoked_at = Some(now_unix());
            registry.save_index(&index).await.expect("save");
        }
        let err = registry
            .resolve_usable(None, now_unix())
            .await
            .expect_err("no usable key");
        assert_eq!(err.code(), "SESSION_NOT_FOUND");

        let err = registry
            .resolve_usable(Some(&credential.public_key), now_unix())
            .await
            .expect_err("revoked key");
        assert_eq!(err.code(), "SESSION_EXPIRED");
    }
}
