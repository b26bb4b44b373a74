//! Declare the upstream session account class on Starknet.
//!
//! Reads the deployer credentials and artifact location from the
//! environment, verifies the artifact's class hash against the
//! expected pin, and declares the class if the chain does not already
//! know it.
//!
//! Exit status: 0 when the class is declared or was already declared;
//! non-zero on a class-hash mismatch or any transport failure.

use std::{env, fs, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use starknet::{
    accounts::{Account, ExecutionEncoding, SingleOwnerAccount},
    core::types::{contract::legacy::LegacyContractClass, BlockId, BlockTag, FieldElement},
    providers::{jsonrpc::HttpTransport, JsonRpcClient, Provider},
    signers::{LocalWallet, SigningKey},
};
use tracing::info;
use url::Url;

const DEPLOYER_ADDRESS_ENV: &str = "STARKNET_DEPLOYER_ADDRESS";
const DEPLOYER_PRIVATE_KEY_ENV: &str = "STARKNET_DEPLOYER_PRIVATE_KEY";
const RPC_URL_ENV: &str = "STARKNET_RPC_URL";
const ARTIFACT_PATH_ENV: &str = "UPSTREAM_SESSION_ACCOUNT_PATH";
const EXPECTED_CLASS_HASH_ENV: &str = "EXPECTED_SESSION_ACCOUNT_CLASS_HASH";

const DEFAULT_RPC_URL: &str = "https://starknet-sepolia.public.blastapi.io";
const DEFAULT_ARTIFACT_PATH: &str = "artifacts/session_account.json";

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Starknet JSON-RPC endpoint; overrides the environment.
    #[arg(long)]
    rpc_url: Option<String>,
    /// Path to the compiled session account artifact.
    #[arg(long)]
    artifact: Option<PathBuf>,
    /// Check only; never submit a declare transaction.
    #[arg(long)]
    check_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Cli::parse();

    let rpc_url = args
        .rpc_url
        .or_else(|| env::var(RPC_URL_ENV).ok())
        .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
    let artifact_path = args
        .artifact
        .or_else(|| env::var(ARTIFACT_PATH_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_PATH));

    let raw = fs::read_to_string(&artifact_path)
        .with_context(|| format!("failed to read artifact {}", artifact_path.display()))?;
    let contract_class: LegacyContractClass =
        serde_json::from_str(&raw).context("artifact is not a contract class")?;
    let class_hash = contract_class
        .class_hash()
        .context("failed to compute class hash from artifact")?;
    info!("artifact class hash: {class_hash:#x}");

    if let Ok(expected) = env::var(EXPECTED_CLASS_HASH_ENV) {
        let expected = FieldElement::from_hex_be(expected.trim())
            .with_context(|| format!("{EXPECTED_CLASS_HASH_ENV} is not a felt"))?;
        if expected != class_hash {
            bail!(
                "class hash mismatch: artifact computes {class_hash:#x}, \
                 {EXPECTED_CLASS_HASH_ENV} pins {expected:#x}"
            );
        }
    }

    let url: Url = rpc_url.parse().context("invalid RPC URL")?;
    let provider = JsonRpcClient::new(HttpTransport::new(url));

    if provider
        .get_class(BlockId::Tag(BlockTag::Latest), class_hash)
        .await
        .is_ok()
    {
        info!("class {class_hash:#x} is already declared");
        return Ok(());
    }

    if args.check_only {
        bail!("class {class_hash:#x} is not declared (check-only mode)");
    }

    let deployer_address = env::var(DEPLOYER_ADDRESS_ENV)
        .with_context(|| format!("{DEPLOYER_ADDRESS_ENV} is required to declare"))?;
    let deployer_key = env::var(DEPLOYER_PRIVATE_KEY_ENV)
        .with_context(|| format!("{DEPLOYER_PRIVATE_KEY_ENV} is required to declare"))?;

    let address = FieldElement::from_hex_be(deployer_address.trim())
        .context("deployer address is not a felt")?;
    let key = FieldElement::from_hex_be(deployer_key.trim())
        .context("deployer private key is not a felt")?;
    let chain_id = provider
        .chain_id()
        .await
        .context("failed to fetch chain id")?;

    let wallet = LocalWallet::from(SigningKey::from_secret_scalar(key));
    let account =
        SingleOwnerAccount::new(provider, wallet, address, chain_id, ExecutionEncoding::Legacy);

    let result = account
        .declare_legacy(Arc::new(contract_class))
        .send()
        .await
        .context("declare transaction failed")?;

    info!(
        "declared class {:#x} in transaction {:#x}",
        result.class_hash, result.transaction_hash
    );
    Ok(())
}
