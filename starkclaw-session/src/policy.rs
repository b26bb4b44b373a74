//! Local pre-flight policy evaluation.
//!
//! Every prepared action passes through [`PolicyEngine::evaluate`]
//! before it can be signed. Checks run in a fixed order; the first
//! failure wins and carries a single user-facing reason plus the
//! stable machine code from [`CoreError::code`]. Tightening the
//! policy can only turn previous ALLOW results into DENY, never the
//! reverse.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::codec::{parse_felt, U256};
use crate::error::CoreError;
use crate::keystore::OwnerAuth;
use crate::types::{token_by_symbol, Token};

/// Rolling spend window length.
const SPEND_WINDOW_SECS: i64 = 24 * 60 * 60;

/// How target contracts outside the trusted list are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractAllowlistMode {
    /// Deny anything not on the list.
    #[default]
    TrustedOnly,
    /// Allow with a warning.
    Warn,
    /// Allow silently.
    Open,
}

/// Process-wide policy settings. Mutations require owner auth.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Policy {
    /// Rolling 24 h spend cap, USD cents.
    pub daily_spend_cap_usd_cents: u64,
    /// Per-transaction cap, USD cents.
    pub per_tx_cap_usd_cents: u64,
    /// Recipient allow-list; empty means unrestricted.
    pub allowlisted_recipients: HashSet<String>,
    pub contract_allowlist_mode: ContractAllowlistMode,
    /// Trusted target contracts.
    pub allowed_targets: Vec<String>,
    pub allowed_targets_preset: String,
    pub emergency_lockdown: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            daily_spend_cap_usd_cents: 100_000, // 1000 USD
            per_tx_cap_usd_cents: 10_000,       // 100 USD
            allowlisted_recipients: HashSet::new(),
            contract_allowlist_mode: ContractAllowlistMode::Open,
            allowed_targets: Vec::new(),
            allowed_targets_preset: "default".to_string(),
            emergency_lockdown: false,
        }
    }
}

/// Everything the evaluator needs to judge one action.
#[derive(Clone, Debug)]
pub struct EvaluationInput<'a> {
    pub token: &'a Token,
    pub amount_base_units: U256,
    pub session_limit_base_units: U256,
    /// Target contract of the outgoing call (the token contract for
    /// transfers, the router for swaps).
    pub target_contract: &'a str,
    pub recipient: &'a str,
    /// Local per-session target list; empty means wildcard.
    pub session_allowed_contracts: &'a [String],
}

/// Policy engine: current settings plus the rolling spend window.
pub struct PolicyEngine {
    policy: Mutex<Policy>,
    /// (usd_cents, unix_seconds) per recorded spend.
    window: Mutex<Vec<(u64, i64)>>,
}

impl PolicyEngine {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy: Mutex::new(policy),
            window: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy.lock().expect("policy lock").clone()
    }

    /// Replace the policy. Requires owner authentication.
    pub fn update(&self, _auth: &OwnerAuth, policy: Policy) {
        *self.policy.lock().expect("policy lock") = policy;
    }

    /// Toggle emergency lockdown. Requires owner authentication.
    pub fn set_emergency_lockdown(&self, _auth: &OwnerAuth, enabled: bool) {
        self.policy.lock().expect("policy lock").emergency_lockdown = enabled;
    }

    /// Evaluate an action. `Ok` carries warnings to surface without
    /// blocking; `Err` is a denial with reason and machine code.
    pub fn evaluate(&self, input: &EvaluationInput<'_>, now: i64) -> Result<Vec<String>, CoreError> {
        let policy = self.policy();
        let mut warnings = Vec::new();

        if policy.emergency_lockdown {
            return Err(CoreError::EmergencyLockdown);
        }

        if token_by_symbol(&input.token.symbol).is_none() {
            return Err(CoreError::PolicyDenied(format!(
                "{} is not a supported token",
                input.token.symbol
            )));
        }

        if input.amount_base_units == U256::ZERO {
            return Err(CoreError::PolicyDenied("Amount must be greater than zero".into()));
        }

        if input.amount_base_units > input.session_limit_base_units {
            return Err(CoreError::PolicyDenied(format!(
                "Amount exceeds the session spend limit of {} {} base units",
                input.session_limit_base_units.to_dec_string(),
                input.token.symbol
            )));
        }

        let amount_usd_cents = usd_cents(&input.amount_base_units, input.token);
        if amount_usd_cents > policy.per_tx_cap_usd_cents {
            return Err(CoreError::PolicyDenied(format!(
                "Amount exceeds the per-transaction cap of {} USD",
                policy.per_tx_cap_usd_cents / 100
            )));
        }

        let spent = self.spent_in_window(now);
        if spent.saturating_add(amount_usd_cents) > policy.daily_spend_cap_usd_cents {
            return Err(CoreError::PolicyDenied(format!(
                "Amount exceeds the remaining daily cap of {} USD",
                policy.daily_spend_cap_usd_cents.saturating_sub(spent) / 100
            )));
        }

        if !felt_listed(&policy.allowed_targets, input.target_contract) {
            match policy.contract_allowlist_mode {
                ContractAllowlistMode::TrustedOnly => {
                    return Err(CoreError::PolicyDenied(format!(
                        "Target contract {} is not on the trusted list",
                        input.target_contract
                    )));
                }
                ContractAllowlistMode::Warn => warnings.push(format!(
                    "Target contract {} is not on the trusted list",
                    input.target_contract
                )),
                ContractAllowlistMode::Open => {}
            }
        }

        if !policy.allowlisted_recipients.is_empty()
            && !policy
                .allowlisted_recipients
                .iter()
                .any(|r| felt_eq(r, input.recipient))
        {
            return Err(CoreError::PolicyDenied(
                "Recipient is not on the allow-list".into(),
            ));
        }

        if !input.session_allowed_contracts.is_empty()
            && !felt_listed(input.session_allowed_contracts, input.target_contract)
        {
            return Err(CoreError::PolicyDenied(
                "Target contract is outside this session's contract list".into(),
            ));
        }

        Ok(warnings)
    }

    /// Record a completed spend into the rolling window.
    pub fn record_spend(&self, amount_base_units: &U256, token: &Token, now: i64) {
        let cents = usd_cents(amount_base_units, token);
        let mut window = self.window.lock().expect("window lock");
        window.retain(|(_, ts)| now - ts <= SPEND_WINDOW_SECS);
        window.push((cents, now));
    }

    fn spent_in_window(&self, now: i64) -> u64 {
        let mut window = self.window.lock().expect("window lock");
        window.retain(|(_, ts)| now - ts <= SPEND_WINDOW_SECS);
        window.iter().map(|(cents, _)| *cents).sum()
    }
}

/// USD cents for an amount, using the token's price hint. Saturates
/// instead of overflowing; caps compare correctly either way.
fn usd_cents(amount: &U256, token: &Token) -> u64 {
    // amount * price_cents / 10^decimals, in u128 space.
    if amount.high != 0 {
        return u64::MAX;
    }
    let scaled = amount
        .low
        .checked_mul(token.usd_price_cents as u128)
        .unwrap_or(u128::MAX);
    let divisor = 10u128.checked_pow(token.decimals).unwrap_or(u128::MAX);
    u64::try_from(scaled / divisor).unwrap_or(u64::MAX)
}

/// Compare two felt hex strings by numeric value.
fn felt_eq(a: &str, b: &str) -> bool {
    match (parse_felt(a), parse_felt(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn felt_listed(list: &[String], target: &str) -> bool {
    list.iter().any(|entry| felt_eq(entry, target))
}
