//! Error types for the session authority core.

use thiserror::Error;

/// Aggregated error type for the session core.
///
/// Every variant maps to a stable machine code via [`CoreError::code`];
/// user-facing text lives in the `Display` impl. Callers branch on the
/// code, never on the message.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or out-of-range caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A local policy check denied the action.
    #[error("{0}")]
    PolicyDenied(String),

    /// All spending is blocked while emergency lockdown is enabled.
    #[error("Emergency lockdown is enabled")]
    EmergencyLockdown,

    /// No usable session credential could be resolved.
    #[error("no usable session key: {0}")]
    SessionNotFound(String),

    /// The resolved session credential is outside its validity window.
    #[error("session key expired: {0}")]
    SessionExpired(String),

    /// The account contract reports the session as unusable.
    #[error("session key is not valid on-chain: {0}")]
    OnchainInvalid(String),

    /// The account balance cannot cover the requested amount.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// A network request exceeded its deadline.
    #[error("request timed out: {0}")]
    TransportTimeout(String),

    /// A network request failed below the protocol layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote signer rejected our authentication.
    #[error("remote signer rejected authentication: {0}")]
    SignerAuth(String),

    /// The remote signer's own policy denied the signing request.
    #[error("remote signer denied the request: {0}")]
    SignerPolicyDenied(String),

    /// The remote signer flagged the request nonce as replayed.
    #[error("remote signer rejected request nonce as replayed: {0}")]
    SignerReplayNonce(String),

    /// The remote signer's response failed shape validation.
    #[error("malformed signer response: {0}")]
    SignerMalformedResponse(String),

    /// The session expired before the signing request was sent.
    #[error("session validity expired before signing: {0}")]
    SignerValidityExpired(String),

    /// The remote signer returned a different session public key than
    /// a previous response in the same signer lifetime.
    #[error("remote signer public key changed: {0}")]
    SignerPubkeyChanged(String),

    /// JSON-RPC level failure (HTTP non-2xx or an `error` object).
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Remote-signer transport policy violation (non-https, non-loopback).
    #[error("insecure signer transport: {0}")]
    ConfigInsecureTransport(String),

    /// mTLS is mandatory in production remote mode.
    #[error("mTLS is required: {0}")]
    ConfigMtlsRequired(String),

    /// Remote mode selected without a proxy URL.
    #[error("remote signer proxy URL is missing: {0}")]
    ConfigMissingProxyUrl(String),

    /// A required collaborator (keystore, credentials) is unavailable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Invariant violation inside the core.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "INVALID_INPUT",
            CoreError::PolicyDenied(_) => "POLICY_DENIED",
            CoreError::EmergencyLockdown => "EMERGENCY_LOCKDOWN",
            CoreError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            CoreError::SessionExpired(_) => "SESSION_EXPIRED",
            CoreError::OnchainInvalid(_) => "ONCHAIN_INVALID",
            CoreError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            CoreError::TransportTimeout(_) => "TRANSPORT_TIMEOUT",
            CoreError::Transport(_) => "TRANSPORT_ERROR",
            CoreError::SignerAuth(_) => "SIGNER_AUTH_ERROR",
            CoreError::SignerPolicyDenied(_) => "SIGNER_POLICY_DENIED",
            CoreError::SignerReplayNonce(_) => "SIGNER_REPLAY_NONCE",
            CoreError::SignerMalformedResponse(_) => "SIGNER_MALFORMED_RESPONSE",
            CoreError::SignerValidityExpired(_) => "SIGNER_VALIDITY_EXPIRED",
            CoreError::SignerPubkeyChanged(_) => "SIGNER_PUBKEY_CHANGED",
            CoreError::Rpc(_) => "RPC_ERROR",
            CoreError::ConfigInsecureTransport(_) => "CONFIG_INSECURE_TRANSPORT",
            CoreError::ConfigMtlsRequired(_) => "CONFIG_MTLS_REQUIRED",
            CoreError::ConfigMissingProxyUrl(_) => "CONFIG_MISSING_PROXY_URL",
            CoreError::Unavailable(_) => "UNAVAILABLE",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, timeouts and server-side RPC errors are
    /// retryable; policy and auth rejections are not.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransportTimeout(_)
                | CoreError::Transport(_)
                | CoreError::Rpc(_)
                | CoreError::Unavailable(_)
        )
    }

    /// Optional next-step hint to show alongside the failure.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CoreError::EmergencyLockdown => {
                Some("Disable emergency lockdown in security settings to resume spending.")
            }
            CoreError::SessionNotFound(_) | CoreError::SessionExpired(_) => {
                Some("Create a new session key and register it on-chain.")
            }
            CoreError::InsufficientBalance(_) => Some("Top up the account and retry."),
            CoreError::TransportTimeout(_) | CoreError::Transport(_) | CoreError::Rpc(_) => {
                Some("Check network connectivity and retry.")
            }
            CoreError::ConfigInsecureTransport(_) => {
                Some("Use an https:// proxy URL, or localhost for development.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::EmergencyLockdown.code(), "EMERGENCY_LOCKDOWN");
        assert_eq!(
            CoreError::SignerMalformedResponse("x".into()).code(),
            "SIGNER_MALFORMED_RESPONSE"
        );
        assert_eq!(CoreError::Rpc("x".into()).code(), "RPC_ERROR");
    }

    #[test]
    fn retryability_split() {
        assert!(CoreError::TransportTimeout("t".into()).retryable());
        assert!(CoreError::Rpc("r".into()).retryable());
        assert!(!CoreError::SignerPolicyDenied("p".into()).retryable());
        assert!(!CoreError::SignerAuth("a".into()).retryable());
        assert!(!CoreError::PolicyDenied("d".into()).retryable());
    }
}
