//! Error types for role resolution and key custody

use crate::address::NativeAddress;
use crate::store::Role;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Chain lookup failed for {address}: {reason}")]
    ChainLookupFailed { address: String, reason: String },

    #[error("Account {0} not found in keystore")]
    AccountNotFound(String),

    #[error("Wrong passphrase for account {0}")]
    WrongPassphrase(String),

    #[error("No hardware wallet found: {0}")]
    DeviceNotFound(String),

    #[error("Hardware wallet {0} exposes no accounts")]
    NoAccountsExposed(String),

    #[error("No key backend can sign for {0}")]
    NoBackendForAccount(String),

    #[error("Account {account} is claimed by more than one backend: {backends:?}")]
    AmbiguousAccount {
        account: String,
        backends: Vec<String>,
    },

    #[error("Role {0} has no address bound")]
    RoleNotBound(Role),

    #[error("Role {0} already has an address bound")]
    RoleAlreadyBound(Role),

    #[error("Owner already exists at {0}")]
    OwnerAlreadyExists(String),

    #[error("Multisig signer role {0} is not bound")]
    SignerRoleUnbound(Role),

    #[error("Message submission failed: {0}")]
    MessageSubmissionFailed(String),

    #[error("Message {cid} failed on chain with exit code {exit_code}")]
    ExecutionFailed { cid: String, exit_code: i64 },

    #[error("Failed to fetch balance for {role} ({address}): {reason}")]
    BalanceQuery {
        role: Role,
        address: NativeAddress,
        reason: String,
    },

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl Error {
    /// Transient failures a caller may choose to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ChainLookupFailed { .. } | Error::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_role_and_exit_code() {
        let err = Error::RoleNotBound(Role::OwnerApprover);
        assert!(err.to_string().contains("owner-approver"));

        let err = Error::ExecutionFailed {
            cid: "bafy2bzace".to_string(),
            exit_code: 16,
        };
        assert!(err.to_string().contains("exit code 16"));
    }

    #[test]
    fn test_only_lookups_are_retryable() {
        let lookup = Error::ChainLookupFailed {
            address: "f01234".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(lookup.is_retryable());
        assert!(!Error::NoBackendForAccount("f01234".to_string()).is_retryable());
    }
}
