//! Lotus RPC endpoint configuration
//!
//! Resolution order:
//! 1. `LOTUS_RPC_URL` (and optional `LOTUS_TOKEN`) - highest priority
//! 2. Public node fallback - read-only, rate limited, for testing only
//!
//! # Examples
//!
//! ```bash
//! # Own node with a write token (needed for pushing messages)
//! export LOTUS_RPC_URL="http://127.0.0.1:1234/rpc/v1"
//! export LOTUS_TOKEN="eyJhbGciOi..."
//!
//! # No env vars - uses a public node
//! ```

use crate::address::Network;
use secrecy::SecretString;

/// Environment variable names
mod env_vars {
    pub const LOTUS_RPC_URL: &str = "LOTUS_RPC_URL";
    pub const LOTUS_TOKEN: &str = "LOTUS_TOKEN";
}

/// Public endpoints (rate limited, no wallet)
mod public_rpcs {
    pub const MAINNET: &str = "https://api.node.glif.io/rpc/v1";
    pub const TESTNET: &str = "https://api.calibration.node.glif.io/rpc/v1";
}

pub struct RpcConfig {
    url: String,
    token: Option<SecretString>,
}

impl RpcConfig {
    /// Create RPC config from environment variables
    pub fn from_env(network: Network) -> Self {
        let token = std::env::var(env_vars::LOTUS_TOKEN)
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from);

        match std::env::var(env_vars::LOTUS_RPC_URL) {
            Ok(url) if !url.is_empty() => {
                tracing::debug!("Using LOTUS_RPC_URL");
                Self { url, token }
            }
            _ => {
                let url = Self::public_url(network);
                tracing::warn!(url, "No Lotus RPC configured, using public node (rate limited)");
                Self {
                    url: url.to_string(),
                    token,
                }
            }
        }
    }

    /// Create with an explicit endpoint
    pub fn with_url(url: impl Into<String>, token: Option<SecretString>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }

    pub fn public_url(network: Network) -> &'static str {
        match network {
            Network::Mainnet => public_rpcs::MAINNET,
            Network::Testnet => public_rpcs::TESTNET,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token(&self) -> Option<&SecretString> {
        self.token.as_ref()
    }

    pub fn into_parts(self) -> (String, Option<SecretString>) {
        (self.url, self.token)
    }
}

// Manual Debug to avoid exposing the token
impl std::fmt::Debug for RpcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
