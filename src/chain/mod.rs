//! Base-chain full node access
//!
//! [`ChainClient`] is the narrow slice of the node API the custody core
//! depends on. [`LotusClient`] implements it over JSON-RPC.

mod lotus;
#[cfg(test)]
pub mod mock;

pub use lotus::LotusClient;

use crate::address::NativeAddress;
use crate::Result;
use alloy::primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameters of a create-multisig message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsigCreateParams {
    /// Approvals needed to execute a proposal
    pub threshold: u64,
    pub signers: Vec<NativeAddress>,
    /// Vesting duration in epochs; zero means no vesting
    pub unlock_duration: u64,
    /// Initial balance in attoFIL
    pub value: U256,
    /// Account paying for gas
    pub sender: NativeAddress,
}

/// Unsigned message as returned by message-building calls
///
/// Only the fields the core reads are typed; the rest are carried through
/// unchanged so the node receives exactly what it built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedMessage {
    #[serde(rename = "To")]
    pub to: NativeAddress,
    #[serde(rename = "From")]
    pub from: NativeAddress,
    #[serde(rename = "Method")]
    pub method: u64,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl UnsignedMessage {
    /// Copy without nonce and gas fields, so the node fills them in on push
    pub fn for_push(&self) -> Self {
        let rest = self
            .rest
            .iter()
            .filter(|(k, _)| matches!(k.as_str(), "Value" | "Params"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            to: self.to.clone(),
            from: self.from.clone(),
            method: self.method,
            rest,
        }
    }
}

/// Content identifier of a pushed message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageCid {
    #[serde(rename = "/")]
    pub cid: String,
}

impl MessageCid {
    pub fn new(cid: impl Into<String>) -> Self {
        Self { cid: cid.into() }
    }
}

impl fmt::Display for MessageCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cid)
    }
}

/// Execution receipt of an included message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub exit_code: i64,
    pub return_data: Vec<u8>,
    pub gas_used: i64,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// ID address of an actor; `None` when the actor does not exist yet
    async fn state_lookup_id(&self, addr: &NativeAddress) -> Result<Option<NativeAddress>>;

    /// Robust address behind an ID address; `None` when there is none
    async fn state_lookup_robust_address(
        &self,
        addr: &NativeAddress,
    ) -> Result<Option<NativeAddress>>;

    /// Balance in attoFIL; `None` when the node returned no value
    async fn wallet_balance(&self, addr: &NativeAddress) -> Result<Option<U256>>;

    /// The node's default sending account
    async fn wallet_default_address(&self) -> Result<NativeAddress>;

    async fn msig_create(&self, params: &MsigCreateParams) -> Result<UnsignedMessage>;

    /// Sign with the node wallet and push to the mempool
    async fn mpool_push_message(&self, msg: &UnsignedMessage) -> Result<MessageCid>;

    /// Block until the message is included and executed
    async fn state_wait_msg(
        &self,
        cid: &MessageCid,
        confidence: u64,
        lookback_limit: i64,
    ) -> Result<Receipt>;
}
