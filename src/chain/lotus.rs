//! Lotus full node JSON-RPC client

use super::{ChainClient, MessageCid, MsigCreateParams, Receipt, UnsignedMessage};
use crate::address::NativeAddress;
use crate::{Error, Result};
use alloy::primitives::U256;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

const ACTOR_NOT_FOUND: &str = "actor not found";

/// JSON-RPC client for a Lotus-compatible node
pub struct LotusClient {
    client: Client,
    url: Url,
    token: Option<SecretString>,
    next_id: AtomicU64,
}

impl fmt::Debug for LotusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LotusClient")
            .field("url", &self.url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Why a single call failed, before it is mapped to the crate error
#[derive(Debug)]
enum RpcFault {
    Transport(String),
    Node { code: i64, message: String },
    Malformed(String),
}

impl RpcFault {
    fn is_actor_not_found(&self) -> bool {
        matches!(self, RpcFault::Node { message, .. } if message.contains(ACTOR_NOT_FOUND))
    }
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcFault::Transport(e) => write!(f, "transport: {}", e),
            RpcFault::Node { code, message } => write!(f, "node error {}: {}", code, message),
            RpcFault::Malformed(e) => write!(f, "malformed response: {}", e),
        }
    }
}

#[derive(Deserialize)]
struct MessagePrototype {
    #[serde(rename = "Message")]
    message: UnsignedMessage,
    #[serde(rename = "ValidNonce")]
    valid_nonce: bool,
}

#[derive(Deserialize)]
struct SignedMessageReply {
    #[serde(rename = "CID")]
    cid: MessageCid,
}

#[derive(Deserialize)]
struct MsgLookup {
    #[serde(rename = "Receipt")]
    receipt: MessageReceipt,
}

#[derive(Deserialize)]
struct MessageReceipt {
    #[serde(rename = "ExitCode")]
    exit_code: i64,
    #[serde(rename = "Return")]
    return_data: Option<String>,
    #[serde(rename = "GasUsed", default)]
    gas_used: i64,
}

impl LotusClient {
    pub fn new(url: &str, token: Option<SecretString>) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::Config(format!("Invalid RPC URL '{}': {}", url, e)))?;
        Ok(Self {
            client: Client::new(),
            url,
            token,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<T, RpcFault> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(self.url.clone()).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        tracing::debug!(method, id = request.id, "Sending RPC request");
        let response = builder
            .send()
            .await
            .map_err(|e| RpcFault::Transport(e.to_string()))?;
        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcFault::Malformed(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(RpcFault::Node {
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(body.result).map_err(|e| RpcFault::Malformed(e.to_string()))
    }

    async fn lookup(&self, method: &str, addr: &NativeAddress) -> Result<Option<NativeAddress>> {
        match self
            .call::<Option<String>>(method, json!([addr.to_string(), []]))
            .await
        {
            Ok(Some(found)) => found.parse().map(Some),
            Ok(None) => Ok(None),
            Err(fault) if fault.is_actor_not_found() => Ok(None),
            Err(fault) => Err(Error::ChainLookupFailed {
                address: addr.to_string(),
                reason: fault.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ChainClient for LotusClient {
    async fn state_lookup_id(&self, addr: &NativeAddress) -> Result<Option<NativeAddress>> {
        self.lookup("Filecoin.StateLookupID", addr).await
    }

    async fn state_lookup_robust_address(
        &self,
        addr: &NativeAddress,
    ) -> Result<Option<NativeAddress>> {
        self.lookup("Filecoin.StateLookupRobustAddress", addr).await
    }

    async fn wallet_balance(&self, addr: &NativeAddress) -> Result<Option<U256>> {
        let balance: Option<String> = self
            .call("Filecoin.WalletBalance", json!([addr.to_string()]))
            .await
            .map_err(|e| Error::Rpc(format!("WalletBalance {}: {}", addr, e)))?;

        balance
            .map(|s| {
                U256::from_str_radix(&s, 10)
                    .map_err(|e| Error::Decode(format!("Invalid balance '{}': {}", s, e)))
            })
            .transpose()
    }

    async fn wallet_default_address(&self) -> Result<NativeAddress> {
        let addr: Option<String> = self
            .call("Filecoin.WalletDefaultAddress", json!([]))
            .await
            .map_err(|e| Error::Rpc(format!("WalletDefaultAddress: {}", e)))?;

        match addr.filter(|s| !s.is_empty()) {
            Some(s) => s.parse(),
            None => Err(Error::Config(
                "Node has no default wallet address".to_string(),
            )),
        }
    }

    async fn msig_create(&self, params: &MsigCreateParams) -> Result<UnsignedMessage> {
        let signers: Vec<String> = params.signers.iter().map(ToString::to_string).collect();
        let prototype: MessagePrototype = self
            .call(
                "Filecoin.MsigCreate",
                json!([
                    params.threshold,
                    signers,
                    params.unlock_duration,
                    params.value.to_string(),
                    params.sender.to_string(),
                    "0"
                ]),
            )
            .await
            .map_err(|e| Error::Rpc(format!("MsigCreate: {}", e)))?;

        if !prototype.valid_nonce {
            tracing::debug!("MsigCreate returned a message without a valid nonce");
        }
        Ok(prototype.message)
    }

    async fn mpool_push_message(&self, msg: &UnsignedMessage) -> Result<MessageCid> {
        let message = serde_json::to_value(msg)?;
        let signed: SignedMessageReply = self
            .call("Filecoin.MpoolPushMessage", json!([message, null]))
            .await
            .map_err(|e| Error::MessageSubmissionFailed(e.to_string()))?;
        Ok(signed.cid)
    }

    async fn state_wait_msg(
        &self,
        cid: &MessageCid,
        confidence: u64,
        lookback_limit: i64,
    ) -> Result<Receipt> {
        let lookup: Option<MsgLookup> = self
            .call(
                "Filecoin.StateWaitMsg",
                json!([cid, confidence, lookback_limit, true]),
            )
            .await
            .map_err(|e| Error::Rpc(format!("StateWaitMsg {}: {}", cid, e)))?;

        let receipt = lookup
            .ok_or_else(|| Error::Rpc(format!("Message {} not found", cid)))?
            .receipt;
        let return_data = match receipt.return_data {
            Some(encoded) => BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| Error::Decode(format!("Invalid receipt return data: {}", e)))?,
            None => Vec::new(),
        };

        Ok(Receipt {
            exit_code: receipt.exit_code,
            return_data,
            gas_used: receipt.gas_used,
        })
    }
}
