//! Scripted in-memory chain for tests

use super::{ChainClient, MessageCid, MsigCreateParams, Receipt, UnsignedMessage};
use crate::address::NativeAddress;
use crate::{Error, Result};
use alloy::primitives::U256;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone)]
pub enum BalanceReply {
    Value(U256),
    Missing,
    Fail(String),
    /// Answer after a delay so sibling queries can race
    Delayed(Duration, U256),
}

#[derive(Default)]
struct State {
    ids: HashMap<String, u64>,
    robust: HashMap<u64, NativeAddress>,
    lookup_failure: Option<String>,
    balances: HashMap<String, BalanceReply>,
    balance_calls: Vec<String>,
    delayed_completed: usize,
    default_address: Option<NativeAddress>,
    msig_calls: Vec<MsigCreateParams>,
    push_failure: Option<String>,
    pushed: Vec<UnsignedMessage>,
    receipt: Option<Receipt>,
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `addr` as instantiated with the given actor id
    pub fn set_id(&self, addr: &NativeAddress, id: u64) {
        let mut state = self.state.lock().unwrap();
        state.ids.insert(addr.to_string(), id);
        if addr.protocol() != crate::address::Protocol::Id {
            state.robust.insert(id, addr.clone());
        }
    }

    pub fn fail_lookups(&self, reason: &str) {
        self.state.lock().unwrap().lookup_failure = Some(reason.to_string());
    }

    pub fn set_balance(&self, addr: &NativeAddress, reply: BalanceReply) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(addr.to_string(), reply);
    }

    pub fn balance_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().balance_calls.clone()
    }

    /// Delayed balance replies that ran to completion
    pub fn delayed_completed(&self) -> usize {
        self.state.lock().unwrap().delayed_completed
    }

    pub fn set_default_address(&self, addr: NativeAddress) {
        self.state.lock().unwrap().default_address = Some(addr);
    }

    pub fn fail_push(&self, reason: &str) {
        self.state.lock().unwrap().push_failure = Some(reason.to_string());
    }

    pub fn set_receipt(&self, receipt: Receipt) {
        self.state.lock().unwrap().receipt = Some(receipt);
    }

    pub fn msig_calls(&self) -> Vec<MsigCreateParams> {
        self.state.lock().unwrap().msig_calls.clone()
    }

    pub fn pushed(&self) -> Vec<UnsignedMessage> {
        self.state.lock().unwrap().pushed.clone()
    }

    fn lookup_fault(&self, addr: &NativeAddress) -> Result<()> {
        match &self.state.lock().unwrap().lookup_failure {
            Some(reason) => Err(Error::ChainLookupFailed {
                address: addr.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn state_lookup_id(&self, addr: &NativeAddress) -> Result<Option<NativeAddress>> {
        self.lookup_fault(addr)?;
        if addr.protocol() == crate::address::Protocol::Id {
            return Ok(Some(addr.clone()));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .ids
            .get(&addr.to_string())
            .map(|id| NativeAddress::new_id(*id)))
    }

    async fn state_lookup_robust_address(
        &self,
        addr: &NativeAddress,
    ) -> Result<Option<NativeAddress>> {
        self.lookup_fault(addr)?;
        let state = self.state.lock().unwrap();
        Ok(addr.id().and_then(|id| state.robust.get(&id).cloned()))
    }

    async fn wallet_balance(&self, addr: &NativeAddress) -> Result<Option<U256>> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            state.balance_calls.push(addr.to_string());
            state
                .balances
                .get(&addr.to_string())
                .cloned()
                .unwrap_or(BalanceReply::Value(U256::ZERO))
        };
        match reply {
            BalanceReply::Value(v) => Ok(Some(v)),
            BalanceReply::Missing => Ok(None),
            BalanceReply::Fail(reason) => Err(Error::Rpc(reason)),
            BalanceReply::Delayed(delay, v) => {
                tokio::time::sleep(delay).await;
                self.state.lock().unwrap().delayed_completed += 1;
                Ok(Some(v))
            }
        }
    }

    async fn wallet_default_address(&self) -> Result<NativeAddress> {
        self.state
            .lock()
            .unwrap()
            .default_address
            .clone()
            .ok_or_else(|| Error::Config("Node has no default wallet address".to_string()))
    }

    async fn msig_create(&self, params: &MsigCreateParams) -> Result<UnsignedMessage> {
        self.state.lock().unwrap().msig_calls.push(params.clone());
        Ok(UnsignedMessage {
            to: NativeAddress::new_id(1),
            from: params.sender.clone(),
            method: 2,
            rest: serde_json::Map::new(),
        })
    }

    async fn mpool_push_message(&self, msg: &UnsignedMessage) -> Result<MessageCid> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.push_failure {
            return Err(Error::MessageSubmissionFailed(reason.clone()));
        }
        state.pushed.push(msg.clone());
        Ok(MessageCid::new("bafy2bzacemock"))
    }

    async fn state_wait_msg(
        &self,
        _cid: &MessageCid,
        _confidence: u64,
        _lookback_limit: i64,
    ) -> Result<Receipt> {
        self.state
            .lock()
            .unwrap()
            .receipt
            .clone()
            .ok_or_else(|| Error::Rpc("no receipt scripted".to_string()))
    }
}
