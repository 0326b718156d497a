//! Typed journal events

use crate::store::Role;
use serde::Serialize;

/// A payload the journal knows how to file
pub trait JournalEvent: Serialize {
    const SYSTEM: &'static str;
    const EVENT: &'static str;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventCommon {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
}

impl EventCommon {
    pub fn from_outcome<T: ToString, E: ToString>(outcome: &Result<T, E>) -> Self {
        match outcome {
            Ok(tx) => Self {
                error: None,
                tx: Some(tx.to_string()),
            },
            Err(e) => Self {
                error: Some(e.to_string()),
                tx: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletNew {
    #[serde(flatten)]
    pub common: EventCommon,
    pub role: Role,
    pub address: String,
}

impl JournalEvent for WalletNew {
    const SYSTEM: &'static str = "wallet";
    const EVENT: &'static str = "new";
}

#[derive(Debug, Clone, Serialize)]
pub struct MsigCreate {
    #[serde(flatten)]
    pub common: EventCommon,
    pub id: String,
    pub robust: String,
    pub signers: Vec<String>,
    pub threshold: u64,
}

impl JournalEvent for MsigCreate {
    const SYSTEM: &'static str = "wallet";
    const EVENT: &'static str = "newmsig";
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentBorrow {
    #[serde(flatten)]
    pub common: EventCommon,
    pub agent_id: String,
    pub pool_id: String,
    pub amount: String,
}

impl JournalEvent for AgentBorrow {
    const SYSTEM: &'static str = "agent";
    const EVENT: &'static str = "borrow";
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentPay {
    #[serde(flatten)]
    pub common: EventCommon,
    pub agent_id: String,
    pub pool_id: String,
    pub amount: String,
}

impl JournalEvent for AgentPay {
    const SYSTEM: &'static str = "agent";
    const EVENT: &'static str = "pay";
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentWithdraw {
    #[serde(flatten)]
    pub common: EventCommon,
    pub agent_id: String,
    pub receiver: String,
    pub amount: String,
}

impl JournalEvent for AgentWithdraw {
    const SYSTEM: &'static str = "agent";
    const EVENT: &'static str = "withdraw";
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentAddMiner {
    #[serde(flatten)]
    pub common: EventCommon,
    pub agent_id: String,
    pub miner_id: String,
}

impl JournalEvent for AgentAddMiner {
    const SYSTEM: &'static str = "agent";
    const EVENT: &'static str = "addminer";
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRemoveMiner {
    #[serde(flatten)]
    pub common: EventCommon,
    pub agent_id: String,
    pub miner_id: String,
    pub new_owner: String,
}

impl JournalEvent for AgentRemoveMiner {
    const SYSTEM: &'static str = "agent";
    const EVENT: &'static str = "rmminer";
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentMinerChangeWorker {
    #[serde(flatten)]
    pub common: EventCommon,
    pub agent_id: String,
    pub miner_id: String,
    pub new_worker: String,
    pub new_control: Vec<String>,
}

impl JournalEvent for AgentMinerChangeWorker {
    const SYSTEM: &'static str = "miner";
    const EVENT: &'static str = "changeworker";
}
