//! Typed agent transactions
//!
//! Each transaction kind names the role that must sign it. The dispatcher
//! resolves that role to a signer and hands the transaction to a
//! [`TxSubmitter`], which builds and broadcasts it.

use crate::accounts::AccountManager;
use crate::address::NativeAddress;
use crate::events::{
    AgentAddMiner, AgentBorrow, AgentMinerChangeWorker, AgentPay, AgentRemoveMiner,
    AgentWithdraw, EventCommon,
};
use crate::journal::Journal;
use crate::keys::SignerHandle;
use crate::store::{Role, RoleStore};
use crate::Result;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AgentTx {
    Borrow {
        pool_id: u64,
        amount: U256,
    },
    Pay {
        pool_id: u64,
        amount: U256,
        /// Owner may pay instead of the operator
        from_owner: bool,
    },
    Withdraw {
        receiver: Address,
        amount: U256,
    },
    AddMiner {
        miner: NativeAddress,
    },
    RemoveMiner {
        miner: NativeAddress,
        new_owner: NativeAddress,
    },
    ChangeWorker {
        miner: NativeAddress,
        new_worker: NativeAddress,
        new_control: Vec<NativeAddress>,
    },
}

impl AgentTx {
    pub fn signer_role(&self) -> Role {
        match self {
            AgentTx::Pay {
                from_owner: false, ..
            } => Role::Operator,
            _ => Role::Owner,
        }
    }

    /// Kinds that also need a credential signed by the requester key
    pub fn needs_requester(&self) -> bool {
        matches!(
            self,
            AgentTx::Borrow { .. } | AgentTx::Pay { .. } | AgentTx::Withdraw { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentTx::Borrow { .. } => "borrow",
            AgentTx::Pay { .. } => "pay",
            AgentTx::Withdraw { .. } => "withdraw",
            AgentTx::AddMiner { .. } => "add-miner",
            AgentTx::RemoveMiner { .. } => "remove-miner",
            AgentTx::ChangeWorker { .. } => "change-worker",
        }
    }
}

/// Signers resolved for one transaction
#[derive(Debug, Clone)]
pub struct TxSigners {
    pub sender: SignerHandle,
    pub requester: Option<SignerHandle>,
}

/// Builds and broadcasts agent transactions; returns the transaction hash
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    async fn submit(&self, agent: Address, tx: &AgentTx, signers: &TxSigners) -> Result<B256>;
}

pub struct TxDispatcher {
    accounts: AccountManager,
    roles: Arc<RoleStore>,
    submitter: Arc<dyn TxSubmitter>,
    journal: Journal,
    agent: Address,
}

impl TxDispatcher {
    pub fn new(
        accounts: AccountManager,
        roles: Arc<RoleStore>,
        submitter: Arc<dyn TxSubmitter>,
        journal: Journal,
        agent: Address,
    ) -> Self {
        Self {
            accounts,
            roles,
            submitter,
            journal,
            agent,
        }
    }

    pub async fn dispatch(&self, tx: &AgentTx) -> Result<B256> {
        let outcome = self.sign_and_submit(tx).await;
        self.record(tx, EventCommon::from_outcome(&outcome)).await;
        outcome
    }

    async fn sign_and_submit(&self, tx: &AgentTx) -> Result<B256> {
        let role = tx.signer_role();
        let sender = self.accounts.find_for_role(&self.roles, role).await?;
        let requester = if tx.needs_requester() {
            Some(
                self.accounts
                    .find_for_role(&self.roles, Role::Requester)
                    .await?,
            )
        } else {
            None
        };

        tracing::info!(kind = tx.name(), role = %role, signer = %sender.account(), "Submitting agent transaction");
        let hash = self
            .submitter
            .submit(self.agent, tx, &TxSigners { sender, requester })
            .await?;
        tracing::info!(kind = tx.name(), tx = %hash, "Agent transaction submitted");
        Ok(hash)
    }

    async fn record(&self, tx: &AgentTx, common: EventCommon) {
        let agent_id = self.agent.to_string();
        match tx {
            AgentTx::Borrow { pool_id, amount } => {
                self.journal
                    .record(&AgentBorrow {
                        common,
                        agent_id,
                        pool_id: pool_id.to_string(),
                        amount: amount.to_string(),
                    })
                    .await
            }
            AgentTx::Pay {
                pool_id, amount, ..
            } => {
                self.journal
                    .record(&AgentPay {
                        common,
                        agent_id,
                        pool_id: pool_id.to_string(),
                        amount: amount.to_string(),
                    })
                    .await
            }
            AgentTx::Withdraw { receiver, amount } => {
                self.journal
                    .record(&AgentWithdraw {
                        common,
                        agent_id,
                        receiver: receiver.to_string(),
                        amount: amount.to_string(),
                    })
                    .await
            }
            AgentTx::AddMiner { miner } => {
                self.journal
                    .record(&AgentAddMiner {
                        common,
                        agent_id,
                        miner_id: miner.to_string(),
                    })
                    .await
            }
            AgentTx::RemoveMiner { miner, new_owner } => {
                self.journal
                    .record(&AgentRemoveMiner {
                        common,
                        agent_id,
                        miner_id: miner.to_string(),
                        new_owner: new_owner.to_string(),
                    })
                    .await
            }
            AgentTx::ChangeWorker {
                miner,
                new_worker,
                new_control,
            } => {
                self.journal
                    .record(&AgentMinerChangeWorker {
                        common,
                        agent_id,
                        miner_id: miner.to_string(),
                        new_worker: new_worker.to_string(),
                        new_control: new_control.iter().map(ToString::to_string).collect(),
                    })
                    .await
            }
        }
    }
}
