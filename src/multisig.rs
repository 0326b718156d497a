//! Owner multisig provisioning
//!
//! Creates a 2-of-2 multisig whose signers are the owner-proposer and
//! owner-approver roles, then binds the owner role to its robust address.
//! Nothing is persisted until the create message has executed successfully.

use crate::address::{NativeAddress, Network};
use crate::chain::{ChainClient, MessageCid, MsigCreateParams};
use crate::events::{EventCommon, MsigCreate};
use crate::journal::Journal;
use crate::keys::Locator;
use crate::store::{Role, RoleStore};
use crate::{Error, Result};
use alloy::primitives::U256;
use ciborium::Value;

/// Approvals required to act
pub const MSIG_THRESHOLD: u64 = 2;

/// Default wait policy for message inclusion
pub const DEFAULT_CONFIDENCE: u64 = 0;
pub const DEFAULT_LOOKBACK_LIMIT: i64 = 900;

/// Return value of an init actor `Exec`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecReturn {
    pub id_address: NativeAddress,
    pub robust_address: NativeAddress,
}

impl ExecReturn {
    /// Decode the CBOR tuple `[id_address_bytes, robust_address_bytes]`
    pub fn decode(bytes: &[u8], network: Network) -> Result<Self> {
        let value: Value = ciborium::from_reader(bytes)
            .map_err(|e| Error::Decode(format!("Invalid exec return: {}", e)))?;

        let Value::Array(items) = value else {
            return Err(Error::Decode("exec return is not an array".to_string()));
        };
        match items.as_slice() {
            [Value::Bytes(id), Value::Bytes(robust)] => Ok(Self {
                id_address: NativeAddress::from_bytes(id, network)?,
                robust_address: NativeAddress::from_bytes(robust, network)?,
            }),
            _ => Err(Error::Decode(format!(
                "exec return must hold two addresses, got {} items",
                items.len()
            ))),
        }
    }
}

/// Provisioning progress; it only moves forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionState {
    Unconfigured,
    MessageBuilt,
    MessagePushed(MessageCid),
    WaitingForExecution(MessageCid),
    Executed { cid: MessageCid, exit_code: i64 },
    RoleBound(NativeAddress),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedMultisig {
    pub id_address: NativeAddress,
    pub robust_address: NativeAddress,
    pub signers: Vec<NativeAddress>,
    pub cid: MessageCid,
}

pub struct MultisigProvisioner<'a> {
    chain: &'a dyn ChainClient,
    roles: &'a RoleStore,
    journal: &'a Journal,
    confidence: u64,
    lookback_limit: i64,
    state: ProvisionState,
}

impl<'a> MultisigProvisioner<'a> {
    pub fn new(chain: &'a dyn ChainClient, roles: &'a RoleStore, journal: &'a Journal) -> Self {
        Self {
            chain,
            roles,
            journal,
            confidence: DEFAULT_CONFIDENCE,
            lookback_limit: DEFAULT_LOOKBACK_LIMIT,
            state: ProvisionState::Unconfigured,
        }
    }

    pub fn with_wait_policy(mut self, confidence: u64, lookback_limit: i64) -> Self {
        self.confidence = confidence;
        self.lookback_limit = lookback_limit;
        self
    }

    pub fn state(&self) -> &ProvisionState {
        &self.state
    }

    fn advance(&mut self, next: ProvisionState) {
        tracing::info!(from = ?self.state, to = ?next, "Multisig provisioning");
        self.state = next;
    }

    async fn signer_address(&self, role: Role) -> Result<NativeAddress> {
        match self.roles.get_addrs(role, None).await {
            Ok(addrs) => Ok(addrs.native),
            Err(Error::RoleNotBound(role)) => Err(Error::SignerRoleUnbound(role)),
            Err(e) => Err(e),
        }
    }

    /// Create the owner multisig from the proposer and approver roles
    pub async fn provision(
        &mut self,
        proposer: Role,
        approver: Role,
    ) -> Result<ProvisionedMultisig> {
        let outcome = self.run(proposer, approver).await;

        let event = match &outcome {
            Ok(created) => MsigCreate {
                common: EventCommon {
                    error: None,
                    tx: Some(created.cid.to_string()),
                },
                id: created.id_address.to_string(),
                robust: created.robust_address.to_string(),
                signers: created.signers.iter().map(ToString::to_string).collect(),
                threshold: MSIG_THRESHOLD,
            },
            Err(e) => MsigCreate {
                common: EventCommon {
                    error: Some(e.to_string()),
                    tx: None,
                },
                id: String::new(),
                robust: String::new(),
                signers: vec![],
                threshold: MSIG_THRESHOLD,
            },
        };
        self.journal.record(&event).await;
        outcome
    }

    async fn run(&mut self, proposer: Role, approver: Role) -> Result<ProvisionedMultisig> {
        if let Some(existing) = self.roles.lookup(Role::Owner)? {
            return Err(Error::OwnerAlreadyExists(existing.to_string()));
        }

        let signers = vec![
            self.signer_address(proposer).await?,
            self.signer_address(approver).await?,
        ];
        let sender = self.chain.wallet_default_address().await?;

        let params = MsigCreateParams {
            threshold: MSIG_THRESHOLD,
            signers: signers.clone(),
            unlock_duration: 0,
            value: U256::ZERO,
            sender,
        };
        let message = self.chain.msig_create(&params).await?;
        self.advance(ProvisionState::MessageBuilt);

        let cid = self
            .chain
            .mpool_push_message(&message.for_push())
            .await
            .map_err(|e| match e {
                Error::MessageSubmissionFailed(_) => e,
                other => Error::MessageSubmissionFailed(other.to_string()),
            })?;
        self.advance(ProvisionState::MessagePushed(cid.clone()));
        tracing::info!(cid = %cid, "Creating msig");

        self.advance(ProvisionState::WaitingForExecution(cid.clone()));
        let receipt = self
            .chain
            .state_wait_msg(&cid, self.confidence, self.lookback_limit)
            .await?;
        self.advance(ProvisionState::Executed {
            cid: cid.clone(),
            exit_code: receipt.exit_code,
        });
        if !receipt.is_success() {
            return Err(Error::ExecutionFailed {
                cid: cid.to_string(),
                exit_code: receipt.exit_code,
            });
        }

        let created = ExecReturn::decode(&receipt.return_data, self.roles.network())?;
        self.roles
            .set(Role::Owner, &Locator::Native(created.robust_address.clone()))?;
        self.advance(ProvisionState::RoleBound(created.robust_address.clone()));

        Ok(ProvisionedMultisig {
            id_address: created.id_address,
            robust_address: created.robust_address,
            signers,
            cid,
        })
    }
}
