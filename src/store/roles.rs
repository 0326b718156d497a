//! Role bindings
//!
//! Each role maps to one locator string in the key-value store. The store
//! never records which backend holds the key; that is resolved per use.

use super::KvStore;
use crate::address::{AddressTranslator, EvmResolution, NativeAddress, Network};
use crate::chain::ChainClient;
use crate::keys::{Account, Locator};
use crate::{Error, Result};
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Owner,
    OwnerProposer,
    OwnerApprover,
    Operator,
    Requester,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Owner,
        Role::OwnerProposer,
        Role::OwnerApprover,
        Role::Operator,
        Role::Requester,
    ];

    /// Key under which the binding is persisted
    pub fn key(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::OwnerProposer => "owner-proposer",
            Role::OwnerApprover => "owner-approver",
            Role::Operator => "operator",
            Role::Requester => "request",
        }
    }

    fn funded_key(&self) -> String {
        format!("funded-{}", self.key())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Requester => "requester",
            other => other.key(),
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "owner-proposer" | "proposer" => Ok(Role::OwnerProposer),
            "owner-approver" | "approver" => Ok(Role::OwnerApprover),
            "operator" => Ok(Role::Operator),
            "requester" | "request" => Ok(Role::Requester),
            other => Err(Error::InvalidArgument(format!("Unknown role '{}'", other))),
        }
    }
}

/// Both address forms of a bound role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAddrs {
    pub evm: EvmResolution,
    pub native: NativeAddress,
}

pub struct RoleStore {
    kv: Arc<dyn KvStore>,
    network: Network,
}

impl RoleStore {
    pub fn new(kv: Arc<dyn KvStore>, network: Network) -> Self {
        Self { kv, network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The underlying store, shared with caches that live next to the bindings
    pub fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv)
    }

    /// Bound locator, `None` when the role was never set
    pub fn lookup(&self, role: Role) -> Result<Option<Locator>> {
        match self.kv.get(role.key())? {
            Some(value) if !value.trim().is_empty() => Ok(Some(value.parse()?)),
            _ => Ok(None),
        }
    }

    pub fn get(&self, role: Role) -> Result<Locator> {
        self.lookup(role)?.ok_or(Error::RoleNotBound(role))
    }

    pub fn is_bound(&self, role: Role) -> Result<bool> {
        Ok(self.lookup(role)?.is_some())
    }

    pub fn set(&self, role: Role, locator: &Locator) -> Result<()> {
        tracing::info!(role = %role, locator = %locator, "Binding role");
        self.kv.set(role.key(), &locator.to_string())
    }

    /// Bind a role that must still be unset
    pub fn bind_new(&self, role: Role, locator: &Locator) -> Result<()> {
        if self.is_bound(role)? {
            return Err(Error::RoleAlreadyBound(role));
        }
        self.set(role, locator)
    }

    /// EVM and native forms of a role's address
    ///
    /// Without a chain client, native SECP256K1/Actor bindings come back with
    /// an unresolved EVM side.
    pub async fn get_addrs(
        &self,
        role: Role,
        chain: Option<&dyn ChainClient>,
    ) -> Result<RoleAddrs> {
        let translator = match chain {
            Some(chain) => AddressTranslator::with_chain(chain, self.network),
            None => AddressTranslator::offline(self.network),
        };

        match self.get(role)? {
            Locator::Evm(evm) => Ok(RoleAddrs {
                evm: EvmResolution::Resolved(evm),
                native: translator.to_native(&evm),
            }),
            Locator::Native(native) => {
                let evm = translator.to_evm(&native).await?;
                Ok(RoleAddrs { evm, native })
            }
        }
    }

    /// Account descriptor for backend resolution
    pub fn account(&self, role: Role) -> Result<Account> {
        match self.get(role)? {
            Locator::Evm(evm) => Ok(Account::new(
                evm,
                NativeAddress::from_evm(&evm).with_network(self.network),
            )),
            Locator::Native(native) => Ok(Account::from_native(native)),
        }
    }

    /// Whether the role has ever held a positive balance
    ///
    /// The cached answer is checked first. A chain query only happens when
    /// the cache says no and a client is supplied.
    pub async fn is_funded(&self, role: Role, chain: Option<&dyn ChainClient>) -> Result<bool> {
        if self.cached_funded(role)? {
            return Ok(true);
        }
        let Some(chain) = chain else {
            return Ok(false);
        };

        let native = self.get_addrs(role, None).await?.native;
        let balance = chain.wallet_balance(&native).await?.ok_or_else(|| {
            Error::BalanceQuery {
                role,
                address: native.clone(),
                reason: "node returned no balance".to_string(),
            }
        })?;
        self.record_balance(role, &balance)
    }

    pub fn set_funded(&self, role: Role) -> Result<()> {
        tracing::debug!(role = %role, "Marking role funded");
        self.kv.set(&role.funded_key(), "true")
    }

    /// Feed an observed balance into the funded cache
    ///
    /// Once set, the flag stays set even if the balance later drops to zero.
    pub fn record_balance(&self, role: Role, balance: &U256) -> Result<bool> {
        if self.cached_funded(role)? {
            return Ok(true);
        }
        if balance.is_zero() {
            return Ok(false);
        }
        self.set_funded(role)?;
        Ok(true)
    }

    fn cached_funded(&self, role: Role) -> Result<bool> {
        Ok(self.kv.get(&role.funded_key())?.as_deref() == Some("true"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{BalanceReply, MockChain};
    use crate::store::MemoryStore;
    use alloy::primitives::address;

    const F1: &str = "f1nqjokbjze2a2nx36kz6oq54wns4w5jcwhzuzy2i";

    fn store() -> RoleStore {
        RoleStore::new(Arc::new(MemoryStore::new()), Network::Mainnet)
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Requester.key(), "request");
        assert_eq!(Role::Requester.to_string(), "requester");
        assert_eq!("owner-approver".parse::<Role>().unwrap(), Role::OwnerApprover);
        assert_eq!("request".parse::<Role>().unwrap(), Role::Requester);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_unbound_role() {
        let store = store();
        let err = store.get(Role::Operator).unwrap_err();
        assert!(matches!(err, Error::RoleNotBound(Role::Operator)));
        assert!(err.to_string().contains("operator"));
    }

    #[test]
    fn test_bind_new_refuses_rebinding() {
        let store = store();
        let locator: Locator = "f01234".parse().unwrap();
        store.bind_new(Role::Owner, &locator).unwrap();

        let err = store.bind_new(Role::Owner, &locator).unwrap_err();
        assert!(matches!(err, Error::RoleAlreadyBound(Role::Owner)));
    }

    #[tokio::test]
    async fn test_get_addrs_from_evm_locator() {
        let store = store();
        let evm = address!("52963ef50e27e06d72d59fcb4f3c2a687be3cfef");
        store.set(Role::Operator, &Locator::Evm(evm)).unwrap();

        let addrs = store.get_addrs(Role::Operator, None).await.unwrap();
        assert_eq!(addrs.evm, EvmResolution::Resolved(evm));
        assert_eq!(
            addrs.native.to_string(),
            "f410fkkld55ioe7qg24wvt7fu6pbknb56ht7pt4zamxa"
        );
    }

    #[tokio::test]
    async fn test_get_addrs_unfunded_secp() {
        let store = store();
        store
            .set(Role::OwnerProposer, &F1.parse().unwrap())
            .unwrap();

        let offline = store.get_addrs(Role::OwnerProposer, None).await.unwrap();
        assert_eq!(offline.evm, EvmResolution::NotYetInstantiated);

        let chain = MockChain::new();
        let online = store
            .get_addrs(Role::OwnerProposer, Some(&chain))
            .await
            .unwrap();
        assert_eq!(online.evm, EvmResolution::NotYetInstantiated);
        assert_eq!(online.native.to_string(), F1);
    }

    #[tokio::test]
    async fn test_funded_is_monotonic() {
        let store = store();
        let native: NativeAddress = F1.parse().unwrap();
        store
            .set(Role::Operator, &Locator::Native(native.clone()))
            .unwrap();
        let chain = MockChain::new();

        assert!(!store.is_funded(Role::Operator, Some(&chain)).await.unwrap());

        chain.set_balance(&native, BalanceReply::Value(U256::from(5)));
        assert!(store.is_funded(Role::Operator, Some(&chain)).await.unwrap());

        chain.set_balance(&native, BalanceReply::Value(U256::ZERO));
        assert!(store.is_funded(Role::Operator, Some(&chain)).await.unwrap());
        assert!(store.record_balance(Role::Operator, &U256::ZERO).unwrap());
        // cached answers skip the node
        assert_eq!(chain.balance_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_funded_without_chain_uses_cache_only() {
        let store = store();
        store.set(Role::Operator, &F1.parse().unwrap()).unwrap();
        assert!(!store.is_funded(Role::Operator, None).await.unwrap());

        store.set_funded(Role::Operator).unwrap();
        assert!(store.is_funded(Role::Operator, None).await.unwrap());
    }
}
