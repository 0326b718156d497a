//! Key setup for a new agent
//!
//! One flow for every custody arrangement; the strategy only decides how
//! the owner is held.

use crate::chain::ChainClient;
use crate::events::{EventCommon, WalletNew};
use crate::journal::Journal;
use crate::keys::{DeviceHub, HardwareBackend, KeyBackend, KeystoreBackend, Locator};
use crate::multisig::{MultisigProvisioner, ProvisionedMultisig};
use crate::store::{Role, RoleStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignerStrategy {
    /// Owner is a keystore key
    SoftwareKey,
    /// Owner is split into a keystore proposer and a hardware approver
    HardwareWallet,
    /// Hardware split, then a 2-of-2 multisig bound as owner
    Multisig,
}

impl SignerStrategy {
    fn roles(&self) -> &'static [Role] {
        match self {
            SignerStrategy::SoftwareKey => &[Role::Owner, Role::Operator, Role::Requester],
            SignerStrategy::HardwareWallet | SignerStrategy::Multisig => &[
                Role::Owner,
                Role::OwnerProposer,
                Role::OwnerApprover,
                Role::Operator,
                Role::Requester,
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    pub bound: Vec<(Role, Locator)>,
    pub multisig: Option<ProvisionedMultisig>,
}

pub struct KeySetup<'a> {
    roles: &'a RoleStore,
    keystore: &'a KeystoreBackend,
    journal: &'a Journal,
    hub: Option<&'a dyn DeviceHub>,
    chain: Option<&'a dyn ChainClient>,
    confidence: u64,
    lookback_limit: i64,
}

impl<'a> KeySetup<'a> {
    pub fn new(roles: &'a RoleStore, keystore: &'a KeystoreBackend, journal: &'a Journal) -> Self {
        Self {
            roles,
            keystore,
            journal,
            hub: None,
            chain: None,
            confidence: crate::multisig::DEFAULT_CONFIDENCE,
            lookback_limit: crate::multisig::DEFAULT_LOOKBACK_LIMIT,
        }
    }

    pub fn with_hub(mut self, hub: &'a dyn DeviceHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_chain(mut self, chain: &'a dyn ChainClient) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_wait_policy(mut self, confidence: u64, lookback_limit: i64) -> Self {
        self.confidence = confidence;
        self.lookback_limit = lookback_limit;
        self
    }

    pub async fn run(&self, strategy: SignerStrategy) -> Result<SetupReport> {
        for role in strategy.roles() {
            if self.roles.is_bound(*role)? {
                return Err(Error::RoleAlreadyBound(*role));
            }
        }

        // fail on a missing device before any key is written
        let mut hardware = match strategy {
            SignerStrategy::SoftwareKey => None,
            SignerStrategy::HardwareWallet | SignerStrategy::Multisig => {
                let hub = self.hub.ok_or_else(|| {
                    Error::DeviceNotFound("no hardware wallet support configured".to_string())
                })?;
                Some(HardwareBackend::connect(hub).await?.with_key_cache(self.roles.kv()))
            }
        };
        if strategy == SignerStrategy::Multisig && self.chain.is_none() {
            return Err(Error::Config(
                "Multisig setup needs a chain connection".to_string(),
            ));
        }

        let mut report = SetupReport::default();
        match hardware.as_mut() {
            None => {
                let owner = self.new_key(Role::Owner)?;
                self.bind(&mut report, Role::Owner, Locator::Evm(owner)).await?;
            }
            Some(device) => {
                // both halves sign native multisig messages, so both bind as f1
                let approver = device.native_account(0).await?.native.ok_or_else(|| {
                    Error::NoAccountsExposed(format!("{} has no native account", device.name()))
                })?;

                let proposer = self.new_key_native(Role::OwnerProposer)?;
                self.bind(&mut report, Role::OwnerProposer, proposer).await?;
                self.bind(
                    &mut report,
                    Role::OwnerApprover,
                    Locator::Native(approver.with_network(self.roles.network())),
                )
                .await?;
            }
        }

        let operator = self.new_key(Role::Operator)?;
        self.bind(&mut report, Role::Operator, Locator::Evm(operator))
            .await?;
        let requester = self.new_key(Role::Requester)?;
        self.bind(&mut report, Role::Requester, Locator::Evm(requester))
            .await?;

        if strategy == SignerStrategy::Multisig {
            if let Some(chain) = self.chain {
                let mut provisioner = MultisigProvisioner::new(chain, self.roles, self.journal)
                    .with_wait_policy(self.confidence, self.lookback_limit);
                let created = provisioner
                    .provision(Role::OwnerProposer, Role::OwnerApprover)
                    .await?;
                report
                    .bound
                    .push((Role::Owner, Locator::Native(created.robust_address.clone())));
                report.multisig = Some(created);
            }
        }

        Ok(report)
    }

    fn new_key(&self, role: Role) -> Result<alloy::primitives::Address> {
        let passphrase = self.keystore.passphrases().for_new_key(role)?;
        let account = self.keystore.new_account(&passphrase)?;
        account
            .evm
            .ok_or_else(|| Error::Keystore(format!("new {} key has no EVM address", role)))
    }

    /// Keystore key bound by its SECP256K1 native address
    fn new_key_native(&self, role: Role) -> Result<Locator> {
        let passphrase = self.keystore.passphrases().for_new_key(role)?;
        let account = self.keystore.new_account(&passphrase)?;
        account
            .native
            .map(|native| Locator::Native(native.with_network(self.roles.network())))
            .ok_or_else(|| Error::Keystore(format!("new {} key has no native address", role)))
    }

    async fn bind(&self, report: &mut SetupReport, role: Role, locator: Locator) -> Result<()> {
        self.roles.set(role, &locator)?;
        self.journal
            .record(&WalletNew {
                common: EventCommon::default(),
                role,
                address: locator.to_string(),
            })
            .await;
        report.bound.push((role, locator));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{NativeAddress, Network, Protocol};
    use crate::chain::mock::MockChain;
    use crate::chain::Receipt;
    use crate::keys::hardware::mock::{MockDevice, MockHub};
    use crate::keys::keystore::derive_account;
    use crate::keys::keystore::tests::FixedPassphrase;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        roles: RoleStore,
        keystore: KeystoreBackend,
        journal: Journal,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let keystore =
            KeystoreBackend::open(dir.path().join("keys"), Arc::new(FixedPassphrase(""))).unwrap();
        Fixture {
            _dir: dir,
            roles: RoleStore::new(Arc::new(MemoryStore::new()), Network::Mainnet),
            keystore,
            journal: Journal::null(),
        }
    }

    #[tokio::test]
    async fn test_software_key_setup() {
        let f = fixture();
        let report = KeySetup::new(&f.roles, &f.keystore, &f.journal)
            .run(SignerStrategy::SoftwareKey)
            .await
            .unwrap();

        let bound: Vec<Role> = report.bound.iter().map(|(r, _)| *r).collect();
        assert_eq!(bound, vec![Role::Owner, Role::Operator, Role::Requester]);
        assert_eq!(f.keystore.list_accounts().unwrap().len(), 3);
        assert!(matches!(f.roles.get(Role::Owner).unwrap(), Locator::Evm(_)));
        assert!(!f.roles.is_bound(Role::OwnerProposer).unwrap());
    }

    #[tokio::test]
    async fn test_refuses_when_any_role_bound() {
        let f = fixture();
        f.roles
            .set(Role::Requester, &"f01234".parse().unwrap())
            .unwrap();

        let err = KeySetup::new(&f.roles, &f.keystore, &f.journal)
            .run(SignerStrategy::SoftwareKey)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoleAlreadyBound(Role::Requester)));
        assert!(f.keystore.list_accounts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hardware_setup_splits_owner() {
        let f = fixture();
        let hub = MockHub::with_device(MockDevice::with_accounts(2));

        KeySetup::new(&f.roles, &f.keystore, &f.journal)
            .with_hub(&hub)
            .run(SignerStrategy::HardwareWallet)
            .await
            .unwrap();

        assert!(!f.roles.is_bound(Role::Owner).unwrap());
        match f.roles.get(Role::OwnerProposer).unwrap() {
            Locator::Native(addr) => assert_eq!(addr.protocol(), Protocol::Secp256k1),
            other => panic!("proposer bound to {other}"),
        }
        match f.roles.get(Role::OwnerApprover).unwrap() {
            Locator::Native(addr) => assert_eq!(addr.protocol(), Protocol::Secp256k1),
            other => panic!("approver bound to {other}"),
        }

        // a later run finds the device key from the f1 binding
        let approver = f.roles.account(Role::OwnerApprover).unwrap();
        let backend = HardwareBackend::connect(&hub)
            .await
            .unwrap()
            .with_key_cache(f.roles.kv());
        assert!(backend.can_sign(&approver));
        assert_eq!(
            backend.first_account().evm,
            derive_account(&[0x41; 32]).unwrap().1.evm
        );
    }

    #[tokio::test]
    async fn test_hardware_setup_without_device_writes_nothing() {
        let f = fixture();
        let hub = MockHub::empty();

        let err = KeySetup::new(&f.roles, &f.keystore, &f.journal)
            .with_hub(&hub)
            .run(SignerStrategy::HardwareWallet)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
        assert!(f.keystore.list_accounts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multisig_setup_binds_robust_owner() {
        let f = fixture();
        let hub = MockHub::with_device(MockDevice::with_accounts(1));
        let chain = MockChain::new();
        chain.set_default_address(NativeAddress::new_id(100));
        chain.set_receipt(Receipt {
            exit_code: 0,
            return_data: alloy::hex::decode(
                "824300d209550291936e75c9f2df4e78eb7082986a845029156833",
            )
            .unwrap(),
            gas_used: 1,
        });

        let report = KeySetup::new(&f.roles, &f.keystore, &f.journal)
            .with_hub(&hub)
            .with_chain(&chain)
            .run(SignerStrategy::Multisig)
            .await
            .unwrap();

        assert_eq!(
            f.roles.get(Role::Owner).unwrap().to_string(),
            "f2sgjw45oj6lpu46hlocbjq2uekaurk2btphkt6si"
        );
        let signers = report.multisig.unwrap().signers;
        assert_eq!(signers.len(), 2);
        for signer in &signers {
            assert_eq!(signer.protocol(), Protocol::Secp256k1, "signer {signer}");
        }
        let params = chain.msig_calls();
        assert!(params[0]
            .signers
            .iter()
            .all(|s| s.protocol() == Protocol::Secp256k1));
    }
}
