//! Plaintext per-role key file
//!
//! Kept so installations that predate the encrypted keystore can still sign.
//! One hex private key per role; nothing is enumerable.

use super::keystore::{derive_account, LocalKeySigner};
use super::{Account, BackendKind, KeyBackend, SignerHandle};
use crate::store::{KvStore, Role};
use crate::{Error, Result};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::Arc;

const LEGACY_ROLES: [Role; 3] = [Role::Owner, Role::Operator, Role::Requester];

pub struct LegacyKeyBackend {
    store: Arc<dyn KvStore>,
}

impl LegacyKeyBackend {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Store a raw key for `role`, replacing any previous one
    pub fn set_key(&self, role: Role, secret: &[u8]) -> Result<Account> {
        let (_, account) = derive_account(secret)?;
        self.store.set(role.key(), &alloy::hex::encode(secret))?;
        Ok(account)
    }

    fn load(&self, role: Role) -> Result<Option<(PrivateKeySigner, Account)>> {
        let Some(hex) = self.store.get(role.key())? else {
            return Ok(None);
        };
        if hex.is_empty() {
            return Ok(None);
        }
        let secret = alloy::hex::decode(hex.trim())
            .map_err(|e| Error::Keystore(format!("Invalid {} key in legacy file: {}", role, e)))?;
        derive_account(&secret).map(Some)
    }

    fn find(&self, account: &Account) -> Option<(PrivateKeySigner, Account)> {
        LEGACY_ROLES.iter().find_map(|role| match self.load(*role) {
            Ok(Some((signer, derived))) if derived.matches(account) => Some((signer, derived)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "Skipping unreadable legacy key");
                None
            }
        })
    }
}

#[async_trait]
impl KeyBackend for LegacyKeyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn name(&self) -> String {
        format!("legacy-keys:{}", self.store.location())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(vec![])
    }

    fn can_sign(&self, account: &Account) -> bool {
        self.find(account).is_some()
    }

    async fn signer(&self, account: &Account) -> Result<SignerHandle> {
        let (signer, derived) = self
            .find(account)
            .ok_or_else(|| Error::AccountNotFound(account.to_string()))?;
        tracing::warn!(account = %derived, "Signing with a plaintext legacy key");
        Ok(Arc::new(LocalKeySigner::new(signer, derived)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use alloy::primitives::address;

    #[tokio::test]
    async fn test_signs_only_for_derived_address() {
        let backend = LegacyKeyBackend::new(Arc::new(MemoryStore::new()));
        let secret = alloy::hex::decode(
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        let account = backend.set_key(Role::Operator, &secret).unwrap();

        assert!(backend.list_accounts().unwrap().is_empty());
        assert!(backend.can_sign(&Account::from_evm(address!(
            "f39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        ))));
        assert!(backend.can_sign(&Account::from_native(account.native.clone().unwrap())));
        assert!(!backend.can_sign(&Account::from_evm(address!(
            "70997970c51812dc3a010c7d01b50e0d17dc79c8"
        ))));

        let signer = backend.signer(&account).await.unwrap();
        assert_eq!(signer.account(), &account);
    }

    #[test]
    fn test_names_differ_per_store() {
        let first = LegacyKeyBackend::new(Arc::new(MemoryStore::new()));
        let second = LegacyKeyBackend::new(Arc::new(MemoryStore::new()));
        assert!(first.name().starts_with("legacy-keys:"));
        assert_ne!(first.name(), second.name());
    }
}
