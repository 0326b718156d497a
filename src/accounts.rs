//! Account resolution across key backends

use crate::keys::{Account, KeyBackend, SignerHandle};
use crate::store::{Role, RoleStore};
use crate::{Error, Result};
use std::sync::Arc;

/// Finds the one backend that can sign for an account
///
/// Holds no state of its own; build one per command from the configured backends.
#[derive(Default)]
pub struct AccountManager {
    backends: Vec<Arc<dyn KeyBackend>>,
}

impl AccountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backends are searched in registration order
    pub fn register(&mut self, backend: Arc<dyn KeyBackend>) {
        tracing::debug!(backend = %backend.name(), kind = %backend.kind(), "Registered key backend");
        self.backends.push(backend);
    }

    pub fn with_backend(mut self, backend: Arc<dyn KeyBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn backends(&self) -> &[Arc<dyn KeyBackend>] {
        &self.backends
    }

    /// The unique backend claiming `account`
    pub fn backend_for(&self, account: &Account) -> Result<&Arc<dyn KeyBackend>> {
        let matches: Vec<&Arc<dyn KeyBackend>> = self
            .backends
            .iter()
            .filter(|b| b.can_sign(account))
            .collect();

        match matches.as_slice() {
            [] => Err(Error::NoBackendForAccount(account.to_string())),
            [backend] => Ok(*backend),
            many => Err(Error::AmbiguousAccount {
                account: account.to_string(),
                backends: many.iter().map(|b| b.name()).collect(),
            }),
        }
    }

    pub async fn find(&self, account: &Account) -> Result<SignerHandle> {
        let backend = self.backend_for(account)?;
        tracing::debug!(account = %account, backend = %backend.name(), "Resolved signer");
        backend.signer(account).await
    }

    /// Signer for whatever a role is bound to
    pub async fn find_for_role(&self, roles: &RoleStore, role: Role) -> Result<SignerHandle> {
        let account = roles.account(role)?;
        self.find(&account).await.map_err(|e| match e {
            Error::NoBackendForAccount(account) => {
                Error::NoBackendForAccount(format!("{} (role {})", account, role))
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{NativeAddress, Network};
    use crate::keys::keystore::tests::FixedPassphrase;
    use crate::keys::{KeystoreBackend, LegacyKeyBackend, Locator};
    use crate::store::MemoryStore;
    use secrecy::SecretString;

    const SECRET: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    #[tokio::test]
    async fn test_no_backend() {
        let manager = AccountManager::new()
            .with_backend(Arc::new(LegacyKeyBackend::new(Arc::new(MemoryStore::new()))));
        let account = Account::from_native("f01234".parse().unwrap());

        let err = manager.find(&account).await.unwrap_err();
        assert!(matches!(err, Error::NoBackendForAccount(ref a) if a.contains("f01234")));
    }

    #[tokio::test]
    async fn test_single_match_returns_signer() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = Arc::new(
            KeystoreBackend::open(dir.path(), Arc::new(FixedPassphrase(""))).unwrap(),
        );
        let account = keystore
            .new_account(&SecretString::from(String::new()))
            .unwrap();
        let manager = AccountManager::new()
            .with_backend(keystore)
            .with_backend(Arc::new(LegacyKeyBackend::new(Arc::new(MemoryStore::new()))));

        let signer = manager.find(&account).await.unwrap();
        assert_eq!(signer.account(), &account);
    }

    #[tokio::test]
    async fn test_delegated_form_finds_held_key() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = Arc::new(
            KeystoreBackend::open(dir.path(), Arc::new(FixedPassphrase(""))).unwrap(),
        );
        let account = keystore
            .new_account(&SecretString::from(String::new()))
            .unwrap();
        let evm = account.evm.unwrap();
        let manager = AccountManager::new().with_backend(keystore);

        let f4 = Account::from_native(NativeAddress::from_evm(&evm));
        let signer = manager.find(&f4).await.unwrap();
        assert_eq!(signer.account().evm, Some(evm));
    }

    #[tokio::test]
    async fn test_role_bound_to_delegated_form_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = Arc::new(
            KeystoreBackend::open(dir.path(), Arc::new(FixedPassphrase(""))).unwrap(),
        );
        let account = keystore
            .new_account(&SecretString::from(String::new()))
            .unwrap();
        let evm = account.evm.unwrap();
        let roles = RoleStore::new(Arc::new(MemoryStore::new()), Network::Mainnet);
        roles
            .set(Role::Operator, &Locator::Native(NativeAddress::from_evm(&evm)))
            .unwrap();
        let manager = AccountManager::new().with_backend(keystore);

        let signer = manager.find_for_role(&roles, Role::Operator).await.unwrap();
        assert_eq!(signer.account().evm, Some(evm));
    }

    #[tokio::test]
    async fn test_duplicate_key_is_ambiguous() {
        let secret = alloy::hex::decode(SECRET).unwrap();
        let first = LegacyKeyBackend::new(Arc::new(MemoryStore::new()));
        let second = LegacyKeyBackend::new(Arc::new(MemoryStore::new()));
        let account = first.set_key(Role::Owner, &secret).unwrap();
        second.set_key(Role::Operator, &secret).unwrap();

        let manager = AccountManager::new()
            .with_backend(Arc::new(first))
            .with_backend(Arc::new(second));

        let err = manager.find(&account).await.unwrap_err();
        match err {
            Error::AmbiguousAccount { account: a, backends } => {
                assert_eq!(
                    a.split_whitespace().next(),
                    account.evm.map(|e| e.to_string()).as_deref()
                );
                assert_eq!(backends.len(), 2);
                assert_ne!(backends[0], backends[1]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_find_for_role_names_role() {
        let roles = RoleStore::new(Arc::new(MemoryStore::new()), Network::Mainnet);
        roles
            .set(Role::Operator, &"f01234".parse::<Locator>().unwrap())
            .unwrap();
        let manager = AccountManager::new();

        let err = manager.find_for_role(&roles, Role::Operator).await.unwrap_err();
        assert!(err.to_string().contains("operator"));
    }
}
