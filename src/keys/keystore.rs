//! Encrypted local keystore
//!
//! Keys are stored as Web3 Secret Storage files (scrypt + AES-128-CTR).
//! An `accounts.json` index next to them maps every EVM address to its
//! native SECP256K1 address and key file, so listing accounts never needs a
//! passphrase.

use super::{Account, BackendKind, KeyBackend, PassphraseSource, Signer, SignerHandle};
use crate::address::NativeAddress;
use crate::{Error, Result};
use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, SignerSync};
use async_trait::async_trait;
use chrono::Utc;
use k256::ecdsa::SigningKey;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const INDEX_FILE: &str = "accounts.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyEntry {
    evm: Address,
    native: NativeAddress,
    file: String,
}

impl KeyEntry {
    fn account(&self) -> Account {
        Account::new(self.evm, self.native.clone())
    }
}

/// Signer and addresses for a raw secp256k1 private key
pub(crate) fn derive_account(secret: &[u8]) -> Result<(PrivateKeySigner, Account)> {
    let key = SigningKey::from_slice(secret)
        .map_err(|e| Error::Keystore(format!("Invalid private key: {}", e)))?;
    let public = key.verifying_key().to_encoded_point(false);
    let native = NativeAddress::new_secp256k1(public.as_bytes())?;

    let signer = PrivateKeySigner::from_slice(secret)
        .map_err(|e| Error::Keystore(format!("Invalid private key: {}", e)))?;
    let account = Account::new(signer.address(), native);
    Ok((signer, account))
}

/// A decrypted software key
pub struct LocalKeySigner {
    signer: PrivateKeySigner,
    account: Account,
}

impl LocalKeySigner {
    pub(crate) fn new(signer: PrivateKeySigner, account: Account) -> Self {
        Self { signer, account }
    }
}

impl fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("account", &self.account)
            .field("signer", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl Signer for LocalKeySigner {
    fn account(&self) -> &Account {
        &self.account
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        self.signer
            .sign_message_sync(message)
            .map_err(|e| Error::Signing(e.to_string()))
    }

    fn ethereum_wallet(&self) -> Option<EthereumWallet> {
        Some(EthereumWallet::from(self.signer.clone()))
    }
}

/// Passphrase-protected keys in a directory
pub struct KeystoreBackend {
    dir: PathBuf,
    entries: RwLock<Vec<KeyEntry>>,
    passphrases: Arc<dyn PassphraseSource>,
}

impl KeystoreBackend {
    pub fn open(dir: impl AsRef<Path>, passphrases: Arc<dyn PassphraseSource>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let index = dir.join(INDEX_FILE);
        let entries = if index.exists() {
            let content = std::fs::read_to_string(&index)?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };

        tracing::debug!(dir = %dir.display(), accounts = entries.len(), "Opened keystore");
        Ok(Self {
            dir,
            entries: RwLock::new(entries),
            passphrases,
        })
    }

    pub fn passphrases(&self) -> &Arc<dyn PassphraseSource> {
        &self.passphrases
    }

    /// Generate a key and store it encrypted under `passphrase`
    pub fn new_account(&self, passphrase: &SecretString) -> Result<Account> {
        let mut rng = rand::thread_rng();
        let key = SigningKey::random(&mut rng);
        let secret = key.to_bytes();
        let (_, account) = derive_account(&secret)?;
        let evm = account
            .evm
            .ok_or_else(|| Error::Keystore("derived key has no EVM address".to_string()))?;
        let native = account
            .native
            .clone()
            .ok_or_else(|| Error::Keystore("derived key has no native address".to_string()))?;

        let file = format!(
            "UTC--{}--{}",
            Utc::now().format("%Y-%m-%dT%H-%M-%S%.9fZ"),
            alloy::hex::encode(evm.as_slice())
        );
        eth_keystore::encrypt_key(
            &self.dir,
            &mut rng,
            secret.as_slice(),
            passphrase.expose_secret().as_bytes(),
            Some(&file),
        )
        .map_err(|e| Error::Keystore(format!("Failed to write key file: {}", e)))?;

        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Keystore("keystore index lock poisoned".to_string()))?;
        entries.push(KeyEntry { evm, native, file });
        self.write_index(&entries)?;

        tracing::info!(evm = %evm, "Created keystore account");
        Ok(account)
    }

    fn write_index(&self, entries: &[KeyEntry]) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(self.dir.join(INDEX_FILE), content)?;
        Ok(())
    }

    fn find(&self, account: &Account) -> Result<Option<KeyEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Keystore("keystore index lock poisoned".to_string()))?;
        Ok(entries.iter().find(|e| e.account().matches(account)).cloned())
    }
}

#[async_trait]
impl KeyBackend for KeystoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Keystore
    }

    fn name(&self) -> String {
        format!("keystore:{}", self.dir.display())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Keystore("keystore index lock poisoned".to_string()))?;
        Ok(entries.iter().map(KeyEntry::account).collect())
    }

    fn can_sign(&self, account: &Account) -> bool {
        matches!(self.find(account), Ok(Some(_)))
    }

    async fn signer(&self, account: &Account) -> Result<SignerHandle> {
        let entry = self
            .find(account)?
            .ok_or_else(|| Error::AccountNotFound(account.to_string()))?;
        let full = entry.account();
        let passphrase = self.passphrases.for_unlock(&full)?;
        let path = self.dir.join(&entry.file);

        // scrypt holds the thread for a while
        let secret = tokio::task::spawn_blocking(move || {
            eth_keystore::decrypt_key(&path, passphrase.expose_secret().as_bytes())
        })
        .await
        .map_err(|e| Error::Keystore(format!("Key decryption task failed: {}", e)))?
        .map_err(|e| match e {
            eth_keystore::KeystoreError::MacMismatch => Error::WrongPassphrase(full.to_string()),
            other => Error::Keystore(format!("Failed to decrypt {}: {}", entry.file, other)),
        })?;

        let (signer, _) = derive_account(&secret)?;
        tracing::debug!(account = %full, "Unlocked keystore account");
        Ok(Arc::new(LocalKeySigner::new(signer, full)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::Role;
    use alloy::primitives::address;

    /// Same passphrase for every key
    pub struct FixedPassphrase(pub &'static str);

    impl PassphraseSource for FixedPassphrase {
        fn for_new_key(&self, _role: Role) -> Result<SecretString> {
            Ok(SecretString::from(self.0.to_string()))
        }

        fn for_unlock(&self, _account: &Account) -> Result<SecretString> {
            Ok(SecretString::from(self.0.to_string()))
        }
    }

    #[test]
    fn test_derive_account_from_known_key() {
        let secret = alloy::hex::decode(
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        let (_, account) = derive_account(&secret).unwrap();

        assert_eq!(
            account.evm,
            Some(address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"))
        );
        assert_eq!(
            account.native.unwrap().to_string(),
            "f1nqjokbjze2a2nx36kz6oq54wns4w5jcwhzuzy2i"
        );
    }

    #[tokio::test]
    async fn test_new_account_signs_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let account = {
            let ks = KeystoreBackend::open(dir.path(), Arc::new(FixedPassphrase("hunter2"))).unwrap();
            ks.new_account(&SecretString::from("hunter2".to_string()))
                .unwrap()
        };

        let ks = KeystoreBackend::open(dir.path(), Arc::new(FixedPassphrase("hunter2"))).unwrap();
        assert_eq!(ks.list_accounts().unwrap(), vec![account.clone()]);
        assert!(ks.can_sign(&Account::from_native(account.native.clone().unwrap())));

        let signer = ks.signer(&Account::from_evm(account.evm.unwrap())).await.unwrap();
        let sig = signer.sign_message(b"custody").await.unwrap();
        let recovered = sig.recover_address_from_msg(b"custody").unwrap();
        assert_eq!(Some(recovered), account.evm);
        assert!(signer.ethereum_wallet().is_some());
    }

    #[tokio::test]
    async fn test_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let ks = KeystoreBackend::open(dir.path(), Arc::new(FixedPassphrase("wrong"))).unwrap();
        let account = ks
            .new_account(&SecretString::from("right".to_string()))
            .unwrap();

        let err = ks.signer(&account).await.unwrap_err();
        assert!(matches!(err, Error::WrongPassphrase(_)));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let dir = tempfile::tempdir().unwrap();
        let ks = KeystoreBackend::open(dir.path(), Arc::new(FixedPassphrase(""))).unwrap();
        let stranger = Account::from_evm(address!("00000000000000000000000000000000000000aa"));

        assert!(!ks.can_sign(&stranger));
        let err = ks.signer(&stranger).await.unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let secret = [7u8; 32];
        let (signer, account) = derive_account(&secret).unwrap();
        let debug = format!("{:?}", LocalKeySigner::new(signer, account));
        assert!(debug.contains("REDACTED"));
    }
}
