//! Hardware wallet backend
//!
//! Accounts come from the first connected device, derived along
//! `m/44'/461'/0'/0/{index}`. Every signature needs confirmation on the device.
//!
//! Devices report accounts by EVM address. The SECP256K1 native address of
//! an account needs its public key, which is fetched once and cached.

use super::{Account, BackendKind, KeyBackend, SignerHandle};
use crate::address::NativeAddress;
use crate::store::KvStore;
use crate::{Error, Result};
use alloy::primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;

/// SLIP-44 coin type for Filecoin
pub const FILECOIN_COIN_TYPE: u32 = 461;

pub fn derivation_path(index: usize) -> String {
    format!("m/44'/{}'/0'/0/{}", FILECOIN_COIN_TYPE, index)
}

/// A connected signing device
#[async_trait]
pub trait HardwareDevice: Send + Sync {
    fn name(&self) -> String;

    /// Accounts the device exposes, in derivation order
    fn accounts(&self) -> Vec<Account>;

    /// Signer for the account at `index`; signing blocks until the user confirms
    async fn signer(&self, index: usize) -> Result<SignerHandle>;

    /// Uncompressed SEC1 public key of the account at `index`
    async fn public_key(&self, index: usize) -> Result<Vec<u8>>;
}

/// Enumerates attached devices
#[async_trait]
pub trait DeviceHub: Send + Sync {
    async fn devices(&self) -> Result<Vec<Arc<dyn HardwareDevice>>>;
}

pub struct HardwareBackend {
    device: Arc<dyn HardwareDevice>,
    accounts: Vec<Account>,
    known_keys: Option<Arc<dyn KvStore>>,
}

fn native_key(evm: &Address) -> String {
    format!("hardware-native-{}", evm)
}

impl HardwareBackend {
    /// Bind to the first device the hub reports
    pub async fn connect(hub: &dyn DeviceHub) -> Result<Self> {
        let device = hub
            .devices()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::DeviceNotFound("no device attached".to_string()))?;

        let accounts = device.accounts();
        if accounts.is_empty() {
            return Err(Error::NoAccountsExposed(device.name()));
        }

        tracing::info!(device = %device.name(), accounts = accounts.len(), "Connected hardware wallet");
        Ok(Self {
            device,
            accounts,
            known_keys: None,
        })
    }

    /// Fill in native addresses learned on earlier runs, and remember new ones
    pub fn with_key_cache(mut self, store: Arc<dyn KvStore>) -> Self {
        for account in self.accounts.iter_mut().filter(|a| a.native.is_none()) {
            let Some(evm) = account.evm else { continue };
            match store.get(&native_key(&evm)) {
                Ok(Some(cached)) => match cached.parse::<NativeAddress>() {
                    Ok(native) => account.native = Some(native),
                    Err(e) => tracing::warn!(evm = %evm, error = %e, "Ignoring bad cached native address"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(evm = %evm, error = %e, "Native address cache unreadable"),
            }
        }
        self.known_keys = Some(store);
        self
    }

    pub fn first_account(&self) -> &Account {
        // connect() rejects devices without accounts
        &self.accounts[0]
    }

    /// Account at `index` with its SECP256K1 native address filled in
    ///
    /// Asks the device for the public key when the address is not known yet.
    pub async fn native_account(&mut self, index: usize) -> Result<Account> {
        let account = self
            .accounts
            .get(index)
            .cloned()
            .ok_or_else(|| Error::AccountNotFound(derivation_path(index)))?;
        if account.native.is_some() {
            return Ok(account);
        }

        let public_key = self.device.public_key(index).await?;
        let native = NativeAddress::new_secp256k1(&public_key)?;
        // new_secp256k1 guarantees 65 bytes
        let evm = Address::from_raw_public_key(&public_key[1..]);
        if account.evm.is_some_and(|expected| expected != evm) {
            return Err(Error::Signing(format!(
                "{} returned a public key for {} at {}, expected {}",
                self.device.name(),
                evm,
                derivation_path(index),
                account
            )));
        }

        if let Some(store) = &self.known_keys {
            store.set(&native_key(&evm), &native.to_string())?;
        }
        tracing::debug!(evm = %evm, native = %native, "Learned hardware native address");

        let full = Account::new(evm, native);
        self.accounts[index] = full.clone();
        Ok(full)
    }
}

#[async_trait]
impl KeyBackend for HardwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hardware
    }

    fn name(&self) -> String {
        format!("hardware:{}", self.device.name())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.clone())
    }

    fn can_sign(&self, account: &Account) -> bool {
        self.accounts.iter().any(|a| a.matches(account))
    }

    async fn signer(&self, account: &Account) -> Result<SignerHandle> {
        let index = self
            .accounts
            .iter()
            .position(|a| a.matches(account))
            .ok_or_else(|| Error::AccountNotFound(account.to_string()))?;

        tracing::info!(account = %account, path = %derivation_path(index), "Confirm on your hardware wallet");
        self.device.signer(index).await
    }
}
