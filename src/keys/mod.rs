//! Key backends
//!
//! Private keys never leave a backend. Callers get a [`SignerHandle`] that
//! can sign, and the addresses derived from the key.

pub mod hardware;
pub mod keystore;
pub mod legacy;
#[cfg(feature = "ledger")]
pub mod ledger;
pub mod passphrase;

pub use hardware::{DeviceHub, HardwareBackend, HardwareDevice};
pub use keystore::KeystoreBackend;
pub use legacy::LegacyKeyBackend;
pub use passphrase::{EnvOrPrompt, PassphraseSource};

use crate::address::NativeAddress;
use crate::{Error, Result};
use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::Signature;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// What a role is bound to: an EVM address or a native address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Evm(Address),
    Native(NativeAddress),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Evm(addr) => write!(f, "{}", addr),
            Locator::Native(addr) => write!(f, "{}", addr),
        }
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with("0x") || s.starts_with("0X") {
            let addr = Address::from_str(s)
                .map_err(|e| Error::InvalidAddress(format!("{}: {}", s, e)))?;
            Ok(Locator::Evm(addr))
        } else {
            Ok(Locator::Native(s.parse()?))
        }
    }
}

impl Serialize for Locator {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logical signing identity, known by one or both of its addresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evm: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<NativeAddress>,
}

impl Account {
    pub fn new(evm: Address, native: NativeAddress) -> Self {
        Self {
            evm: Some(evm),
            native: Some(native),
        }
    }

    pub fn from_evm(evm: Address) -> Self {
        Self {
            evm: Some(evm),
            native: None,
        }
    }

    pub fn from_native(native: NativeAddress) -> Self {
        Self {
            evm: None,
            native: Some(native),
        }
    }

    /// EVM form, derived locally from the native address when not given
    ///
    /// Covers EAM delegated (f4) and masked ID forms.
    pub fn evm_identity(&self) -> Option<Address> {
        self.evm
            .or_else(|| self.native.as_ref().and_then(NativeAddress::evm_address))
    }

    /// True when the two descriptors denote the same identity
    ///
    /// Native addresses compare without their network prefix. A delegated
    /// address matches the account holding its EVM address.
    pub fn matches(&self, other: &Account) -> bool {
        let evm = matches!(
            (self.evm_identity(), other.evm_identity()),
            (Some(a), Some(b)) if a == b
        );
        let native = match (&self.native, &other.native) {
            (Some(a), Some(b)) => a.to_bytes() == b.to_bytes(),
            _ => false,
        };
        evm || native
    }
}

impl From<&Locator> for Account {
    fn from(locator: &Locator) -> Self {
        match locator {
            Locator::Evm(addr) => Account::from_evm(*addr),
            Locator::Native(addr) => Account::from_native(addr.clone()),
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.evm, &self.native) {
            (Some(evm), Some(native)) => write!(f, "{} ({})", evm, native),
            (Some(evm), None) => write!(f, "{}", evm),
            (None, Some(native)) => write!(f, "{}", native),
            (None, None) => f.write_str("<no address>"),
        }
    }
}

/// Signing capability handed out by a backend
#[async_trait]
pub trait Signer: Send + Sync + fmt::Debug {
    fn account(&self) -> &Account;

    /// EIP-191 personal message signature
    async fn sign_message(&self, message: &[u8]) -> Result<Signature>;

    /// Wallet for alloy providers, when the key can back one
    fn ethereum_wallet(&self) -> Option<EthereumWallet> {
        None
    }
}

pub type SignerHandle = Arc<dyn Signer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Keystore,
    Hardware,
    Legacy,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Keystore => "keystore",
            BackendKind::Hardware => "hardware",
            BackendKind::Legacy => "legacy",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait KeyBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human readable name, unique among registered backends
    fn name(&self) -> String;

    fn list_accounts(&self) -> Result<Vec<Account>>;

    fn can_sign(&self, account: &Account) -> bool;

    async fn signer(&self, account: &Account) -> Result<SignerHandle>;
}
