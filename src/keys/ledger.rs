//! Ledger devices over USB

use super::hardware::{derivation_path, DeviceHub, HardwareDevice};
use super::{Account, Signer, SignerHandle};
use crate::{Error, Result};
use alloy::signers::ledger::{HDPath, LedgerSigner};
use alloy::signers::Signature;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

const KEY_EXPORT_MESSAGE: &[u8] = b"fevm-custody: export public key";

/// Connects to the Ethereum app of an attached Ledger
pub struct LedgerHub {
    accounts: usize,
}

impl LedgerHub {
    pub fn new(accounts: usize) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl DeviceHub for LedgerHub {
    async fn devices(&self) -> Result<Vec<Arc<dyn HardwareDevice>>> {
        let mut signers = Vec::with_capacity(self.accounts);
        for index in 0..self.accounts {
            match LedgerSigner::new(HDPath::Other(derivation_path(index)), None).await {
                Ok(signer) => signers.push(Arc::new(signer)),
                Err(e) if index == 0 => {
                    tracing::debug!(error = %e, "No Ledger found");
                    return Ok(vec![]);
                }
                Err(e) => {
                    return Err(Error::DeviceNotFound(format!(
                        "Ledger stopped responding at account {}: {}",
                        index, e
                    )))
                }
            }
        }
        Ok(vec![Arc::new(LedgerDevice { signers })])
    }
}

struct LedgerDevice {
    signers: Vec<Arc<LedgerSigner>>,
}

#[async_trait]
impl HardwareDevice for LedgerDevice {
    fn name(&self) -> String {
        "ledger".to_string()
    }

    fn accounts(&self) -> Vec<Account> {
        self.signers
            .iter()
            .map(|s| Account::from_evm(alloy::signers::Signer::address(s.as_ref())))
            .collect()
    }

    async fn signer(&self, index: usize) -> Result<SignerHandle> {
        let inner = self
            .signers
            .get(index)
            .cloned()
            .ok_or_else(|| Error::AccountNotFound(derivation_path(index)))?;
        let account = Account::from_evm(alloy::signers::Signer::address(inner.as_ref()));
        Ok(Arc::new(LedgerAccountSigner { inner, account }))
    }

    /// The Ethereum app only hands out addresses, so the key is recovered
    /// from a signature over a fixed message
    async fn public_key(&self, index: usize) -> Result<Vec<u8>> {
        let signer = self
            .signers
            .get(index)
            .ok_or_else(|| Error::AccountNotFound(derivation_path(index)))?;

        tracing::info!(path = %derivation_path(index), "Confirm the key export message on your Ledger");
        let signature = alloy::signers::Signer::sign_message(signer.as_ref(), KEY_EXPORT_MESSAGE)
            .await
            .map_err(|e| Error::Signing(format!("Ledger: {}", e)))?;
        let key = signature
            .recover_from_msg(KEY_EXPORT_MESSAGE)
            .map_err(|e| Error::Signing(format!("Cannot recover Ledger public key: {}", e)))?;
        Ok(key.to_encoded_point(false).as_bytes().to_vec())
    }
}

struct LedgerAccountSigner {
    inner: Arc<LedgerSigner>,
    account: Account,
}

impl fmt::Debug for LedgerAccountSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerAccountSigner")
            .field("account", &self.account)
            .finish()
    }
}

#[async_trait]
impl Signer for LedgerAccountSigner {
    fn account(&self) -> &Account {
        &self.account
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        alloy::signers::Signer::sign_message(self.inner.as_ref(), message)
            .await
            .map_err(|e| Error::Signing(format!("Ledger: {}", e)))
    }
}
