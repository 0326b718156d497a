//! FEVM Key Custody
//!
//! Keeps the keys of a Filecoin storage-provider agent and answers one
//! question for every operation: which key signs for which role.
//!
//! - Translates between native Filecoin and EVM addresses
//! - Resolves role → account → signing backend
//! - Fans out balance queries across roles
//! - Provisions a 2-of-2 owner multisig
//!
//! # Security Model
//!
//! - Private keys never leave the `keys` module
//! - Passphrases are `SecretString`s and never logged
//! - Every provisioning step and agent transaction is journaled

pub mod accounts;
pub mod address;
pub mod balance;
pub mod chain;
pub mod config;
pub mod events;
pub mod journal;
pub mod keys;
pub mod multisig;
pub mod setup;
pub mod store;
pub mod tx;

mod error;

// Re-export commonly used types
pub use accounts::AccountManager;
pub use address::{AddressTranslator, EvmResolution, NativeAddress, Network};
pub use config::{Config, RpcConfig};
pub use error::{Error, Result};
pub use setup::{KeySetup, SignerStrategy};
pub use store::{Role, RoleStore};
