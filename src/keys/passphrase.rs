//! Keystore passphrase sources

use super::Account;
use crate::store::Role;
use crate::{Error, Result};
use alloy::primitives::Address;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::RwLock;

pub const OWNER_PASSPHRASE_ENV: &str = "OWNER_PASSPHRASE";
pub const OPERATOR_PASSPHRASE_ENV: &str = "OPERATOR_PASSPHRASE";

/// Names older deployments export, read when the current ones are unset
pub const GLIF_OWNER_PASSPHRASE_ENV: &str = "GLIF_OWNER_PASSPHRASE";
pub const GLIF_OPERATOR_PASSPHRASE_ENV: &str = "GLIF_OPERATOR_PASSPHRASE";

const OWNER_VARS: [&str; 2] = [OWNER_PASSPHRASE_ENV, GLIF_OWNER_PASSPHRASE_ENV];
const OPERATOR_VARS: [&str; 2] = [OPERATOR_PASSPHRASE_ENV, GLIF_OPERATOR_PASSPHRASE_ENV];

pub trait PassphraseSource: Send + Sync {
    /// Passphrase to encrypt a new key held for `role`
    fn for_new_key(&self, role: Role) -> Result<SecretString>;

    /// Passphrase to unlock an existing key
    fn for_unlock(&self, account: &Account) -> Result<SecretString>;
}

/// Environment variables first, then an interactive masked prompt
///
/// Owner keys fall back to a prompt. Operator keys fall back to an empty
/// passphrase so unattended agents can sign. Proposer and requester keys
/// are always unencrypted.
#[derive(Debug, Default)]
pub struct EnvOrPrompt {
    roles: RwLock<HashMap<Address, Role>>,
}

impl EnvOrPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember which role an account serves so unlocking picks the right variable
    pub fn bind(&self, account: Address, role: Role) {
        if let Ok(mut roles) = self.roles.write() {
            roles.insert(account, role);
        }
    }

    fn role_of(&self, account: &Account) -> Option<Role> {
        let evm = account.evm_identity()?;
        self.roles.read().ok()?.get(&evm).copied()
    }

    fn resolve(&self, role: Option<Role>, prompt: &str) -> Result<SecretString> {
        match role {
            Some(Role::Owner) => env_or_prompt(&OWNER_VARS, prompt),
            Some(Role::Operator) => Ok(SecretString::from(
                first_set(&OPERATOR_VARS, |var| std::env::var(var).ok()).unwrap_or_default(),
            )),
            Some(Role::OwnerProposer) | Some(Role::Requester) => {
                Ok(SecretString::from(String::new()))
            }
            Some(Role::OwnerApprover) | None => prompt_passphrase(prompt),
        }
    }
}

impl PassphraseSource for EnvOrPrompt {
    fn for_new_key(&self, role: Role) -> Result<SecretString> {
        self.resolve(
            Some(role),
            &format!("Please type a passphrase to encrypt your {} private key: ", role),
        )
    }

    fn for_unlock(&self, account: &Account) -> Result<SecretString> {
        let role = self.role_of(account);
        tracing::debug!(account = %account, role = ?role, "Resolving keystore passphrase");
        self.resolve(role, &format!("Passphrase for {}: ", account))
    }
}

/// First variable in `vars` that is set, in order
fn first_set(vars: &[&str], lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    vars.iter().copied().find_map(|var| {
        let value = lookup(var)?;
        tracing::debug!(var, "Using passphrase from environment");
        Some(value)
    })
}

fn env_or_prompt(vars: &[&str], prompt: &str) -> Result<SecretString> {
    match first_set(vars, |var| std::env::var(var).ok()) {
        Some(value) => Ok(SecretString::from(value)),
        None => prompt_passphrase(prompt),
    }
}

fn prompt_passphrase(prompt: &str) -> Result<SecretString> {
    rpassword::prompt_password(prompt)
        .map(SecretString::from)
        .map_err(|e| Error::Keystore(format!("Failed to read passphrase: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use secrecy::ExposeSecret;

    #[test]
    fn test_unattended_roles_need_no_prompt() {
        let source = EnvOrPrompt::new();
        let requester = address!("00000000000000000000000000000000000000aa");
        source.bind(requester, Role::Requester);

        let pass = source.for_unlock(&Account::from_evm(requester)).unwrap();
        assert_eq!(pass.expose_secret(), "");

        let pass = source.for_new_key(Role::OwnerProposer).unwrap();
        assert_eq!(pass.expose_secret(), "");
    }

    #[test]
    fn test_older_variable_names_are_fallbacks() {
        let only_old = |var: &str| (var == GLIF_OWNER_PASSPHRASE_ENV).then(|| "old".to_string());
        assert_eq!(first_set(&OWNER_VARS, only_old).as_deref(), Some("old"));

        let both = |var: &str| match var {
            OPERATOR_PASSPHRASE_ENV => Some("new".to_string()),
            GLIF_OPERATOR_PASSPHRASE_ENV => Some("old".to_string()),
            _ => None,
        };
        assert_eq!(first_set(&OPERATOR_VARS, both).as_deref(), Some("new"));

        assert_eq!(first_set(&OWNER_VARS, |_| None), None);
    }
}
