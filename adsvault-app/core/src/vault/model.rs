//! Vault aggregate and its parts.
//!
//! The vault keeps plaintext fields in [`VaultSecrets`], which is only
//! present while the vault is unsealed. [`SealedVault`] is the projection
//! that everyone else (and the storage medium) gets to see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::keys::{Key, Seed, SeedPhrase};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: String,
    pub name: String,
    pub public_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("public_key", &self.public_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for Account {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// The fields protected by the vault ciphertext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecrets {
    pub seed_phrase: SeedPhrase,
    pub seed: Seed,
    pub keys: Vec<Key>,
    #[serde(default)]
    pub imported_keys: Vec<Key>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub selected_account: Option<String>,
}

impl VaultSecrets {
    /// Derived keys first, then imported ones.
    pub fn all_keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter().chain(self.imported_keys.iter())
    }

    pub fn find_key(&self, public_key: &str) -> Option<&Key> {
        self.all_keys().find(|k| k.public_key == public_key)
    }

    pub fn find_account(&self, address: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.address == address)
    }
}

impl std::fmt::Debug for VaultSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSecrets")
            .field("keys", &self.keys.len())
            .field("imported_keys", &self.imported_keys.len())
            .field("accounts", &self.accounts.len())
            .field("selected_account", &self.selected_account)
            .finish_non_exhaustive()
    }
}

/// Authenticated ciphertext of [`VaultSecrets`].
///
/// Binary fields are hex encoded. The salt is chosen when the vault is
/// created and kept across reseals so a derived key stays valid for the
/// lifetime of the vault; the nonce is fresh on every seal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedSecret {
    pub version: u8,
    pub salt: String,
    /// SHA-256 over the derived key, checked in constant time.
    pub verifier: String,
    pub nonce: String,
    pub ciphertext: String,
    pub sealed_at: DateTime<Utc>,
}

/// Externally observable vault state. This is also the persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedVault {
    pub empty: bool,
    pub sealed: bool,
    pub secret: Option<SealedSecret>,
}

impl Default for SealedVault {
    fn default() -> Self {
        Self {
            empty: true,
            sealed: true,
            secret: None,
        }
    }
}

/// The vault aggregate.
#[derive(Debug, Clone)]
pub struct Vault {
    pub(crate) empty: bool,
    pub(crate) sealed: bool,
    pub(crate) secret: Option<SealedSecret>,
    pub(crate) secrets: Option<VaultSecrets>,
}

impl Default for Vault {
    fn default() -> Self {
        Self::initial()
    }
}

impl Vault {
    /// Empty and sealed; no ciphertext has ever been produced.
    pub fn initial() -> Self {
        Self {
            empty: true,
            sealed: true,
            secret: None,
            secrets: None,
        }
    }

    /// Rebuild the sealed state from a persisted record.
    pub fn from_record(record: SealedVault) -> Self {
        match record.secret {
            Some(secret) => Self {
                empty: false,
                sealed: true,
                secret: Some(secret),
                secrets: None,
            },
            None => Self::initial(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn secret(&self) -> Option<&SealedSecret> {
        self.secret.as_ref()
    }

    /// Plaintext fields; `None` while sealed.
    pub fn secrets(&self) -> Option<&VaultSecrets> {
        if self.sealed {
            None
        } else {
            self.secrets.as_ref()
        }
    }

    pub fn sealed_view(&self) -> SealedVault {
        SealedVault {
            empty: self.empty,
            sealed: self.sealed,
            secret: self.secret.clone(),
        }
    }

    pub(crate) fn unsealed(secret: SealedSecret, secrets: VaultSecrets) -> Self {
        Self {
            empty: false,
            sealed: false,
            secret: Some(secret),
            secrets: Some(secrets),
        }
    }

    /// Drop the plaintext fields, keeping ciphertext and flags.
    pub(crate) fn seal(&mut self) {
        self.secrets = None;
        self.sealed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> VaultSecrets {
        let phrase = crate::keys::generate_seed_phrase().unwrap();
        let seed = crate::keys::seed_phrase_to_hex(&phrase).unwrap();
        let keys = crate::keys::generate_keys(&seed, 2).unwrap();
        VaultSecrets {
            seed_phrase: phrase,
            seed,
            keys,
            imported_keys: Vec::new(),
            accounts: Vec::new(),
            selected_account: None,
        }
    }

    fn secret() -> SealedSecret {
        SealedSecret {
            version: 1,
            salt: String::new(),
            verifier: String::new(),
            nonce: String::new(),
            ciphertext: String::new(),
            sealed_at: Utc::now(),
        }
    }

    #[test]
    fn test_initial_vault_is_empty_and_sealed() {
        let vault = Vault::initial();
        assert!(vault.is_empty());
        assert!(vault.is_sealed());
        assert!(vault.secrets().is_none());
        assert_eq!(vault.sealed_view(), SealedVault::default());
    }

    #[test]
    fn test_seal_clears_plaintext() {
        let mut vault = Vault::unsealed(secret(), secrets());
        assert!(vault.secrets().is_some());

        vault.seal();
        assert!(vault.secrets.is_none());
        assert!(!vault.is_empty());
        assert!(vault.secret().is_some());
    }

    #[test]
    fn test_sealed_view_serializes_without_plaintext() {
        let vault = Vault::unsealed(secret(), secrets());
        let json = serde_json::to_value(vault.sealed_view()).unwrap();
        let fields: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(fields, vec!["empty", "sealed", "secret"]);
    }

    #[test]
    fn test_from_record_forces_sealed() {
        let record = SealedVault {
            empty: false,
            sealed: false,
            secret: Some(secret()),
        };
        let vault = Vault::from_record(record);
        assert!(vault.is_sealed());
        assert!(!vault.is_empty());
    }

    #[test]
    fn test_find_key_searches_imported_keys() {
        let mut s = secrets();
        let imported = s.keys.pop().unwrap();
        s.imported_keys.push(imported.clone());
        assert_eq!(s.find_key(&imported.public_key), Some(&imported));
        assert!(s.find_key("missing").is_none());
    }
}
