//! VaultStore - the command-driven vault state machine.
//!
//! The store owns the single [`Vault`] aggregate. States:
//! - empty and sealed (nothing created yet)
//! - sealed with ciphertext
//! - unsealed, plaintext fields in memory
//!
//! Commands are applied to a copy of the plaintext fields. The copy is
//! resealed and only then committed, so a failed command leaves the vault
//! exactly as it was. Durable writes are queued on the persistence writer
//! and reported through the returned [`WriteTicket`](super::WriteTicket).

use std::sync::Arc;

use tracing::{debug, info};

use super::command::{CommandOutcome, SessionEvent, VaultCommand};
use super::crypt::{VaultCrypt, VaultKey};
use super::error::{CryptError, VaultError, VaultResult};
use super::model::{Account, SealedVault, Vault, VaultSecrets};
use super::storage::{KeyValueStore, VaultPersistence};
use super::validators;
use crate::bridge::SessionToken;
use crate::config::VaultConfig;
use crate::error::{AdsVaultError, Result};
use crate::keys::{generate_keys, seed_phrase_to_hex, Key, SeedPhrase};

pub struct VaultStore {
    config: VaultConfig,
    crypt: VaultCrypt,
    persistence: VaultPersistence,
    vault: Vault,
}

impl VaultStore {
    /// Load the persisted record (if any) and start the persistence writer.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn open(config: VaultConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;
        let persistence = VaultPersistence::spawn(store, config.vault_storage_key());
        let vault = match persistence.load().await? {
            Some(record) => Vault::from_record(record),
            None => Vault::initial(),
        };

        info!(
            "Vault store opened (key: {}, empty: {})",
            persistence.storage_key(),
            vault.is_empty()
        );

        Ok(Self {
            crypt: VaultCrypt::new(config.kdf),
            config,
            persistence,
            vault,
        })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// The projection handed to everyone outside the store.
    pub fn sealed_view(&self) -> SealedVault {
        self.vault.sealed_view()
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn crypt(&self) -> VaultCrypt {
        self.crypt
    }

    pub fn persistence(&self) -> &VaultPersistence {
        &self.persistence
    }

    /// Apply one command. On error nothing has changed.
    pub fn apply(&mut self, command: VaultCommand) -> VaultResult<CommandOutcome> {
        debug!("Applying vault command {:?}", command);

        match command {
            VaultCommand::Create {
                password,
                seed_phrase,
            } => self.create(&password, &seed_phrase),
            VaultCommand::Unseal { password } => self.unseal(&password),
            VaultCommand::Seal => Ok(self.seal()),
            VaultCommand::Erase => Ok(self.erase()),
            VaultCommand::AddAccount {
                password,
                address,
                name,
                public_key,
            } => self.add_account(&password, &address, name, &public_key),
            VaultCommand::UpdateAccount {
                password,
                address,
                name,
                public_key,
            } => self.update_account(&password, &address, name, &public_key),
            VaultCommand::RemoveAccount { password, address } => {
                self.remove_account(&password, &address)
            }
            VaultCommand::ImportKey {
                password,
                name,
                secret_key,
                public_key,
            } => self.import_key(&password, name, &secret_key, &public_key),
            VaultCommand::SelectAccount { password, address } => {
                self.select_account(&password, &address)
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn create(&mut self, password: &str, phrase: &str) -> VaultResult<CommandOutcome> {
        if !self.vault.is_empty() {
            return Err(VaultError::AlreadyExists);
        }
        if password.chars().count() < self.config.password_min_length {
            return Err(VaultError::WeakPassword(self.config.password_min_length));
        }

        let seed_phrase = SeedPhrase::parse(phrase).map_err(seed_phrase_error)?;
        let seed = seed_phrase_to_hex(&seed_phrase).map_err(seed_phrase_error)?;
        let keys = generate_keys(&seed, self.config.init_keys_quantity)
            .map_err(|e| CryptError::KeyDerivation(e.to_string()))?;

        info!("Creating vault with {} keys", keys.len());

        let secrets = VaultSecrets {
            seed_phrase,
            seed,
            keys,
            imported_keys: Vec::new(),
            accounts: Vec::new(),
            selected_account: None,
        };
        let (secret, key) = self.crypt.encrypt_new(&secrets, password)?;

        self.vault = Vault::unsealed(secret, secrets);
        let write = self.persistence.save(&self.vault.sealed_view());

        info!("Vault created");
        Ok(CommandOutcome {
            write: Some(write),
            session: SessionEvent::Start(SessionToken::new(key)),
        })
    }

    fn unseal(&mut self, password: &str) -> VaultResult<CommandOutcome> {
        let secret = match self.vault.secret() {
            Some(secret) if !self.vault.is_empty() => secret.clone(),
            _ => return Err(VaultError::NotSetup),
        };

        let key = validators::password(&self.crypt, &secret, password)
            .ok_or(VaultError::InvalidPassword)?;
        let secrets = self.crypt.decrypt_with_key(&secret, &key)?;

        self.vault = Vault::unsealed(secret, secrets);

        info!("Vault unsealed");
        Ok(CommandOutcome {
            write: None,
            session: SessionEvent::Start(SessionToken::new(key)),
        })
    }

    fn seal(&mut self) -> CommandOutcome {
        if self.vault.is_sealed() {
            return CommandOutcome::unchanged();
        }

        self.vault.seal();

        info!("Vault sealed");
        CommandOutcome {
            write: None,
            session: SessionEvent::End,
        }
    }

    fn erase(&mut self) -> CommandOutcome {
        info!("Erasing vault - all keys and accounts will be lost!");

        self.vault = Vault::initial();
        CommandOutcome {
            write: Some(self.persistence.erase()),
            session: SessionEvent::End,
        }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    fn add_account(
        &mut self,
        password: &str,
        address: &str,
        name: String,
        public_key: &str,
    ) -> VaultResult<CommandOutcome> {
        let (key, mut secrets) = self.authorize(password)?;

        if secrets.accounts.len() >= self.config.accounts_limit {
            return Err(VaultError::AccountsLimit(self.config.accounts_limit));
        }
        let account_key = lookup_key(&secrets, public_key)?;

        secrets.accounts.push(Account {
            address: address.to_uppercase(),
            name,
            public_key: account_key.public_key.clone(),
            secret_key: account_key.secret_key.clone(),
        });

        debug!("Added account {}", address.to_uppercase());
        self.reseal(&key, secrets)
    }

    fn update_account(
        &mut self,
        password: &str,
        address: &str,
        name: String,
        public_key: &str,
    ) -> VaultResult<CommandOutcome> {
        let (key, mut secrets) = self.authorize(password)?;

        let account_key = lookup_key(&secrets, public_key)?;
        let address = address.to_uppercase();
        let account = secrets
            .accounts
            .iter_mut()
            .find(|a| a.address == address)
            .ok_or_else(|| account_not_found(&address))?;

        account.name = name;
        account.public_key = account_key.public_key.clone();
        account.secret_key = account_key.secret_key.clone();

        debug!("Updated account {}", address);
        self.reseal(&key, secrets)
    }

    fn remove_account(&mut self, password: &str, address: &str) -> VaultResult<CommandOutcome> {
        let (key, mut secrets) = self.authorize(password)?;

        let address = address.to_uppercase();
        if secrets.find_account(&address).is_none() {
            return Err(account_not_found(&address));
        }

        secrets.accounts.retain(|a| a.address != address);
        if secrets.selected_account.as_deref() == Some(address.as_str()) {
            secrets.selected_account = None;
        }

        debug!("Removed account {}", address);
        self.reseal(&key, secrets)
    }

    fn select_account(&mut self, password: &str, address: &str) -> VaultResult<CommandOutcome> {
        let (key, mut secrets) = self.authorize(password)?;

        let address = address.to_uppercase();
        if secrets.find_account(&address).is_none() {
            return Err(account_not_found(&address));
        }

        secrets.selected_account = Some(address);
        self.reseal(&key, secrets)
    }

    // =========================================================================
    // Keys
    // =========================================================================

    fn import_key(
        &mut self,
        password: &str,
        name: String,
        secret_key: &str,
        public_key: &str,
    ) -> VaultResult<CommandOutcome> {
        let (key, mut secrets) = self.authorize(password)?;

        let secret_key = secret_key.to_uppercase();
        let public_key = public_key.to_uppercase();
        validators::import_key(&name, &secret_key, &public_key, &secrets)?;

        info!("Importing key {}", name);
        secrets.imported_keys.push(Key {
            name,
            public_key,
            secret_key,
        });
        self.reseal(&key, secrets)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Require an unsealed vault and the right password.
    ///
    /// Hands back the derived key and a working copy of the plaintext.
    fn authorize(&self, password: &str) -> VaultResult<(VaultKey, VaultSecrets)> {
        let (Some(secret), Some(secrets)) = (self.vault.secret(), self.vault.secrets()) else {
            return Err(VaultError::Locked);
        };

        let key = validators::password(&self.crypt, secret, password)
            .ok_or(VaultError::InvalidPassword)?;

        Ok((key, secrets.clone()))
    }

    /// Seal the working copy under the vault's salt, commit, and persist.
    fn reseal(&mut self, key: &VaultKey, secrets: VaultSecrets) -> VaultResult<CommandOutcome> {
        let salt = self
            .vault
            .secret()
            .map(|s| s.salt.clone())
            .ok_or(VaultError::Locked)?;
        let secret = self.crypt.encrypt_with_key(&secrets, key, &salt)?;

        self.vault = Vault::unsealed(secret, secrets);
        Ok(CommandOutcome {
            write: Some(self.persistence.save(&self.vault.sealed_view())),
            session: SessionEvent::None,
        })
    }
}

fn lookup_key(secrets: &VaultSecrets, public_key: &str) -> VaultResult<Key> {
    let public_key = public_key.to_uppercase();
    secrets
        .find_key(&public_key)
        .cloned()
        .ok_or(VaultError::UnknownPublicKey(public_key))
}

fn account_not_found(address: &str) -> VaultError {
    VaultError::ItemNotFound {
        kind: "account",
        id: address.to_string(),
    }
}

fn seed_phrase_error(err: AdsVaultError) -> VaultError {
    match err {
        AdsVaultError::Key(reason) => VaultError::InvalidSeedPhrase(reason),
        other => VaultError::InvalidSeedPhrase(other.to_string()),
    }
}
