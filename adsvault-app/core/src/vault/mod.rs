//! Sealed credential vault.
//!
//! This module provides encrypted storage for wallet secrets:
//! - The seed phrase and its canonical seed
//! - Derived and imported keypairs
//! - Accounts bound to those keys
//!
//! The vault is protected by a user password which is transformed via
//! Argon2id into an encryption key. All mutations go through
//! [`VaultStore::apply`].

pub mod command;
pub mod crypt;
pub mod error;
pub mod model;
pub mod storage;
pub mod store;
pub mod validators;

pub use command::{CommandOutcome, SessionEvent, VaultCommand};
pub use crypt::{VaultCrypt, VaultKey};
pub use error::{CryptError, ValidationError, VaultError, VaultResult};
pub use model::{Account, SealedSecret, SealedVault, Vault, VaultSecrets};
pub use storage::{FileStore, KeyValueStore, MemoryStore, VaultPersistence, WriteTicket};
pub use store::VaultStore;
