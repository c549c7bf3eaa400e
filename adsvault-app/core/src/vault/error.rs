//! Vault error kinds.
//!
//! Every command of the vault store either succeeds completely or fails
//! with one of these kinds before anything is mutated. Callers branch on
//! the kind (or its serialized `code`), never on the message text.

use thiserror::Error;

/// Faults raised by the crypto codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptError {
    /// Wrong password or tampered ciphertext. The codec never returns
    /// plaintext that failed authentication.
    #[error("Authentication failed")]
    Authentication,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The sealed record is structurally invalid (bad hex, wrong sizes,
    /// unknown version).
    #[error("Malformed secret: {0}")]
    Malformed(String),
}

/// Failures of the key import validators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Key named {0} already exists")]
    DuplicateName(String),

    #[error("Please provide a valid public key")]
    InvalidPublicKey,

    #[error("Please provide a valid secret key")]
    InvalidSecretKey,

    #[error("Public and secret key do not match")]
    KeyMismatch,

    #[error("Given public key already exists in the vault")]
    DuplicatePublicKey,

    #[error("Given secret key already exists in the vault")]
    DuplicateSecretKey,
}

#[derive(Error, Debug)]
pub enum VaultError {
    /// The password does not unlock this vault.
    #[error("Invalid password")]
    InvalidPassword,

    /// Adding an account would exceed the configured cap.
    #[error("Accounts limit of {0} reached")]
    AccountsLimit(usize),

    /// The referenced public key is not among the vault's keys.
    #[error("Unknown public key: {0}")]
    UnknownPublicKey(String),

    /// The referenced item does not exist.
    #[error("Cannot find {kind} {id}")]
    ItemNotFound { kind: &'static str, id: String },

    /// No vault has been created yet.
    #[error("Vault not set up")]
    NotSetup,

    /// Create was issued against a non-empty vault.
    #[error("Vault already exists")]
    AlreadyExists,

    /// The command needs an unsealed vault.
    #[error("Vault is sealed")]
    Locked,

    #[error("Invalid seed phrase: {0}")]
    InvalidSeedPhrase(String),

    #[error("Password must be at least {0} characters long")]
    WeakPassword(usize),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Vault crypto error: {0}")]
    Crypt(#[from] CryptError),
}

impl VaultError {
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::InvalidPassword => "INVALID_PASSWORD",
            VaultError::AccountsLimit(_) => "ACCOUNTS_LIMIT",
            VaultError::UnknownPublicKey(_) => "UNKNOWN_PUBLIC_KEY",
            VaultError::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            VaultError::NotSetup => "NOT_SETUP",
            VaultError::AlreadyExists => "ALREADY_EXISTS",
            VaultError::Locked => "LOCKED",
            VaultError::InvalidSeedPhrase(_) => "INVALID_SEED_PHRASE",
            VaultError::WeakPassword(_) => "WEAK_PASSWORD",
            VaultError::Validation(_) => "VALIDATION_ERROR",
            VaultError::Crypt(CryptError::Authentication) => "AUTHENTICATION_FAILED",
            VaultError::Crypt(_) => "CRYPTO_ERROR",
        }
    }
}

/// Result type alias for vault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;

// ============================================================================
// Serialization for the presentation layer
// ============================================================================

impl serde::Serialize for VaultError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("VaultError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_error_serialization() {
        let err = VaultError::AccountsLimit(5);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("ACCOUNTS_LIMIT"));
        assert!(json.contains("Accounts limit of 5 reached"));
    }

    #[test]
    fn test_item_not_found_message() {
        let err = VaultError::ItemNotFound {
            kind: "account",
            id: "U0001".into(),
        };
        assert_eq!(err.to_string(), "Cannot find account U0001");
        assert_eq!(err.code(), "ITEM_NOT_FOUND");
    }

    #[test]
    fn test_authentication_fault_is_distinct_from_invalid_password() {
        let fault: VaultError = CryptError::Authentication.into();
        assert_eq!(fault.code(), "AUTHENTICATION_FAILED");
        assert_ne!(fault.code(), VaultError::InvalidPassword.code());
    }
}
