//! Validation rules checked before a key import is applied.
//!
//! These are pure predicates over the current vault contents; none of them
//! mutate anything.

use super::crypt::{VaultCrypt, VaultKey};
use super::error::ValidationError;
use super::model::{SealedSecret, VaultSecrets};
use crate::keys::{get_public_key_from_secret, validate_key};

/// The key name must not be taken by another key.
pub fn name(value: &str, vault: &VaultSecrets) -> Result<(), ValidationError> {
    if vault.all_keys().any(|k| k.name == value) {
        return Err(ValidationError::DuplicateName(value.to_string()));
    }
    Ok(())
}

/// The secret key must be well formed and unknown to the vault.
pub fn secret_key(value: &str, vault: &VaultSecrets) -> Result<(), ValidationError> {
    if !validate_key(value) {
        return Err(ValidationError::InvalidSecretKey);
    }
    if vault.all_keys().any(|k| k.secret_key.eq_ignore_ascii_case(value)) {
        return Err(ValidationError::DuplicateSecretKey);
    }
    Ok(())
}

/// The public key must be well formed, belong to `secret`, and be unknown
/// to the vault.
pub fn public_key(value: &str, secret: &str, vault: &VaultSecrets) -> Result<(), ValidationError> {
    if !validate_key(value) {
        return Err(ValidationError::InvalidPublicKey);
    }
    match get_public_key_from_secret(secret) {
        Ok(derived) if derived.eq_ignore_ascii_case(value) => {}
        _ => return Err(ValidationError::KeyMismatch),
    }
    if vault.all_keys().any(|k| k.public_key.eq_ignore_ascii_case(value)) {
        return Err(ValidationError::DuplicatePublicKey);
    }
    Ok(())
}

/// Full rule set for importing a key, in display order.
pub fn import_key(
    key_name: &str,
    secret: &str,
    public: &str,
    vault: &VaultSecrets,
) -> Result<(), ValidationError> {
    name(key_name, vault)?;
    secret_key(secret, vault)?;
    public_key(public, secret, vault)
}

/// The password must unlock the sealed secret.
///
/// Yields the derived vault key when it does.
pub fn password(crypt: &VaultCrypt, secret: &SealedSecret, value: &str) -> Option<VaultKey> {
    crypt.unlock(secret, value)
}
