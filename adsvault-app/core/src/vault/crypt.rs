//! Vault crypto codec using Argon2id and AES-256-GCM.
//!
//! The vault key is derived from the password with Argon2id and a 16-byte
//! salt that is created together with the vault. The plaintext fields are
//! serialized to JSON and sealed with AES-256-GCM under a fresh nonce.
//!
//! Next to the ciphertext we keep a verifier, `SHA-256(domain || key)`,
//! so a password can be checked without decrypting anything.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::error::CryptError;
use super::model::{SealedSecret, VaultSecrets};
use crate::config::KdfParams;

/// Current layout version of [`SealedSecret`].
pub const SECRET_VERSION: u8 = 1;

/// Salt size in bytes (128 bits)
const SALT_SIZE: usize = 16;

/// Nonce size for AES-GCM (96 bits = 12 bytes)
const NONCE_SIZE: usize = 12;

/// 256-bit key for AES-256
const KEY_SIZE: usize = 32;

const VERIFIER_DOMAIN: &[u8] = b"adsvault/verifier/v1";

/// A 256-bit vault key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_SIZE],
}

impl VaultKey {
    fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    fn verifier(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(VERIFIER_DOMAIN);
        hasher.update(self.key);
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log the actual key material
        f.debug_struct("VaultKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VaultCrypt {
    params: KdfParams,
}

impl VaultCrypt {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    /// Derive the vault key from the password using Argon2id.
    ///
    /// Intentionally slow and memory-hard.
    pub fn derive_key(&self, password: &str, salt: &[u8]) -> Result<VaultKey, CryptError> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptError::KeyDerivation(format!("Invalid Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key_bytes = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key_bytes)
            .map_err(|e| CryptError::KeyDerivation(e.to_string()))?;

        let key = VaultKey::from_bytes(key_bytes);
        key_bytes.zeroize();
        Ok(key)
    }

    /// Seal `fields` under a key derived from `password` and a fresh salt.
    pub fn encrypt(&self, fields: &VaultSecrets, password: &str) -> Result<SealedSecret, CryptError> {
        self.encrypt_new(fields, password).map(|(secret, _)| secret)
    }

    /// Like [`encrypt`](Self::encrypt), also handing back the derived key.
    pub fn encrypt_new(
        &self,
        fields: &VaultSecrets,
        password: &str,
    ) -> Result<(SealedSecret, VaultKey), CryptError> {
        let mut salt = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut salt);

        let key = self.derive_key(password, &salt)?;
        let secret = self.encrypt_with_key(fields, &key, &hex::encode(salt))?;
        Ok((secret, key))
    }

    /// Reseal `fields` with an already derived key and the vault's salt.
    pub fn encrypt_with_key(
        &self,
        fields: &VaultSecrets,
        key: &VaultKey,
        salt: &str,
    ) -> Result<SealedSecret, CryptError> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(fields).map_err(|e| CryptError::Encoding(e.to_string()))?,
        );

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptError::Encoding(format!("Invalid key: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| CryptError::Encoding(format!("Encryption failed: {}", e)))?;

        debug!("Sealed {} bytes of vault data", plaintext.len());

        Ok(SealedSecret {
            version: SECRET_VERSION,
            salt: salt.to_string(),
            verifier: hex::encode(key.verifier()),
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
            sealed_at: Utc::now(),
        })
    }

    /// Decrypt the sealed fields with the password.
    pub fn decrypt(&self, secret: &SealedSecret, password: &str) -> Result<VaultSecrets, CryptError> {
        let salt = decode_field("salt", &secret.salt)?;
        let key = self.derive_key(password, &salt)?;
        self.decrypt_with_key(secret, &key)
    }

    pub fn decrypt_with_key(
        &self,
        secret: &SealedSecret,
        key: &VaultKey,
    ) -> Result<VaultSecrets, CryptError> {
        if secret.version != SECRET_VERSION {
            return Err(CryptError::Malformed(format!(
                "Unsupported secret version {}",
                secret.version
            )));
        }

        let nonce_bytes = decode_field("nonce", &secret.nonce)?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptError::Malformed("Invalid nonce size".into()));
        }
        let ciphertext = decode_field("ciphertext", &secret.ciphertext)?;

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptError::Encoding(format!("Invalid key: {}", e)))?;

        // Wrong key and tampered data look the same here.
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
                .map_err(|_| CryptError::Authentication)?,
        );

        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptError::Malformed(format!("Vault data corrupted: {}", e)))
    }

    /// Derive the key and compare its verifier in constant time.
    ///
    /// Returns the key when the password is correct.
    pub fn unlock(&self, secret: &SealedSecret, password: &str) -> Option<VaultKey> {
        let (salt, expected) = match (
            decode_field("salt", &secret.salt),
            decode_field("verifier", &secret.verifier),
        ) {
            (Ok(salt), Ok(expected)) => (salt, expected),
            _ => {
                warn!("Sealed secret has malformed salt or verifier");
                return None;
            }
        };

        let key = match self.derive_key(password, &salt) {
            Ok(key) => key,
            Err(e) => {
                warn!("Key derivation failed during password check: {}", e);
                return None;
            }
        };

        if bool::from(key.verifier().as_slice().ct_eq(expected.as_slice())) {
            Some(key)
        } else {
            None
        }
    }

    /// Cheap password check; does not decrypt the vault fields.
    pub fn check_password(&self, secret: &SealedSecret, password: &str) -> bool {
        self.unlock(secret, password).is_some()
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptError> {
    hex::decode(value).map_err(|e| CryptError::Malformed(format!("Invalid {}: {}", name, e)))
}
