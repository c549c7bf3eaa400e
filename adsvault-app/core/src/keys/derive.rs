//! Deterministic Ed25519 keypair derivation and signing.
//!
//! Keys are derived from the BIP39 seed with SLIP-0010 (Ed25519, hardened
//! only). Key `i` lives at path `m/i'`, so the same seed always yields the
//! same ordered key list and a longer list extends a shorter one.
//!
//! Public and secret keys travel as 64 upper-case hex characters, the
//! format ADS tooling uses.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::Zeroize;

use super::mnemonic::Seed;
use crate::error::{AdsVaultError, Result};

type HmacSha512 = Hmac<Sha512>;

/// Hardened index offset per SLIP-0010.
const HARDENED_OFFSET: u32 = 0x8000_0000;

/// HMAC key for master key generation.
const MASTER_HMAC_KEY: &[u8] = b"ed25519 seed";

/// Size of Ed25519 public and secret keys in bytes.
pub const KEY_SIZE: usize = 32;

/// A named keypair held by the vault.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub name: String,
    pub public_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name)
            .field("public_key", &self.public_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Derive `count` ordered keys from the seed.
pub fn generate_keys(seed: &Seed, count: usize) -> Result<Vec<Key>> {
    let seed_bytes = seed.to_bytes()?;
    let (mut master_key, mut master_chain) = master_key_from_seed(seed_bytes.as_slice())?;

    let mut keys = Vec::with_capacity(count);
    for index in 0..count {
        let index = u32::try_from(index)
            .ok()
            .filter(|i| *i < HARDENED_OFFSET)
            .ok_or_else(|| AdsVaultError::Key(format!("Key index {} out of range", index)))?;

        let (mut secret, mut chain) = derive_hardened_child(&master_key, &master_chain, index)?;
        let signing_key = SigningKey::from_bytes(&secret);

        keys.push(Key {
            name: format!("Key {}", index + 1),
            public_key: hex::encode_upper(signing_key.verifying_key().as_bytes()),
            secret_key: hex::encode_upper(secret),
        });

        secret.zeroize();
        chain.zeroize();
    }

    master_key.zeroize();
    master_chain.zeroize();

    Ok(keys)
}

/// Compute the public key belonging to a secret key.
pub fn get_public_key_from_secret(secret_key: &str) -> Result<String> {
    let signing_key = signing_key_from_hex(secret_key)?;
    Ok(hex::encode_upper(signing_key.verifying_key().as_bytes()))
}

/// Structural check for a hex-encoded 32-byte key.
///
/// This does not check whether the key exists in any vault.
pub fn validate_key(value: &str) -> bool {
    value.len() == KEY_SIZE * 2 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Sign `data` with a hex-encoded secret key.
///
/// Returns the 64-byte signature as upper-case hex.
pub fn sign(data: &[u8], secret_key: &str) -> Result<String> {
    let signing_key = signing_key_from_hex(secret_key)?;
    let signature = signing_key.sign(data);
    Ok(hex::encode_upper(signature.to_bytes()))
}

/// Verify an upper- or lower-case hex signature against a public key.
pub fn verify(data: &[u8], signature: &str, public_key: &str) -> bool {
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let Ok(pk_bytes) = hex::decode(public_key) else {
        return false;
    };
    let Ok(pk_bytes) = <[u8; KEY_SIZE]>::try_from(pk_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_bytes) else {
        return false;
    };

    verifying_key
        .verify(data, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

fn signing_key_from_hex(secret_key: &str) -> Result<SigningKey> {
    if !validate_key(secret_key) {
        return Err(AdsVaultError::Key("Secret key must be 64 hex characters".into()));
    }

    let mut bytes = [0u8; KEY_SIZE];
    hex::decode_to_slice(secret_key, &mut bytes)
        .map_err(|e| AdsVaultError::Key(format!("Invalid secret key: {}", e)))?;
    let signing_key = SigningKey::from_bytes(&bytes);
    bytes.zeroize();

    Ok(signing_key)
}

/// `I = HMAC-SHA512("ed25519 seed", seed)`; left half is the key, right
/// half the chain code.
fn master_key_from_seed(seed: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    let mut i = hmac_sha512(MASTER_HMAC_KEY, seed)?;
    let split = split_halves(&i);
    i.zeroize();
    Ok(split)
}

fn derive_hardened_child(
    parent_key: &[u8; 32],
    parent_chain_code: &[u8; 32],
    index: u32,
) -> Result<([u8; 32], [u8; 32])> {
    // 0x00 || parent_key || ser32(index | 0x80000000)
    let mut data = [0u8; 37];
    data[1..33].copy_from_slice(parent_key);
    data[33..37].copy_from_slice(&(index | HARDENED_OFFSET).to_be_bytes());

    let mut i = hmac_sha512(parent_chain_code, &data)?;
    data.zeroize();

    let split = split_halves(&i);
    i.zeroize();
    Ok(split)
}

fn split_halves(i: &[u8; 64]) -> ([u8; 32], [u8; 32]) {
    let mut left = [0u8; 32];
    let mut right = [0u8; 32];
    left.copy_from_slice(&i[..32]);
    right.copy_from_slice(&i[32..]);
    (left, right)
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> Result<[u8; 64]> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| AdsVaultError::Key(format!("HMAC-SHA512 key init failed: {}", e)))?;
    mac.update(data);

    let mut output = [0u8; 64];
    output.copy_from_slice(&mac.finalize().into_bytes());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::mnemonic::{generate_seed_phrase, seed_phrase_to_hex};

    fn test_seed() -> Seed {
        Seed::from_hex(&"ab".repeat(64)).unwrap()
    }

    #[test]
    fn test_generate_keys_deterministic() {
        let seed = test_seed();
        let first = generate_keys(&seed, 5).unwrap();
        let second = generate_keys(&seed, 5).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
        assert_eq!(first[0].name, "Key 1");
        assert_eq!(first[4].name, "Key 5");
    }

    #[test]
    fn test_generate_keys_prefix_stable() {
        let seed = test_seed();
        let short = generate_keys(&seed, 3).unwrap();
        let long = generate_keys(&seed, 7).unwrap();
        assert_eq!(short[..], long[..3]);
    }

    #[test]
    fn test_generate_keys_unique() {
        let keys = generate_keys(&test_seed(), 10).unwrap();
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a.public_key, b.public_key);
                assert_ne!(a.secret_key, b.secret_key);
            }
        }
    }

    #[test]
    fn test_different_seeds_different_keys() {
        let a = seed_phrase_to_hex(&generate_seed_phrase().unwrap()).unwrap();
        let b = seed_phrase_to_hex(&generate_seed_phrase().unwrap()).unwrap();
        assert_ne!(
            generate_keys(&a, 1).unwrap()[0].public_key,
            generate_keys(&b, 1).unwrap()[0].public_key
        );
    }

    #[test]
    fn test_public_key_from_secret_matches_derivation() {
        for key in generate_keys(&test_seed(), 3).unwrap() {
            assert_eq!(get_public_key_from_secret(&key.secret_key).unwrap(), key.public_key);
            assert!(validate_key(&key.public_key));
            assert!(validate_key(&key.secret_key));
        }
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key(&"0A".repeat(32)));
        assert!(!validate_key(&"0A".repeat(31)));
        assert!(!validate_key(&"ZZ".repeat(32)));
        assert!(!validate_key(""));
    }

    #[test]
    fn test_sign_and_verify() {
        let key = generate_keys(&test_seed(), 1).unwrap().remove(0);
        let signature = sign(b"transfer 10 ADS", &key.secret_key).unwrap();

        assert_eq!(signature.len(), 128);
        assert!(verify(b"transfer 10 ADS", &signature, &key.public_key));
        assert!(!verify(b"transfer 11 ADS", &signature, &key.public_key));
        assert!(!verify(b"transfer 10 ADS", "00", &key.public_key));
    }

    #[test]
    fn test_sign_rejects_malformed_secret() {
        assert!(sign(b"data", "not-a-key").is_err());
        assert!(get_public_key_from_secret("1234").is_err());
    }
}
