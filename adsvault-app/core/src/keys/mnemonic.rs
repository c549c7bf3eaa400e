//! BIP39 seed phrases and their canonical seed encoding.
//!
//! A seed phrase is 24 English words (256 bits of entropy). It is turned
//! into a 64-byte BIP39 seed (PBKDF2-HMAC-SHA512, empty passphrase) which
//! is kept as lowercase hex. The conversion is one-way: recovering the
//! phrase from the seed is not supported.

use bip39::{Language, Mnemonic};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{AdsVaultError, Result};

/// Entropy size in bytes (256 bits, 24 words).
const ENTROPY_SIZE: usize = 32;

/// Byte length of a BIP39 seed.
pub const SEED_SIZE: usize = 64;

/// A normalized BIP39 mnemonic.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SeedPhrase(String);

impl SeedPhrase {
    /// Parse and normalize a user-supplied phrase.
    ///
    /// Extra whitespace and letter case are ignored. Unknown words and bad
    /// checksums are rejected.
    pub fn parse(phrase: &str) -> Result<Self> {
        let normalized = phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");

        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|e| AdsVaultError::Key(format!("Invalid seed phrase: {}", e)))?;

        Ok(Self(mnemonic.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn word_count(&self) -> usize {
        self.0.split_whitespace().count()
    }
}

impl std::fmt::Debug for SeedPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SeedPhrase").field(&"[REDACTED]").finish()
    }
}

/// Canonical hex encoding of the 64-byte BIP39 seed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(try_from = "String")]
pub struct Seed(String);

impl Seed {
    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value)
            .map_err(|e| AdsVaultError::Key(format!("Invalid seed encoding: {}", e)))?;
        if bytes.len() != SEED_SIZE {
            return Err(AdsVaultError::Key(format!(
                "Invalid seed size: expected {} bytes, got {}",
                SEED_SIZE,
                bytes.len()
            )));
        }
        Ok(Self(value.to_lowercase()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Decode the seed into raw bytes.
    pub fn to_bytes(&self) -> Result<Zeroizing<[u8; SEED_SIZE]>> {
        let bytes = Zeroizing::new(
            hex::decode(&self.0)
                .map_err(|e| AdsVaultError::Key(format!("Invalid seed encoding: {}", e)))?,
        );
        if bytes.len() != SEED_SIZE {
            return Err(AdsVaultError::Key(format!(
                "Invalid seed size: expected {} bytes, got {}",
                SEED_SIZE,
                bytes.len()
            )));
        }
        let mut out = Zeroizing::new([0u8; SEED_SIZE]);
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

impl TryFrom<String> for Seed {
    type Error = AdsVaultError;

    fn try_from(value: String) -> Result<Self> {
        let value = Zeroizing::new(value);
        Self::from_hex(&value)
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Seed").field(&"[REDACTED]").finish()
    }
}

/// Generate a fresh random 24-word seed phrase.
pub fn generate_seed_phrase() -> Result<SeedPhrase> {
    let mut entropy = [0u8; ENTROPY_SIZE];
    rand::rng().fill_bytes(&mut entropy);

    let result = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map(|m| SeedPhrase(m.to_string()))
        .map_err(|e| AdsVaultError::Key(format!("Mnemonic generation failed: {}", e)));

    entropy.zeroize();
    result
}

/// Convert a seed phrase into its canonical seed.
pub fn seed_phrase_to_hex(phrase: &SeedPhrase) -> Result<Seed> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase.as_str())
        .map_err(|e| AdsVaultError::Key(format!("Invalid seed phrase: {}", e)))?;

    let mut seed = mnemonic.to_seed_normalized("");
    let encoded = hex::encode(seed);
    seed.zeroize();

    Ok(Seed(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP39 test vector (all-zero entropy, 24 words).
    const VECTOR_PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
        abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon \
        abandon abandon abandon abandon art";

    #[test]
    fn test_generated_phrase_has_24_words() {
        let phrase = generate_seed_phrase().unwrap();
        assert_eq!(phrase.word_count(), 24);
        assert!(SeedPhrase::parse(phrase.as_str()).is_ok());
    }

    #[test]
    fn test_generated_phrases_differ() {
        let a = generate_seed_phrase().unwrap();
        let b = generate_seed_phrase().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_normalizes_whitespace_and_case() {
        let messy = format!("  {}  ", VECTOR_PHRASE.to_uppercase().replace(' ', "   "));
        let phrase = SeedPhrase::parse(&messy).unwrap();
        assert_eq!(phrase.as_str(), SeedPhrase::parse(VECTOR_PHRASE).unwrap().as_str());
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let bad = VECTOR_PHRASE.replace(" art", " abandon");
        assert!(SeedPhrase::parse(&bad).is_err());
        assert!(SeedPhrase::parse("not a valid mnemonic").is_err());
    }

    #[test]
    fn test_seed_is_deterministic() {
        let phrase = SeedPhrase::parse(VECTOR_PHRASE).unwrap();
        let seed1 = seed_phrase_to_hex(&phrase).unwrap();
        let seed2 = seed_phrase_to_hex(&phrase).unwrap();

        assert_eq!(seed1, seed2);
        assert_eq!(seed1.as_hex().len(), SEED_SIZE * 2);

        let other = generate_seed_phrase().unwrap();
        assert_ne!(seed1, seed_phrase_to_hex(&other).unwrap());
    }

    #[test]
    fn test_seed_from_hex_rejects_wrong_size() {
        assert!(Seed::from_hex("abcd").is_err());
        assert!(Seed::from_hex("zz").is_err());
    }

    #[test]
    fn test_seed_deserialize_validates() {
        let seed: Seed = serde_json::from_str(&format!("\"{}\"", "AB".repeat(SEED_SIZE))).unwrap();
        assert_eq!(seed.as_hex(), "ab".repeat(SEED_SIZE));
        assert_eq!(serde_json::to_string(&seed).unwrap(), format!("\"{}\"", seed.as_hex()));
        assert_eq!(seed.to_bytes().unwrap()[0], 0xab);

        assert!(serde_json::from_str::<Seed>("\"abcd\"").is_err());
        assert!(serde_json::from_str::<Seed>("\"zz\"").is_err());
    }
}
