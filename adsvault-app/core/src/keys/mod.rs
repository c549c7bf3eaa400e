//! Key derivation engine.
//!
//! Seed phrases, canonical seeds, deterministic Ed25519 keypairs and
//! signing. Everything here is pure apart from the entropy used by
//! [`generate_seed_phrase`].

mod derive;
mod mnemonic;

pub use derive::{
    generate_keys, get_public_key_from_secret, sign, validate_key, verify, Key, KEY_SIZE,
};
pub use mnemonic::{generate_seed_phrase, seed_phrase_to_hex, Seed, SeedPhrase, SEED_SIZE};
