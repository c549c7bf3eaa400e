use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AdsVaultError, Result};

/// Argon2id cost parameters used to derive the vault key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // 64 MB, 3 passes, 4 lanes
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Never use these for a real vault.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub accounts_limit: usize,
    pub init_keys_quantity: usize,
    pub password_min_length: usize,
    /// Prefix for keys written to the storage medium.
    pub namespace: String,
    /// Capacity of each relay channel direction.
    pub relay_buffer: usize,
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            accounts_limit: 5,
            init_keys_quantity: 5,
            password_min_length: 8,
            namespace: "adsvault".to_string(),
            relay_buffer: 32,
            kdf: KdfParams::default(),
        }
    }
}

impl VaultConfig {
    /// Storage key of the sealed vault record.
    pub fn vault_storage_key(&self) -> String {
        format!("{}:vault", self.namespace)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.init_keys_quantity == 0 {
            return Err(AdsVaultError::Config(
                "init_keys_quantity must be at least 1".into(),
            ));
        }
        if self.relay_buffer == 0 {
            return Err(AdsVaultError::Config("relay_buffer must be at least 1".into()));
        }
        if self.namespace.is_empty() || self.namespace.contains(['/', '\\']) {
            return Err(AdsVaultError::Config(format!(
                "Invalid storage namespace: {:?}",
                self.namespace
            )));
        }
        Ok(())
    }
}

/// Load the config file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<VaultConfig> {
    if !path.exists() {
        return Ok(VaultConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: VaultConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &VaultConfig) -> Result<()> {
    config.validate()?;
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
