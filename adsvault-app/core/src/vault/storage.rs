//! Durable storage of the sealed vault record.
//!
//! This module provides:
//! - `KeyValueStore`: the storage medium, with a file-backed and an
//!   in-memory implementation
//! - `VaultPersistence`: load plus a background writer task that applies
//!   saves and erases in submission order
//! - `WriteTicket`: completion handle for one queued write

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use super::model::SealedVault;
use crate::error::{AdsVaultError, Result};

/// A durable key/value medium.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// One file per key inside a data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(AdsVaultError::Storage(format!("Invalid storage key: {:?}", key)));
        }
        // ':' is not portable in file names
        Ok(self.dir.join(format!("{}.json", key.replace(':', "_"))))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write atomically (write to temp file, then rename)
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, value).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&path, perms).await?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Volatile store, used by tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

enum WriteJob {
    Save {
        bytes: Vec<u8>,
        done: oneshot::Sender<Result<()>>,
    },
    Erase {
        done: oneshot::Sender<Result<()>>,
    },
}

/// Completion handle for a queued write.
#[derive(Debug)]
#[must_use = "dropping the ticket discards the write result"]
pub struct WriteTicket {
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteTicket {
    /// Wait until the write has reached the storage medium.
    pub async fn wait(self) -> Result<()> {
        self.rx.await.map_err(|_| AdsVaultError::ChannelReceive)?
    }

    /// Run `callback` once the write finishes.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        tokio::spawn(async move {
            callback(self.wait().await);
        });
    }

    fn failed(err: AdsVaultError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }
}

/// Loads and writes the sealed vault record under one namespaced key.
#[derive(Clone)]
pub struct VaultPersistence {
    store: Arc<dyn KeyValueStore>,
    key: String,
    writer: mpsc::UnboundedSender<WriteJob>,
}

impl VaultPersistence {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let (writer, mut jobs) = mpsc::unbounded_channel::<WriteJob>();

        let task_store = store.clone();
        let task_key = key.clone();
        tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                match job {
                    WriteJob::Save { bytes, done } => {
                        let result = task_store.put(&task_key, &bytes).await;
                        match &result {
                            Ok(()) => debug!("Persisted vault record ({} bytes)", bytes.len()),
                            Err(e) => warn!("Failed to persist vault record: {}", e),
                        }
                        let _ = done.send(result);
                    }
                    WriteJob::Erase { done } => {
                        let result = task_store.delete(&task_key).await;
                        match &result {
                            Ok(()) => info!("Erased vault record"),
                            Err(e) => warn!("Failed to erase vault record: {}", e),
                        }
                        let _ = done.send(result);
                    }
                }
            }
            debug!("Vault writer stopped");
        });

        Self { store, key, writer }
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    /// Read the persisted record, if any.
    ///
    /// The returned record is always sealed.
    pub async fn load(&self) -> Result<Option<SealedVault>> {
        let Some(bytes) = self.store.get(&self.key).await? else {
            return Ok(None);
        };

        let mut record: SealedVault = serde_json::from_slice(&bytes).map_err(|e| {
            AdsVaultError::Storage(format!("Failed to parse vault record: {}", e))
        })?;
        record.sealed = true;
        if record.secret.is_none() {
            record.empty = true;
        }
        Ok(Some(record))
    }

    /// Queue a durable write of the record.
    pub fn save(&self, record: &SealedVault) -> WriteTicket {
        let bytes = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(e) => return WriteTicket::failed(e.into()),
        };

        let (done, rx) = oneshot::channel();
        if self.writer.send(WriteJob::Save { bytes, done }).is_err() {
            return WriteTicket::failed(AdsVaultError::ChannelSend);
        }
        WriteTicket { rx }
    }

    /// Queue permanent deletion of the record.
    pub fn erase(&self) -> WriteTicket {
        let (done, rx) = oneshot::channel();
        if self.writer.send(WriteJob::Erase { done }).is_err() {
            return WriteTicket::failed(AdsVaultError::ChannelSend);
        }
        WriteTicket { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::model::SealedSecret;
    use chrono::Utc;

    fn record(tag: &str) -> SealedVault {
        SealedVault {
            empty: false,
            sealed: false,
            secret: Some(SealedSecret {
                version: 1,
                salt: "00".repeat(16),
                verifier: "11".repeat(32),
                nonce: "22".repeat(12),
                ciphertext: tag.to_string(),
                sealed_at: Utc::now(),
            }),
        }
    }

    #[tokio::test]
    async fn test_save_load_erase() {
        let persistence = VaultPersistence::spawn(Arc::new(MemoryStore::new()), "test:vault");
        assert!(persistence.load().await.unwrap().is_none());

        persistence.save(&record("aa")).wait().await.unwrap();
        let loaded = persistence.load().await.unwrap().unwrap();
        assert!(loaded.sealed, "loaded record must be sealed");
        assert_eq!(loaded.secret.unwrap().ciphertext, "aa");

        persistence.erase().wait().await.unwrap();
        assert!(persistence.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writes_apply_in_order() {
        let persistence = VaultPersistence::spawn(Arc::new(MemoryStore::new()), "test:vault");
        let first = persistence.save(&record("01"));
        let second = persistence.save(&record("02"));
        let third = persistence.save(&record("03"));

        second.wait().await.unwrap();
        first.wait().await.unwrap();
        third.wait().await.unwrap();

        let loaded = persistence.load().await.unwrap().unwrap();
        assert_eq!(loaded.secret.unwrap().ciphertext, "03");
    }

    #[tokio::test]
    async fn test_on_complete_callback() {
        let persistence = VaultPersistence::spawn(Arc::new(MemoryStore::new()), "test:vault");
        let (tx, rx) = oneshot::channel();
        persistence.save(&record("cb")).on_complete(move |result| {
            let _ = tx.send(result.is_ok());
        });
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        assert!(store.get("adsvault:vault").await.unwrap().is_none());
        store.put("adsvault:vault", b"{}").await.unwrap();
        assert_eq!(store.get("adsvault:vault").await.unwrap().unwrap(), b"{}");
        assert!(dir.path().join("adsvault_vault.json").exists());

        store.delete("adsvault:vault").await.unwrap();
        store.delete("adsvault:vault").await.unwrap();
        assert!(store.get("adsvault:vault").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.put("../escape", b"x").await.is_err());
        assert!(store.put("", b"x").await.is_err());
    }
}
