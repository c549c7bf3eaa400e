//! Privileged vault session.
//!
//! The privileged task holds the only decrypted copy of the vault while a
//! session is open. It answers requests arriving from the relay; secret
//! keys are used here and never cross the port.
//!
//! A session is opened with a [`SessionToken`], the Argon2-derived vault
//! key. The task decrypts the persisted record with it and decrypts again
//! whenever the persisted ciphertext changes.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::protocol::{AccountSummary, ErrorCode, PrivilegedRequest, PrivilegedResponse};
use super::relay::Port;
use crate::error::{AdsVaultError, Result};
use crate::keys::sign;
use crate::vault::{VaultCrypt, VaultKey, VaultPersistence, VaultSecrets};

/// Proof of an unsealed vault, handed to the privileged context.
///
/// Wraps the derived vault key; the password itself is never kept.
pub struct SessionToken(VaultKey);

impl SessionToken {
    pub(crate) fn new(key: VaultKey) -> Self {
        Self(key)
    }

    fn key(&self) -> &VaultKey {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionToken").field(&"[REDACTED]").finish()
    }
}

#[derive(Debug)]
enum SessionControl {
    Start(SessionToken),
    End,
}

/// Control handle of the privileged task.
///
/// Sends never wait on the task, so a stalled page cannot hold up the
/// caller.
#[derive(Clone)]
pub struct PrivilegedHandle {
    control: mpsc::UnboundedSender<SessionControl>,
}

impl PrivilegedHandle {
    pub fn start_session(&self, token: SessionToken) -> Result<()> {
        self.control
            .send(SessionControl::Start(token))
            .map_err(|_| AdsVaultError::ChannelSend)
    }

    pub fn remove_session(&self) -> Result<()> {
        self.control
            .send(SessionControl::End)
            .map_err(|_| AdsVaultError::ChannelSend)
    }
}

struct Session {
    token: SessionToken,
    started_at: DateTime<Utc>,
    /// Ciphertext the cached plaintext was decrypted from.
    ciphertext: Option<String>,
    secrets: Option<VaultSecrets>,
    signed: u64,
}

impl Session {
    fn new(token: SessionToken) -> Self {
        Self {
            token,
            started_at: Utc::now(),
            ciphertext: None,
            secrets: None,
            signed: 0,
        }
    }
}

type Failure = (ErrorCode, String);

pub struct PrivilegedService {
    persistence: VaultPersistence,
    crypt: VaultCrypt,
    session: Option<Session>,
}

impl PrivilegedService {
    /// Spawn the privileged task serving requests from `port`.
    pub fn spawn(persistence: VaultPersistence, crypt: VaultCrypt, port: Port) -> PrivilegedHandle {
        let (control, control_rx) = mpsc::unbounded_channel();
        let service = Self {
            persistence,
            crypt,
            session: None,
        };
        tokio::spawn(service.run(control_rx, port));
        PrivilegedHandle { control }
    }

    async fn run(mut self, mut control: mpsc::UnboundedReceiver<SessionControl>, mut port: Port) {
        let mut control_open = true;

        loop {
            tokio::select! {
                // Session changes go first so requests see the latest state
                biased;

                command = control.recv(), if control_open => {
                    match command {
                        Some(SessionControl::Start(token)) => {
                            info!("Vault session started");
                            self.session = Some(Session::new(token));
                        }
                        Some(SessionControl::End) => self.end_session(),
                        None => {
                            control_open = false;
                            self.end_session();
                        }
                    }
                }

                message = port.recv() => {
                    let Some(message) = message else {
                        info!("Relay disconnected, stopping privileged task");
                        return;
                    };
                    let response = self.handle_message(message).await;
                    let value = match serde_json::to_value(&response) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!("Failed to encode privileged response: {}", e);
                            continue;
                        }
                    };
                    // Never wait on the relay: a page that stops reading
                    // loses its replies instead of stalling session control.
                    match port.try_send(value) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("Relay backed up, dropping privileged response");
                        }
                        Err(TrySendError::Closed(_)) => {
                            info!("Relay disconnected, stopping privileged task");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!(
                "Vault session ended after {} signatures (started {})",
                session.signed, session.started_at
            );
        }
    }

    async fn handle_message(&mut self, message: Value) -> PrivilegedResponse {
        let request: PrivilegedRequest = match serde_json::from_value(message.clone()) {
            Ok(request) => request,
            Err(e) => {
                let id = message.get("id").and_then(Value::as_str);
                return PrivilegedResponse::error(id, ErrorCode::BadRequest, e.to_string());
            }
        };

        debug!("Privileged request {}", request.id());
        match request {
            PrivilegedRequest::Sign { id, address, data } => {
                match self.sign(&address, &data).await {
                    Ok((address, public_key, signature)) => PrivilegedResponse::Signature {
                        id,
                        address,
                        public_key,
                        signature,
                    },
                    Err((code, message)) => {
                        PrivilegedResponse::error(Some(id.as_str()), code, message)
                    }
                }
            }
            PrivilegedRequest::Accounts { id } => match self.unlocked_secrets().await {
                Ok(secrets) => PrivilegedResponse::Accounts {
                    id,
                    accounts: secrets
                        .accounts
                        .iter()
                        .map(|a| AccountSummary {
                            address: a.address.clone(),
                            name: a.name.clone(),
                            public_key: a.public_key.clone(),
                        })
                        .collect(),
                },
                Err((code, message)) => {
                    PrivilegedResponse::error(Some(id.as_str()), code, message)
                }
            },
        }
    }

    async fn sign(
        &mut self,
        address: &str,
        data: &str,
    ) -> std::result::Result<(String, String, String), Failure> {
        let bytes = hex::decode(data)
            .map_err(|e| (ErrorCode::BadRequest, format!("Data must be hex encoded: {}", e)))?;

        let address = address.to_uppercase();
        let secrets = self.unlocked_secrets().await?;
        let account = secrets
            .find_account(&address)
            .ok_or_else(|| (ErrorCode::UnknownAccount, format!("Cannot find account {}", address)))?;

        let signature = sign(&bytes, &account.secret_key)
            .map_err(|e| (ErrorCode::VaultError, e.to_string()))?;
        let result = (account.address.clone(), account.public_key.clone(), signature);

        if let Some(session) = self.session.as_mut() {
            session.signed += 1;
        }
        debug!("Signed {} bytes for {}", bytes.len(), address);
        Ok(result)
    }

    /// Decrypted vault of the open session, refreshed from storage.
    async fn unlocked_secrets(&mut self) -> std::result::Result<&VaultSecrets, Failure> {
        let Some(session) = self.session.as_mut() else {
            return Err((ErrorCode::NoSession, "Vault is sealed".into()));
        };

        let record = self
            .persistence
            .load()
            .await
            .map_err(|e| (ErrorCode::VaultError, e.to_string()))?;
        let Some(secret) = record.and_then(|r| r.secret) else {
            return Err((ErrorCode::NoSession, "Vault is not set up".into()));
        };

        if session.ciphertext.as_deref() != Some(secret.ciphertext.as_str()) {
            let secrets = self
                .crypt
                .decrypt_with_key(&secret, session.token.key())
                .map_err(|e| (ErrorCode::VaultError, e.to_string()))?;
            debug!("Session refreshed from persisted vault");
            session.secrets = Some(secrets);
            session.ciphertext = Some(secret.ciphertext);
        }

        session
            .secrets
            .as_ref()
            .ok_or_else(|| (ErrorCode::NoSession, "Vault is sealed".into()))
    }
}
