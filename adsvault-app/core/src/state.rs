use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};

use crate::bridge::protocol::READY_MESSAGE;
use crate::bridge::{
    port_pair, Port, PrivilegedHandle, PrivilegedService, Relay, RelayState, WindowMessage,
};
use crate::config::VaultConfig;
use crate::error::{AdsVaultError, Result};
use crate::vault::{
    KeyValueStore, SealedVault, SessionEvent, VaultCommand, VaultResult, VaultStore, WriteTicket,
};

/// Owns the vault store and the bridge tasks.
pub struct AppState {
    pub vault: Arc<RwLock<VaultStore>>,
    privileged: PrivilegedHandle,
    /// Page-side listener of the relay
    window: mpsc::Sender<WindowMessage>,
    relay_state: watch::Receiver<RelayState>,
    relay_buffer: usize,
}

impl AppState {
    /// Load the vault and start the privileged task and the relay.
    pub async fn init(config: VaultConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let relay_buffer = config.relay_buffer;
        let vault = VaultStore::open(config, store).await?;

        let (relay_side, privileged_side) = port_pair(relay_buffer);
        let privileged =
            PrivilegedService::spawn(vault.persistence().clone(), vault.crypt(), privileged_side);

        let relay = Relay::new();
        let relay_state = relay.subscribe();
        let (window, window_rx) = mpsc::channel(relay_buffer);
        relay.spawn(relay_side, window_rx);

        Ok(Self {
            vault: Arc::new(RwLock::new(vault)),
            privileged,
            window,
            relay_state,
            relay_buffer,
        })
    }

    pub async fn status(&self) -> SealedVault {
        self.vault.read().await.sealed_view()
    }

    pub fn relay_state(&self) -> RelayState {
        *self.relay_state.borrow()
    }

    /// Apply a command and forward its session event to the privileged task.
    ///
    /// The write lock is held until the session event is queued, so session
    /// changes reach the privileged task in command order. Queueing never
    /// waits on the privileged task.
    pub async fn dispatch(&self, command: VaultCommand) -> VaultResult<Option<WriteTicket>> {
        let mut store = self.vault.write().await;
        let outcome = store.apply(command)?;

        let forwarded = match outcome.session {
            SessionEvent::Start(token) => self.privileged.start_session(token),
            SessionEvent::End => self.privileged.remove_session(),
            SessionEvent::None => Ok(()),
        };
        if let Err(e) = forwarded {
            warn!("Privileged task unavailable: {}", e);
        }

        Ok(outcome.write)
    }

    /// Wipe the vault and wait until the record is gone from storage.
    pub async fn erase(&self) -> Result<()> {
        if let Some(ticket) = self.dispatch(VaultCommand::Erase).await? {
            ticket.wait().await?;
        }
        Ok(())
    }

    /// Post a message to the relay's page-side listener.
    pub async fn post_window_message(&self, message: WindowMessage) -> Result<()> {
        self.window
            .send(message)
            .await
            .map_err(|_| AdsVaultError::ChannelSend)
    }

    /// Run the page side of the handshake and hand back the bridged channel.
    pub async fn connect_page(&self) -> Result<Port> {
        let (mut page, relay_end) = port_pair(self.relay_buffer);
        self.post_window_message(WindowMessage::init(relay_end))
            .await?;

        loop {
            match page.recv().await {
                Some(Value::String(s)) if s == READY_MESSAGE => break,
                Some(other) => debug!("Ignoring message before ready: {}", other),
                None => return Err(AdsVaultError::ChannelReceive),
            }
        }

        let mut state = self.relay_state.clone();
        state
            .wait_for(|s| *s == RelayState::Bridged)
            .await
            .map_err(|_| AdsVaultError::ChannelReceive)?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KdfParams;
    use crate::keys::{generate_seed_phrase, verify};
    use crate::vault::{MemoryStore, VaultError};
    use serde_json::json;
    use std::time::Duration;
    use zeroize::Zeroizing;

    const PASSWORD: &str = "correct horse battery";

    fn pw(value: &str) -> Zeroizing<String> {
        Zeroizing::new(value.to_string())
    }

    async fn app() -> AppState {
        app_with_buffer(VaultConfig::default().relay_buffer).await
    }

    async fn app_with_buffer(relay_buffer: usize) -> AppState {
        let config = VaultConfig {
            kdf: KdfParams::insecure_fast(),
            relay_buffer,
            ..VaultConfig::default()
        };
        AppState::init(config, Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    async fn dispatch_and_wait(app: &AppState, command: VaultCommand) {
        if let Some(ticket) = app.dispatch(command).await.unwrap() {
            ticket.wait().await.unwrap();
        }
    }

    async fn request(page: &mut Port, message: Value) -> Value {
        page.send(message).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), page.recv())
            .await
            .expect("timed out")
            .expect("relay closed")
    }

    #[tokio::test]
    async fn test_sign_through_relay() {
        let app = app().await;
        assert_eq!(app.relay_state(), RelayState::AwaitingInit);

        let phrase = generate_seed_phrase().unwrap();
        dispatch_and_wait(
            &app,
            VaultCommand::Create {
                password: pw(PASSWORD),
                seed_phrase: pw(phrase.as_str()),
            },
        )
        .await;
        let public_key = app.vault.read().await.vault().secrets().unwrap().keys[2]
            .public_key
            .clone();
        dispatch_and_wait(
            &app,
            VaultCommand::AddAccount {
                password: pw(PASSWORD),
                address: "U0001-00000002-ABCD".into(),
                name: "main".into(),
                public_key: public_key.clone(),
            },
        )
        .await;

        let mut page = app.connect_page().await.unwrap();
        assert_eq!(app.relay_state(), RelayState::Bridged);

        let response = request(
            &mut page,
            json!({"type": "sign", "id": "tx-1", "address": "U0001-00000002-ABCD", "data": "0102"}),
        )
        .await;
        assert_eq!(response["id"], "tx-1");
        assert_eq!(response["publicKey"], public_key.as_str());
        assert!(verify(
            &[1, 2],
            response["signature"].as_str().unwrap(),
            &public_key
        ));

        dispatch_and_wait(&app, VaultCommand::Seal).await;
        let response = request(
            &mut page,
            json!({"type": "sign", "id": "tx-2", "address": "U0001-00000002-ABCD", "data": "0102"}),
        )
        .await;
        assert_eq!(response["code"], "NO_SESSION");

        dispatch_and_wait(
            &app,
            VaultCommand::Unseal {
                password: pw(PASSWORD),
            },
        )
        .await;
        let response = request(&mut page, json!({"type": "accounts", "id": "list"})).await;
        assert_eq!(response["accounts"][0]["publicKey"], public_key.as_str());
    }

    #[tokio::test]
    async fn test_dispatch_error_leaves_state() {
        let app = app().await;
        let err = app
            .dispatch(VaultCommand::Unseal {
                password: pw(PASSWORD),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotSetup));
        assert_eq!(app.status().await, SealedVault::default());
    }

    #[tokio::test]
    async fn test_erase_ends_session() {
        let app = app().await;
        let phrase = generate_seed_phrase().unwrap();
        dispatch_and_wait(
            &app,
            VaultCommand::Create {
                password: pw(PASSWORD),
                seed_phrase: pw(phrase.as_str()),
            },
        )
        .await;
        assert!(!app.status().await.empty);

        app.erase().await.unwrap();
        assert_eq!(app.status().await, SealedVault::default());

        let mut page = app.connect_page().await.unwrap();
        let response = request(&mut page, json!({"type": "accounts", "id": "x"})).await;
        assert_eq!(response["code"], "NO_SESSION");
    }

    #[tokio::test]
    async fn test_stalled_page_cannot_block_vault_commands() {
        let app = app_with_buffer(2).await;
        let phrase = generate_seed_phrase().unwrap();
        dispatch_and_wait(
            &app,
            VaultCommand::Create {
                password: pw(PASSWORD),
                seed_phrase: pw(phrase.as_str()),
            },
        )
        .await;

        // The page keeps sending and never reads a reply
        let page = app.connect_page().await.unwrap();
        let _flood = tokio::spawn(async move {
            for n in 0..50 {
                let request = json!({"type": "accounts", "id": n.to_string()});
                if page.send(request).await.is_err() {
                    break;
                }
            }
            page
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        for _ in 0..10 {
            tokio::time::timeout(Duration::from_secs(2), async {
                dispatch_and_wait(&app, VaultCommand::Seal).await;
                dispatch_and_wait(
                    &app,
                    VaultCommand::Unseal {
                        password: pw(PASSWORD),
                    },
                )
                .await;
            })
            .await
            .expect("vault command blocked by the page");
        }
        assert!(!app.status().await.sealed);
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let config = VaultConfig {
            relay_buffer: 0,
            ..VaultConfig::default()
        };
        let result = AppState::init(config, Arc::new(MemoryStore::new())).await;
        assert!(matches!(result, Err(AdsVaultError::Config(_))));
    }
}
