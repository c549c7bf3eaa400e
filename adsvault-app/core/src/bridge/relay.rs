//! Message relay between the untrusted page and the privileged context.
//!
//! The relay sits in between and only moves opaque JSON values. It never
//! looks inside a payload.
//!
//! Lifecycle:
//! - `Uninitialized`: created, nothing connected
//! - `AwaitingInit`: connected to the privileged context, waiting for the
//!   page to post `"init"` together with a dedicated [`Port`]
//! - `Bridged`: `"ready"` was sent on the port; traffic flows both ways
//! - `Disconnected`: the privileged context went away (terminal)

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{INIT_MESSAGE, READY_MESSAGE};
use crate::error::{AdsVaultError, Result};

/// One end of a bidirectional, order-preserving channel.
#[derive(Debug)]
pub struct Port {
    tx: mpsc::Sender<Value>,
    rx: mpsc::Receiver<Value>,
}

/// Create two connected ports with `capacity` buffered messages per direction.
pub fn port_pair(capacity: usize) -> (Port, Port) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (
        Port { tx: a_tx, rx: a_rx },
        Port { tx: b_tx, rx: b_rx },
    )
}

impl Port {
    pub async fn send(&self, message: Value) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| AdsVaultError::ChannelSend)
    }

    /// Send without waiting for buffer space.
    pub fn try_send(&self, message: Value) -> std::result::Result<(), TrySendError<Value>> {
        self.tx.try_send(message)
    }

    /// `None` once the other end is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

/// A message posted to the page-side listener.
#[derive(Debug)]
pub struct WindowMessage {
    pub data: Value,
    pub port: Option<Port>,
}

impl WindowMessage {
    pub fn new(data: Value) -> Self {
        Self { data, port: None }
    }

    /// The `"init"` handshake carrying the page's end of a channel.
    pub fn init(port: Port) -> Self {
        Self {
            data: Value::String(INIT_MESSAGE.to_string()),
            port: Some(port),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayState {
    Uninitialized,
    AwaitingInit,
    Bridged,
    Disconnected,
}

pub struct Relay {
    state: watch::Sender<RelayState>,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RelayState::Uninitialized);
        Self { state }
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Connect to the privileged context and start listening for the page.
    pub fn spawn(self, privileged: Port, window: mpsc::Receiver<WindowMessage>) -> JoinHandle<()> {
        self.state.send_replace(RelayState::AwaitingInit);
        info!("Relay connected to privileged context, awaiting init");

        let task = RelayTask {
            state: self.state,
            privileged,
            window,
            window_open: true,
            page: None,
        };
        tokio::spawn(task.run())
    }
}

struct RelayTask {
    state: watch::Sender<RelayState>,
    privileged: Port,
    window: mpsc::Receiver<WindowMessage>,
    window_open: bool,
    page: Option<Port>,
}

impl RelayTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                message = self.window.recv(), if self.window_open => {
                    match message {
                        Some(message) => self.handle_window_message(message).await,
                        None => {
                            debug!("Window listener closed");
                            self.window_open = false;
                        }
                    }
                }

                message = self.privileged.recv() => {
                    match message {
                        Some(message) => self.forward_to_page(message).await,
                        None => {
                            info!("Privileged context disconnected, stopping relay");
                            self.state.send_replace(RelayState::Disconnected);
                            return;
                        }
                    }
                }

                message = recv_from(&mut self.page) => {
                    match message {
                        Some(message) => {
                            debug!("Relaying page message to privileged context");
                            if self.privileged.send(message).await.is_err() {
                                info!("Privileged context disconnected, stopping relay");
                                self.state.send_replace(RelayState::Disconnected);
                                return;
                            }
                        }
                        None => self.detach_page(),
                    }
                }
            }
        }
    }

    async fn handle_window_message(&mut self, message: WindowMessage) {
        let is_init = message.data.as_str() == Some(INIT_MESSAGE);
        match (is_init, message.port) {
            (true, Some(port)) => {
                if self.page.is_some() {
                    info!("Re-init received, replacing page channel");
                }
                if port
                    .send(Value::String(READY_MESSAGE.to_string()))
                    .await
                    .is_err()
                {
                    warn!("Page channel closed before handshake completed");
                    return;
                }
                self.page = Some(port);
                self.state.send_replace(RelayState::Bridged);
                info!("Relay bridged");
            }
            (true, None) => warn!("Dropping init message without a channel"),
            (false, _) => debug!("Dropping window message outside the handshake"),
        }
    }

    async fn forward_to_page(&mut self, message: Value) {
        let Some(page) = &self.page else {
            warn!("Dropping privileged message, relay is not bridged");
            return;
        };
        debug!("Relaying privileged message to page");
        if page.send(message).await.is_err() {
            self.detach_page();
        }
    }

    fn detach_page(&mut self) {
        self.page = None;
        if *self.state.borrow() != RelayState::AwaitingInit {
            info!("Page channel closed, awaiting init");
            self.state.send_replace(RelayState::AwaitingInit);
        }
    }
}

async fn recv_from(port: &mut Option<Port>) -> Option<Value> {
    match port {
        Some(port) => port.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        privileged: Port,
        window: mpsc::Sender<WindowMessage>,
        state: watch::Receiver<RelayState>,
        task: JoinHandle<()>,
    }

    fn start() -> Harness {
        let relay = Relay::new();
        assert_eq!(relay.state(), RelayState::Uninitialized);
        let state = relay.subscribe();

        let (privileged, relay_side) = port_pair(8);
        let (window, window_rx) = mpsc::channel(8);
        let task = relay.spawn(relay_side, window_rx);
        Harness {
            privileged,
            window,
            state,
            task,
        }
    }

    async fn handshake(harness: &Harness) -> Port {
        let (mut page, relay_end) = port_pair(8);
        harness.window.send(WindowMessage::init(relay_end)).await.unwrap();
        assert_eq!(recv(&mut page).await, json!("ready"));
        page
    }

    async fn recv(port: &mut Port) -> Value {
        timeout(Duration::from_secs(2), port.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    async fn wait_for(state: &mut watch::Receiver<RelayState>, wanted: RelayState) {
        timeout(Duration::from_secs(2), state.wait_for(|s| *s == wanted))
            .await
            .expect("timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn test_init_ready_handshake() {
        let mut harness = start();
        assert_eq!(*harness.state.borrow(), RelayState::AwaitingInit);

        let _page = handshake(&harness).await;
        wait_for(&mut harness.state, RelayState::Bridged).await;
    }

    #[tokio::test]
    async fn test_messages_before_init_are_dropped() {
        let mut harness = start();
        harness
            .window
            .send(WindowMessage::new(json!({"type": "sign"})))
            .await
            .unwrap();

        let (_, unused) = port_pair(1);
        harness
            .window
            .send(WindowMessage {
                data: json!("hello"),
                port: Some(unused),
            })
            .await
            .unwrap();

        let mut page = handshake(&harness).await;
        page.send(json!({"n": 1})).await.unwrap();
        assert_eq!(recv(&mut harness.privileged).await, json!({"n": 1}));

        // Nothing before the handshake reached the privileged side
        assert!(harness.privileged.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forwarding_is_fifo_both_ways() {
        let mut harness = start();
        let mut page = handshake(&harness).await;

        for n in 0..5 {
            page.send(json!(n)).await.unwrap();
        }
        for n in 0..5 {
            assert_eq!(recv(&mut harness.privileged).await, json!(n));
        }

        for n in 0..5 {
            harness.privileged.send(json!({"reply": n})).await.unwrap();
        }
        for n in 0..5 {
            assert_eq!(recv(&mut page).await, json!({"reply": n}));
        }
    }

    #[tokio::test]
    async fn test_re_init_replaces_channel() {
        let mut harness = start();
        let mut first = handshake(&harness).await;
        let mut second = handshake(&harness).await;

        harness.privileged.send(json!("to page")).await.unwrap();
        assert_eq!(recv(&mut second).await, json!("to page"));
        assert!(first.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_page_close_returns_to_awaiting_init() {
        let mut harness = start();
        let page = handshake(&harness).await;
        wait_for(&mut harness.state, RelayState::Bridged).await;

        drop(page);
        wait_for(&mut harness.state, RelayState::AwaitingInit).await;

        let _page = handshake(&harness).await;
        wait_for(&mut harness.state, RelayState::Bridged).await;
    }

    #[tokio::test]
    async fn test_privileged_disconnect_is_terminal() {
        let mut harness = start();
        let mut page = handshake(&harness).await;

        drop(harness.privileged);
        wait_for(&mut harness.state, RelayState::Disconnected).await;
        timeout(Duration::from_secs(2), harness.task)
            .await
            .expect("relay did not stop")
            .unwrap();

        // The relay dropped its end of the page channel
        assert!(timeout(Duration::from_secs(2), page.recv())
            .await
            .unwrap()
            .is_none());
    }
}
