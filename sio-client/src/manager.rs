//! One Engine.IO connection shared by every namespace socket opened
//! against the same origin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use sio_codec::{EnginePacket, SocketPacket};
use sio_core::error::{SioError, SioResult};
use sio_engine::{Engine, EngineData, EngineOptions};
use sio_util::Backoff;

use crate::events::ManagerEvents;
use crate::socket::{NamespaceSocket, OutgoingPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Init,
    Opening,
    Open,
    Closing,
    Closed,
}

/// Options controlling reconnection policy and the underlying Engine.
#[derive(Clone)]
pub struct ManagerOptions {
    pub engine: EngineOptions,
    pub is_reconnection: bool,
    /// `None` means unbounded attempts.
    pub reconnection_attempts: Option<u32>,
    pub reconnection_delay: Duration,
    pub reconnection_delay_max: Duration,
    pub randomization_factor: f64,
    pub timeout: Duration,
    pub auth: HashMap<String, String>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            is_reconnection: true,
            reconnection_attempts: None,
            reconnection_delay: Duration::from_secs(5),
            reconnection_delay_max: Duration::from_secs(10),
            randomization_factor: 0.5,
            timeout: Duration::from_secs(20),
            auth: HashMap::new(),
        }
    }
}

pub struct SocketManager {
    uri: String,
    options: Mutex<ManagerOptions>,
    state: Mutex<ManagerState>,
    engine: AsyncMutex<Option<Arc<Engine>>>,
    backoff: Mutex<Backoff>,
    sockets: Mutex<HashMap<String, Arc<NamespaceSocket>>>,
    pending_binary_namespace: Mutex<Option<String>>,
    reconnecting: AtomicBool,
    skip_reconnect: AtomicBool,
    events: ManagerEvents,
}

impl SocketManager {
    pub fn new(uri: &str, options: ManagerOptions) -> Arc<Self> {
        let backoff = Backoff::new(
            options.reconnection_delay,
            options.reconnection_delay_max,
            2,
        );
        Arc::new(Self {
            uri: uri.to_string(),
            options: Mutex::new(options),
            state: Mutex::new(ManagerState::Init),
            engine: AsyncMutex::new(None),
            backoff: Mutex::new(backoff),
            sockets: Mutex::new(HashMap::new()),
            pending_binary_namespace: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
            skip_reconnect: AtomicBool::new(false),
            events: ManagerEvents::default(),
        })
    }

    pub fn events(&self) -> &ManagerEvents {
        &self.events
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Mirror a delay-related setter into the underlying Backoff
    ///.
    pub fn set_reconnection_delay(&self, delay: Duration) {
        self.options.lock().unwrap().reconnection_delay = delay;
        self.backoff.lock().unwrap().set_min(delay);
    }

    pub fn set_reconnection_delay_max(&self, delay: Duration) {
        self.options.lock().unwrap().reconnection_delay_max = delay;
        self.backoff.lock().unwrap().set_max(delay);
    }

    pub fn set_randomization_factor(&self, factor: f64) -> SioResult<()> {
        self.options.lock().unwrap().randomization_factor = factor;
        self.backoff.lock().unwrap().set_jitter(factor)
    }

    /// Look up or create the namespace socket for `namespace`,
    /// registering it so inbound packets route to it.
    pub fn socket(self: &Arc<Self>, namespace: &str, auth: serde_json::Value) -> Arc<NamespaceSocket> {
        let mut sockets = self.sockets.lock().unwrap();
        if let Some(existing) = sockets.get(namespace) {
            return existing.clone();
        }
        let socket = NamespaceSocket::new(namespace, auth, Arc::downgrade(self));
        sockets.insert(namespace.to_string(), socket.clone());
        socket
    }

    pub fn has_socket(&self, namespace: &str) -> bool {
        self.sockets.lock().unwrap().contains_key(namespace)
    }

    /// Open the shared Engine connection, guarding against re-entry
    ///. Idempotent once already `Open`.
    pub async fn open(self: &Arc<Self>) -> SioResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            if !matches!(*state, ManagerState::Init | ManagerState::Closed) {
                return Ok(());
            }
            *state = ManagerState::Opening;
        }

        let timeout = self.options.lock().unwrap().timeout;
        if timeout.is_zero() {
            *self.state.lock().unwrap() = ManagerState::Closed;
            self.events.error.emit("error", &["timeout".to_string()]);
            self.maybe_reconnect_on_open().await;
            return Err(SioError::Timeout("open".into()));
        }

        let mut engine_options = self.options.lock().unwrap().engine.clone();
        engine_options.transport.path = "/socket.io/".to_string();
        let engine = Engine::new(&self.uri, engine_options)?;
        *self.engine.lock().await = Some(engine.clone());

        let (tx, rx) = tokio::sync::oneshot::channel::<SioResult<()>>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let tx1 = tx.clone();
        let open_id = engine.events().open.on("open", move |_| {
            if let Some(tx) = tx1.lock().unwrap().take() {
                let _ = tx.send(Ok(()));
            }
        });
        let tx2 = tx.clone();
        let error_id = engine.events().error.on("error", move |errs| {
            if let Some(tx) = tx2.lock().unwrap().take() {
                let reason = errs.first().cloned().unwrap_or_default();
                let _ = tx.send(Err(SioError::Transport(reason)));
            }
        });

        let tx3 = tx.clone();
        let timeout_task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = tx3.lock().unwrap().take() {
                let _ = tx.send(Err(SioError::Timeout("open".into())));
            }
        });

        if let Err(e) = engine.open().await {
            timeout_task.abort();
            engine.events().open.off_listener("open", open_id);
            engine.events().error.off_listener("error", error_id);
            *self.state.lock().unwrap() = ManagerState::Closed;
            self.events.error.emit("error", &[e.to_string()]);
            self.maybe_reconnect_on_open().await;
            return Err(e);
        }

        let result = rx
            .await
            .unwrap_or_else(|_| Err(SioError::Internal("open signal dropped".into())));
        timeout_task.abort();
        engine.events().open.off_listener("open", open_id);
        engine.events().error.off_listener("error", error_id);

        match result {
            Ok(()) => {
                *self.state.lock().unwrap() = ManagerState::Open;
                self.install_engine_subscriptions(&engine);
                self.events.open.emit("open", &[]);
                Ok(())
            }
            Err(e) => {
                let _ = engine.close().await;
                *self.state.lock().unwrap() = ManagerState::Closed;
                self.events.error.emit("error", &[e.to_string()]);
                self.maybe_reconnect_on_open().await;
                Err(e)
            }
        }
    }

    fn install_engine_subscriptions(self: &Arc<Self>, engine: &Arc<Engine>) {
        let me = self.clone();
        engine.events().close.on("close", move |reasons| {
            if let Some(reason) = reasons.first().cloned() {
                let me = me.clone();
                tokio::spawn(async move {
                    me.on_close(&reason).await;
                });
            }
        });

        let me = self.clone();
        engine.events().data.on("data", move |payloads| {
            for data in payloads {
                let me = me.clone();
                let data = data.clone();
                tokio::spawn(async move {
                    if let Err(e) = me.dispatch_engine_data(data).await {
                        warn!("failed to dispatch inbound frame: {e}");
                    }
                });
            }
        });
    }

    async fn dispatch_engine_data(&self, data: EngineData) -> SioResult<()> {
        match data {
            EngineData::Text(text) => {
                let packet = SocketPacket::decode(&text)?;
                let namespace = packet.namespace().to_string();
                let expects_attachments = matches!(
                    &packet,
                    SocketPacket::BinaryEvent { n_attachments, .. }
                    | SocketPacket::BinaryAck { n_attachments, .. }
                        if *n_attachments > 0
                );
                let socket = self.sockets.lock().unwrap().get(&namespace).cloned();
                if let Some(socket) = socket {
                    socket.handle_packet(packet).await?;
                } else {
                    debug!("dropping packet for unknown namespace {namespace}");
                }
                if expects_attachments {
                    *self.pending_binary_namespace.lock().unwrap() = Some(namespace);
                }
            }
            EngineData::Binary(bytes) => {
                let namespace = self.pending_binary_namespace.lock().unwrap().clone();
                let Some(namespace) = namespace else {
                    return Err(SioError::InvalidState(
                        "BinaryData frame with no pending header".into(),
                    ));
                };
                let socket = self.sockets.lock().unwrap().get(&namespace).cloned();
                if let Some(socket) = socket {
                    if socket.handle_binary_attachment(bytes).await? {
                        *self.pending_binary_namespace.lock().unwrap() = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Encode namespace-socket packets onto Engine.IO frames and hand
    /// them to the Engine's outbound buffer.
    pub async fn send(&self, packets: Vec<OutgoingPacket>) -> SioResult<()> {
        let mut frames = Vec::new();
        for packet in packets {
            frames.push(EnginePacket::Message {
                payload: packet.header.encode(),
            });
            for attachment in packet.attachments {
                frames.push(EnginePacket::BinaryData { payload: attachment });
            }
        }
        let engine = self.engine.lock().await.clone();
        let Some(engine) = engine else {
            return Err(SioError::InvalidState("manager is not open".into()));
        };
        engine.send(frames).await
    }

    async fn on_close(self: &Arc<Self>, reason: &str) {
        *self.state.lock().unwrap() = ManagerState::Closed;
        *self.engine.lock().await = None;
        self.backoff.lock().unwrap().reset();
        self.events.close.emit("close", &[reason.to_string()]);

        let is_reconnection = self.options.lock().unwrap().is_reconnection;
        if is_reconnection && !self.skip_reconnect.load(Ordering::SeqCst) {
            self.reconnect();
        }
    }

    async fn maybe_reconnect_on_open(self: &Arc<Self>) {
        let is_reconnection = self.options.lock().unwrap().is_reconnection;
        if is_reconnection && !self.skip_reconnect.load(Ordering::SeqCst) {
            self.reconnect();
        }
    }

    /// Schedule the next reconnect attempt. Spawns its
    /// own task so callers (close handlers, failed opens) don't block
    /// on the backoff sleep.
    fn reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let max_attempts = self.options.lock().unwrap().reconnection_attempts;
        let me = self.clone();
        tokio::spawn(async move {
            loop {
                let attempts = me.backoff.lock().unwrap().attempts();
                if let Some(max) = max_attempts {
                    if attempts >= max {
                        me.backoff.lock().unwrap().reset();
                        me.events.reconnect_failed.emit("reconnect_failed", &[()]);
                        me.reconnecting.store(false, Ordering::SeqCst);
                        return;
                    }
                }

                let delay = me.backoff.lock().unwrap().duration();
                tokio::time::sleep(delay).await;

                if me.skip_reconnect.load(Ordering::SeqCst) {
                    me.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }

                let attempt = me.backoff.lock().unwrap().attempts();
                me.events.reconnect_attempt.emit("reconnect_attempt", &[attempt]);

                match me.open().await {
                    Ok(()) => {
                        me.events.reconnect.emit("reconnect", &[attempt]);
                        me.backoff.lock().unwrap().reset();
                        me.reconnecting.store(false, Ordering::SeqCst);
                        return;
                    }
                    Err(e) => {
                        me.events.reconnect_error.emit("reconnect_error", &[e.to_string()]);
                    }
                }
            }
        });
    }

    /// Tear the Manager down: suppress reconnection, discard the
    /// Engine, and reset the Backoff.
    pub async fn close(&self) {
        self.skip_reconnect.store(true, Ordering::SeqCst);
        self.reconnecting.store(false, Ordering::SeqCst);
        *self.state.lock().unwrap() = ManagerState::Closing;
        self.backoff.lock().unwrap().reset();

        if let Some(engine) = self.engine.lock().await.take() {
            let _ = engine.close().await;
        }
        *self.state.lock().unwrap() = ManagerState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manager_starts_in_init_state() {
        let manager = SocketManager::new("http://example.com", ManagerOptions::default());
        assert_eq!(manager.state(), ManagerState::Init);
        assert!(!manager.is_reconnecting());
    }

    #[test]
    fn socket_registry_returns_same_instance_for_same_namespace() {
        let manager = SocketManager::new("http://example.com", ManagerOptions::default());
        let a = manager.socket("/chat", serde_json::json!({}));
        let b = manager.socket("/chat", serde_json::json!({}));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &manager.socket("/admin", serde_json::json!({}))));
    }

    #[tokio::test]
    async fn open_with_zero_timeout_fails_immediately() {
        let mut options = ManagerOptions::default();
        options.timeout = Duration::from_secs(0);
        let manager = SocketManager::new("http://example.com", options);
        assert!(manager.open().await.is_err());
        assert_eq!(manager.state(), ManagerState::Closed);
    }

    #[tokio::test]
    async fn send_without_an_open_engine_is_rejected() {
        let manager = SocketManager::new("http://example.com", ManagerOptions::default());
        let packet = OutgoingPacket {
            header: SocketPacket::Connect {
                namespace: "/".into(),
                payload: None,
            },
            attachments: Vec::new(),
        };
        assert!(manager.send(vec![packet]).await.is_err());
    }
}
