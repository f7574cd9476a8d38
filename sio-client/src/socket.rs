//! A single namespace's view of the shared Engine.IO connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use sio_codec::{PayloadElement, SocketPacket};
use sio_core::error::{SioError, SioResult};
use sio_util::Emitter;

use crate::ack::{AckFn, AckWithTimeout};
use crate::binary::{BinaryReconstructor, DataElement};
use crate::events::{is_reserved, SocketEvents};
use crate::manager::SocketManager;

/// A Socket.IO frame paired with the raw attachment bytes it
/// references, ready to hand to [`SocketManager::send`].
pub struct OutgoingPacket {
    pub header: SocketPacket,
    pub attachments: Vec<Vec<u8>>,
}

fn header_ack_id(p: &SocketPacket) -> Option<u64> {
    match p {
        SocketPacket::Event { ack_id, .. }
        | SocketPacket::BinaryEvent { ack_id, .. }
        | SocketPacket::BinaryAck { ack_id, .. } => *ack_id,
        SocketPacket::Ack { ack_id, .. } => Some(*ack_id),
        _ => None,
    }
}

enum PendingAck {
    Plain(AckFn),
    WithTimeout(Arc<AckWithTimeout>),
}

/// The callback a server-initiated event carries when it expects a
/// reply. Idempotent: only the first `send` call is delivered.
#[derive(Clone)]
pub struct AckResponder {
    socket: Weak<NamespaceSocket>,
    ack_id: u64,
    sent: Arc<AtomicBool>,
}

impl AckResponder {
    pub fn send(&self, args: Vec<DataElement>) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(socket) = self.socket.upgrade() else {
            return;
        };
        let ack_id = self.ack_id;
        tokio::spawn(async move {
            let packet = socket.build_ack_packet(ack_id, args);
            if let Err(e) = socket.send_to_manager(packet).await {
                warn!("failed to send ack reply: {e}");
            }
        });
    }
}

/// A dispatched inbound application event, handed to listeners
/// registered on [`NamespaceSocket::events`]`.event`.
#[derive(Clone)]
pub struct IncomingEvent {
    pub name: String,
    pub args: Vec<DataElement>,
    pub ack: Option<AckResponder>,
}

fn data_element_to_json(e: &DataElement) -> JsonValue {
    match e {
        DataElement::Json(v) => v.clone(),
        DataElement::Bytes(b) => JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect()),
    }
}

fn parse_event_payload(payload: &JsonValue) -> Option<(String, Vec<DataElement>)> {
    let arr = payload.as_array()?;
    let name = arr.first()?.as_str()?.to_string();
    let args = arr[1..].iter().map(|v| DataElement::Json(v.clone())).collect();
    Some((name, args))
}

/// One namespace (e.g. `/` or `/admin`) multiplexed over a Manager's
/// shared Engine.IO connection.
pub struct NamespaceSocket {
    namespace: String,
    manager: Weak<SocketManager>,
    auth: JsonValue,
    connected: AtomicBool,
    sid: Mutex<Option<String>>,
    send_buffer: Mutex<Vec<OutgoingPacket>>,
    recv_buffer: Mutex<Vec<IncomingEvent>>,
    ack_table: Mutex<HashMap<u64, PendingAck>>,
    next_ack_id: AtomicU64,
    reconstructor: Mutex<Option<BinaryReconstructor>>,
    subscriptions: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    events: SocketEvents,
}

impl NamespaceSocket {
    pub fn new(namespace: &str, auth: JsonValue, manager: Weak<SocketManager>) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.to_string(),
            manager,
            auth,
            connected: AtomicBool::new(false),
            sid: Mutex::new(None),
            send_buffer: Mutex::new(Vec::new()),
            recv_buffer: Mutex::new(Vec::new()),
            ack_table: Mutex::new(HashMap::new()),
            next_ack_id: AtomicU64::new(1),
            reconstructor: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            events: SocketEvents::default(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn events(&self) -> &SocketEvents {
        &self.events
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn sid(&self) -> Option<String> {
        self.sid.lock().unwrap().clone()
    }

    async fn send_to_manager(&self, packet: OutgoingPacket) -> SioResult<()> {
        let Some(manager) = self.manager.upgrade() else {
            return Err(SioError::InvalidState("manager has been dropped".into()));
        };
        manager.send(vec![packet]).await
    }

    /// Join the namespace: subscribe to the Manager and ask it to open
    /// the shared connection, running `on_open` immediately if it is
    /// already open.
    pub async fn open(self: &Arc<Self>) -> SioResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(manager) = self.manager.upgrade() else {
            return Err(SioError::InvalidState("manager has been dropped".into()));
        };
        if manager.is_reconnecting() {
            return Ok(());
        }

        self.install_manager_subscriptions(&manager);
        let already_open = manager.state() == crate::manager::ManagerState::Open;
        manager.open().await?;
        if already_open || manager.state() == crate::manager::ManagerState::Open {
            self.on_open().await?;
        }
        Ok(())
    }

    fn install_manager_subscriptions(self: &Arc<Self>, manager: &Arc<SocketManager>) {
        let me = self.clone();
        let open_emitter = manager.events().open.clone();
        let open_id = open_emitter.on("open", move |_| {
            let me = me.clone();
            tokio::spawn(async move {
                if let Err(e) = me.on_open().await {
                    warn!("namespace connect failed: {e}");
                }
            });
        });
        self.subscriptions
            .lock()
            .unwrap()
            .push(Box::new(move || open_emitter.off_listener("open", open_id)));

        let me = self.clone();
        let close_emitter = manager.events().close.clone();
        let close_id = close_emitter.on("close", move |reasons| {
            if let Some(reason) = reasons.first().cloned() {
                let me = me.clone();
                tokio::spawn(async move {
                    me.on_close(&reason).await;
                });
            }
        });
        self.subscriptions
            .lock()
            .unwrap()
            .push(Box::new(move || close_emitter.off_listener("close", close_id)));
    }

    async fn on_open(self: &Arc<Self>) -> SioResult<()> {
        let payload = self
            .auth
            .as_object()
            .filter(|o| !o.is_empty())
            .map(|_| self.auth.clone());
        let packet = OutgoingPacket {
            header: SocketPacket::Connect {
                namespace: self.namespace.clone(),
                payload,
            },
            attachments: Vec::new(),
        };
        self.send_to_manager(packet).await
    }

    /// Dispatch an inbound Socket.IO packet already routed to this
    /// namespace by the Manager.
    pub async fn handle_packet(self: &Arc<Self>, packet: SocketPacket) -> SioResult<()> {
        match packet {
            SocketPacket::Connect { payload, .. } => self.handle_connect(payload).await,
            SocketPacket::Disconnect { .. } => {
                self.destroy();
                self.on_close("io server disconnect").await;
                Ok(())
            }
            SocketPacket::ConnectError { error_data, .. } => {
                self.destroy();
                self.events
                    .connect_error
                    .emit("connect_error", &[error_data.unwrap_or(JsonValue::Null)]);
                Ok(())
            }
            SocketPacket::Event { ack_id, payload, .. } => self.on_event(ack_id, payload).await,
            SocketPacket::Ack { ack_id, payload, .. } => {
                let args = payload.as_array().cloned().unwrap_or_default();
                self.resolve_ack(ack_id, args);
                Ok(())
            }
            SocketPacket::BinaryEvent {
                ack_id,
                payload,
                n_attachments,
                ..
            } => self.start_reconstruction(false, ack_id, payload, n_attachments),
            SocketPacket::BinaryAck {
                ack_id,
                payload,
                n_attachments,
                ..
            } => self.start_reconstruction(true, ack_id, payload, n_attachments),
        }
    }

    async fn handle_connect(self: &Arc<Self>, payload: Option<JsonValue>) -> SioResult<()> {
        let sid = payload
            .as_ref()
            .and_then(|p| p.get("sid"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let Some(sid) = sid else { return Ok(()) };

        *self.sid.lock().unwrap() = Some(sid);
        self.connected.store(true, Ordering::SeqCst);

        let buffered = std::mem::take(&mut *self.recv_buffer.lock().unwrap());
        for incoming in buffered {
            let name = incoming.name.clone();
            self.events.event.emit(&name, &[incoming]);
        }

        let queued = std::mem::take(&mut *self.send_buffer.lock().unwrap());
        if !queued.is_empty() {
            if let Some(manager) = self.manager.upgrade() {
                manager.send(queued).await?;
            }
        }

        self.events.connect.emit("connect", &[]);
        Ok(())
    }

    async fn on_event(self: &Arc<Self>, ack_id: Option<u64>, payload: JsonValue) -> SioResult<()> {
        let Some((name, args)) = parse_event_payload(&payload) else {
            return Ok(());
        };
        self.dispatch_event(name, args, ack_id);
        Ok(())
    }

    fn dispatch_event(self: &Arc<Self>, name: String, args: Vec<DataElement>, ack_id: Option<u64>) {
        let ack = ack_id.map(|id| AckResponder {
            socket: Arc::downgrade(self),
            ack_id: id,
            sent: Arc::new(AtomicBool::new(false)),
        });
        let incoming = IncomingEvent { name: name.clone(), args, ack };
        if self.connected.load(Ordering::SeqCst) {
            self.events.event.emit(&name, &[incoming]);
        } else {
            self.recv_buffer.lock().unwrap().push(incoming);
        }
    }

    fn resolve_ack(&self, ack_id: u64, args: Vec<JsonValue>) {
        let entry = self.ack_table.lock().unwrap().remove(&ack_id);
        match entry {
            Some(PendingAck::Plain(f)) => f(args),
            Some(PendingAck::WithTimeout(timer)) => timer.call(args),
            None => debug!("ack for unknown id {ack_id} dropped"),
        }
    }

    fn start_reconstruction(
        &self,
        is_ack: bool,
        ack_id: Option<u64>,
        payload: Vec<PayloadElement>,
        n_attachments: usize,
    ) -> SioResult<()> {
        let mut guard = self.reconstructor.lock().unwrap();
        if guard.is_some() {
            return Err(SioError::InvalidState(
                "a binary packet is already being reconstructed".into(),
            ));
        }
        let header = if is_ack {
            SocketPacket::BinaryAck {
                namespace: self.namespace.clone(),
                ack_id,
                payload,
                n_attachments,
            }
        } else {
            SocketPacket::BinaryEvent {
                namespace: self.namespace.clone(),
                ack_id,
                payload,
                n_attachments,
            }
        };
        *guard = Some(BinaryReconstructor::new(&header)?);
        Ok(())
    }

    /// Feed one `BinaryData` attachment frame to the in-progress
    /// reconstructor. Returns whether the message is now complete.
    pub async fn handle_binary_attachment(self: &Arc<Self>, bytes: Vec<u8>) -> SioResult<bool> {
        let completed = {
            let mut guard = self.reconstructor.lock().unwrap();
            let Some(r) = guard.as_mut() else {
                return Err(SioError::InvalidState(
                    "BinaryData frame with no active reconstructor".into(),
                ));
            };
            let result = r.add(bytes)?;
            if result.is_some() {
                *guard = None;
            }
            result
        };

        let Some(msg) = completed else {
            return Ok(false);
        };

        if msg.is_ack {
            if let Some(id) = msg.ack_id {
                let args = msg.elements.iter().map(data_element_to_json).collect();
                self.resolve_ack(id, args);
            }
        } else if let Some((name, tail)) = msg.elements.split_first() {
            if let DataElement::Json(JsonValue::String(name)) = name {
                self.dispatch_event(name.clone(), tail.to_vec(), msg.ack_id);
            }
        }
        Ok(true)
    }

    fn build_ack_packet(&self, ack_id: u64, args: Vec<DataElement>) -> OutgoingPacket {
        let any_binary = args.iter().any(|a| matches!(a, DataElement::Bytes(_)));
        if any_binary {
            let mut payload = Vec::with_capacity(args.len());
            let mut attachments = Vec::new();
            for a in args {
                match a {
                    DataElement::Json(v) => payload.push(PayloadElement::Json(v)),
                    DataElement::Bytes(b) => {
                        payload.push(PayloadElement::AttachmentRef(attachments.len()));
                        attachments.push(b);
                    }
                }
            }
            let n_attachments = attachments.len();
            OutgoingPacket {
                header: SocketPacket::BinaryAck {
                    namespace: self.namespace.clone(),
                    ack_id: Some(ack_id),
                    payload,
                    n_attachments,
                },
                attachments,
            }
        } else {
            let arr = args.into_iter().map(|a| data_element_to_json(&a)).collect();
            OutgoingPacket {
                header: SocketPacket::Ack {
                    namespace: self.namespace.clone(),
                    ack_id,
                    payload: JsonValue::Array(arr),
                },
                attachments: Vec::new(),
            }
        }
    }

    fn build_outgoing(&self, event: &str, args: Vec<DataElement>, ack_id: Option<u64>) -> OutgoingPacket {
        let any_binary = args.iter().any(|a| matches!(a, DataElement::Bytes(_)));
        if any_binary {
            let mut payload = vec![PayloadElement::Json(JsonValue::String(event.to_string()))];
            let mut attachments = Vec::new();
            for a in args {
                match a {
                    DataElement::Json(v) => payload.push(PayloadElement::Json(v)),
                    DataElement::Bytes(b) => {
                        payload.push(PayloadElement::AttachmentRef(attachments.len()));
                        attachments.push(b);
                    }
                }
            }
            let n_attachments = attachments.len();
            OutgoingPacket {
                header: SocketPacket::BinaryEvent {
                    namespace: self.namespace.clone(),
                    ack_id,
                    payload,
                    n_attachments,
                },
                attachments,
            }
        } else {
            let mut arr = vec![JsonValue::String(event.to_string())];
            arr.extend(args.into_iter().map(|a| data_element_to_json(&a)));
            OutgoingPacket {
                header: SocketPacket::Event {
                    namespace: self.namespace.clone(),
                    ack_id,
                    payload: JsonValue::Array(arr),
                },
                attachments: Vec::new(),
            }
        }
    }

    fn emit_inner(self: &Arc<Self>, event: &str, args: Vec<DataElement>, ack: Option<PendingAck>) {
        if is_reserved(event) {
            self.events
                .error
                .emit("error", &[format!("\"{event}\" is a reserved event name")]);
            return;
        }

        let ack_id = ack.map(|entry| {
            let id = self.next_ack_id.fetch_add(1, Ordering::SeqCst);
            if let PendingAck::WithTimeout(timer) = &entry {
                let me = self.clone();
                timer.schedule(move || {
                    me.ack_table.lock().unwrap().remove(&id);
                    me.send_buffer
                        .lock()
                        .unwrap()
                        .retain(|p| header_ack_id(&p.header) != Some(id));
                });
            }
            self.ack_table.lock().unwrap().insert(id, entry);
            id
        });

        let packet = self.build_outgoing(event, args, ack_id);
        if self.connected.load(Ordering::SeqCst) {
            let me = self.clone();
            tokio::spawn(async move {
                if let Err(e) = me.send_to_manager(packet).await {
                    warn!("emit failed: {e}");
                }
            });
        } else {
            self.send_buffer.lock().unwrap().push(packet);
        }
    }

    /// Emit an event with no acknowledgement.
    pub fn emit(self: &Arc<Self>, event: &str, args: Vec<DataElement>) {
        self.emit_inner(event, args, None);
    }

    /// Emit an event and invoke `on_ack` with the server's reply
    /// whenever it arrives, with no timeout.
    pub fn emit_with_ack<F>(self: &Arc<Self>, event: &str, args: Vec<DataElement>, on_ack: F)
    where
        F: FnOnce(Vec<JsonValue>) + Send + 'static,
    {
        self.emit_inner(event, args, Some(PendingAck::Plain(Box::new(on_ack))));
    }

    /// Emit an event with an acknowledgement that must arrive within
    /// `timeout`, or `on_timeout` fires instead.
    pub fn emit_with_ack_timeout<S, T>(
        self: &Arc<Self>,
        event: &str,
        args: Vec<DataElement>,
        timeout: std::time::Duration,
        on_success: S,
        on_timeout: T,
    ) where
        S: FnOnce(Vec<JsonValue>) + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        let timer = Arc::new(AckWithTimeout::new(timeout, on_success, on_timeout));
        self.emit_inner(event, args, Some(PendingAck::WithTimeout(timer)));
    }

    fn destroy(&self) {
        let subs = std::mem::take(&mut *self.subscriptions.lock().unwrap());
        for cleanup in subs {
            cleanup();
        }
    }

    /// Leave the namespace: if connected, tell the server, then tear
    /// down local state.
    pub async fn close(self: &Arc<Self>) -> SioResult<()> {
        let was_connected = self.connected.load(Ordering::SeqCst);
        if was_connected {
            let packet = OutgoingPacket {
                header: SocketPacket::Disconnect {
                    namespace: self.namespace.clone(),
                },
                attachments: Vec::new(),
            };
            let _ = self.send_to_manager(packet).await;
        }
        self.destroy();
        if was_connected {
            self.on_close("io client disconnect").await;
        }
        Ok(())
    }

    async fn on_close(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        *self.sid.lock().unwrap() = None;
        self.events.disconnect.emit("disconnect", &[reason.to_string()]);

        let pending: Vec<PendingAck> = self.ack_table.lock().unwrap().drain().map(|(_, v)| v).collect();
        for entry in pending {
            if let PendingAck::WithTimeout(timer) = entry {
                timer.force_timeout();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerOptions;

    fn test_socket() -> Arc<NamespaceSocket> {
        NamespaceSocket::new("/", JsonValue::Object(Default::default()), Weak::new())
    }

    #[test]
    fn emit_of_reserved_name_is_rejected_locally() {
        let socket = test_socket();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        socket.events().error.on("error", move |msgs| {
            e.lock().unwrap().extend(msgs.iter().cloned());
        });
        socket.emit("connect", vec![DataElement::Json(serde_json::json!("x"))]);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(socket.send_buffer.lock().unwrap().is_empty());
    }

    #[test]
    fn emit_before_connect_buffers_the_packet() {
        let socket = test_socket();
        socket.emit("chat message", vec![DataElement::Json(serde_json::json!("hi"))]);
        assert_eq!(socket.send_buffer.lock().unwrap().len(), 1);
    }

    #[test]
    fn build_outgoing_splits_binary_attachments() {
        let socket = test_socket();
        let packet = socket.build_outgoing(
            "upload",
            vec![
                DataElement::Json(serde_json::json!("meta")),
                DataElement::Bytes(vec![1, 2, 3]),
            ],
            None,
        );
        match packet.header {
            SocketPacket::BinaryEvent { n_attachments, .. } => assert_eq!(n_attachments, 1),
            _ => panic!("expected a BinaryEvent header"),
        }
        assert_eq!(packet.attachments, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn start_reconstruction_rejects_overlap() {
        let socket = test_socket();
        let header_payload = vec![PayloadElement::AttachmentRef(0)];
        socket
            .start_reconstruction(false, None, header_payload.clone(), 1)
            .unwrap();
        assert!(socket
            .start_reconstruction(false, None, header_payload, 1)
            .is_err());
    }

    #[tokio::test]
    async fn handle_binary_attachment_without_header_is_an_error() {
        let socket = test_socket();
        assert!(socket.handle_binary_attachment(vec![1]).await.is_err());
    }

    #[test]
    fn manager_options_default_matches_spec_defaults() {
        let opts = ManagerOptions::default();
        assert!(opts.is_reconnection);
        assert_eq!(opts.reconnection_attempts, None);
    }
}
