//! WebSocket transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use sio_codec::engine::EnginePacket;
use sio_core::error::{SioError, SioResult};

use crate::events::TransportEvents;
use crate::options::TransportOptions;
use crate::state::TransportState;
use crate::transport::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// WebSocket Engine.IO transport: one frame per Engine.IO packet, text
/// for textual packets and binary for `BinaryData`.
pub struct WebSocket {
    options: Mutex<TransportOptions>,
    state: Mutex<TransportState>,
    writable: AtomicBool,
    events: TransportEvents,
    stream: AsyncMutex<Option<WsStream>>,
}

impl WebSocket {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options: Mutex::new(options),
            state: Mutex::new(TransportState::Init),
            writable: AtomicBool::new(true),
            events: TransportEvents::new(),
            stream: AsyncMutex::new(None),
        }
    }

    fn set_state(&self, s: TransportState) {
        *self.state.lock().unwrap() = s;
    }

    fn ws_uri(&self) -> String {
        self.options
            .lock()
            .unwrap()
            .uri("wss", "ws", now_ms())
    }

    pub fn set_sid(&self, sid: &str) {
        self.options.lock().unwrap().set_query_param("sid", sid);
    }

    /// Drive the receive loop until the connection closes; must be
    /// spawned as a background task by the owning Engine.
    pub async fn run_receive_loop(&self) {
        loop {
            let next = {
                let mut guard = self.stream.lock().await;
                match guard.as_mut() {
                    Some(s) => s.next().await,
                    None => return,
                }
            };

            match next {
                Some(Ok(WsMessage::Text(text))) => match EnginePacket::decode_text(&text) {
                    Ok(packet) => self.events.packet.emit("packet", &[packet]),
                    Err(e) => self.events.error.emit("error", &[e.to_string()]),
                },
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let packet = EnginePacket::decode_binary(&bytes);
                    self.events.packet.emit("packet", &[packet]);
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.set_state(TransportState::Closed);
                    self.events.close.emit("close", &["transport close".to_string()]);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.events.error.emit("error", &[e.to_string()]);
                    self.set_state(TransportState::Closed);
                    self.events.close.emit("close", &["transport error".to_string()]);
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocket {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    fn writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }

    async fn open(&self) -> SioResult<()> {
        self.set_state(TransportState::Opening);

        let uri = self.ws_uri();
        let mut request = uri
            .into_client_request()
            .map_err(|e| SioError::Transport(format!("invalid websocket uri: {e}")))?;

        let extra_headers = self.options.lock().unwrap().extra_headers.clone();
        for (k, values) in extra_headers.iter() {
            for v in values {
                if let Ok(value) = HeaderValue::from_str(v) {
                    request.headers_mut().append(
                        tokio_tungstenite::tungstenite::http::HeaderName::from_bytes(
                            k.as_bytes(),
                        )
                        .map_err(|e| SioError::Transport(format!("invalid header name: {e}")))?,
                        value,
                    );
                }
            }
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| SioError::Transport(format!("websocket handshake failed: {e}")))?;

        let mut headers = std::collections::HashMap::new();
        for (name, value) in response.headers().iter() {
            headers
                .entry(name.to_string())
                .or_insert_with(Vec::new)
                .push(value.to_str().unwrap_or_default().to_string());
        }
        self.events.response_headers.emit("responseHeaders", &[headers]);

        *self.stream.lock().await = Some(stream);
        self.set_state(TransportState::Open);
        self.events.open.emit("open", &[]);
        Ok(())
    }

    async fn send(&self, packets: Vec<EnginePacket>) -> SioResult<()> {
        if self.state() != TransportState::Open {
            return Err(SioError::InvalidState(
                "cannot send on a transport that is not open".into(),
            ));
        }

        self.writable.store(false, Ordering::SeqCst);
        let n = packets.len();

        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| SioError::InvalidState("websocket not connected".into()))?;

        for packet in &packets {
            let msg = if matches!(packet, EnginePacket::BinaryData { .. }) {
                WsMessage::Binary(packet.encode_binary()?)
            } else {
                WsMessage::Text(packet.encode_text()?)
            };
            stream
                .send(msg)
                .await
                .map_err(|e| SioError::Transport(format!("websocket send failed: {e}")))?;
        }

        self.writable.store(true, Ordering::SeqCst);
        self.events.drain.emit("drain", &[n]);
        Ok(())
    }

    async fn close(&self) -> SioResult<()> {
        self.set_state(TransportState::Closing);
        let mut guard = self.stream.lock().await;
        if let Some(stream) = guard.as_mut() {
            let _ = stream.close(None).await;
        }
        *guard = None;
        self.set_state(TransportState::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TransportOptions;

    #[test]
    fn new_starts_in_init_state() {
        let ws = WebSocket::new(TransportOptions::default());
        assert_eq!(ws.state(), TransportState::Init);
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let ws = WebSocket::new(TransportOptions::default());
        let err = ws.send(vec![]).await.unwrap_err();
        assert!(matches!(err, SioError::InvalidState(_)));
    }
}
