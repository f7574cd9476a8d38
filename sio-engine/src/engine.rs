//! The Engine.IO session layer: handshake, heartbeat,
//! outbound buffering, and the polling→websocket probe/upgrade dance.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use url::Url;

use sio_codec::EnginePacket;
use sio_core::error::{SioError, SioResult};
use sio_transport::{Polling, Transport, TransportEvents, WebSocket};

use crate::events::{EngineData, EngineEvents, HandshakeInfo};
use crate::options::EngineOptions;
use crate::state::EngineState;

/// Process-wide hint remembered across Engine instances: did the most recent websocket probe succeed? Consulted only
/// when `remember_upgrade` is set.
static PRIOR_WEBSOCKET_SUCCESS: AtomicBool = AtomicBool::new(false);

/// The Engine owns exactly one of these at a time. An enum, rather
/// than a `dyn Transport` trait object, since the Engine occasionally
/// needs transport-specific operations (`set_sid` on the concrete
/// polling/websocket types) that a trait object would need unsafe
/// downcasting to reach.
#[derive(Clone)]
enum ActiveTransport {
    Polling(Arc<Polling>),
    WebSocket(Arc<WebSocket>),
}

impl ActiveTransport {
    fn build(name: &str, opts: sio_transport::TransportOptions) -> SioResult<Self> {
        Ok(match name {
            "websocket" => Self::WebSocket(Arc::new(WebSocket::new(opts))),
            _ => Self::Polling(Arc::new(Polling::new(opts)?)),
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Polling(_) => "polling",
            Self::WebSocket(_) => "websocket",
        }
    }

    /// Identity of the underlying transport instance, for comparing a
    /// probe candidate against whatever the Engine currently has
    /// outstanding (an `Arc` clone compares equal, a different
    /// transport instance never does).
    fn ptr(&self) -> usize {
        match self {
            Self::Polling(p) => Arc::as_ptr(p) as usize,
            Self::WebSocket(w) => Arc::as_ptr(w) as usize,
        }
    }

    fn events(&self) -> &TransportEvents {
        match self {
            Self::Polling(p) => p.events(),
            Self::WebSocket(w) => w.events(),
        }
    }

    fn writable(&self) -> bool {
        match self {
            Self::Polling(p) => p.writable(),
            Self::WebSocket(w) => w.writable(),
        }
    }

    fn set_sid(&self, sid: &str) {
        match self {
            Self::Polling(p) => p.set_sid(sid),
            Self::WebSocket(w) => w.set_sid(sid),
        }
    }

    async fn open(&self) -> SioResult<()> {
        match self {
            Self::Polling(p) => p.open().await,
            Self::WebSocket(w) => w.open().await,
        }
    }

    async fn send(&self, packets: Vec<EnginePacket>) -> SioResult<()> {
        match self {
            Self::Polling(p) => p.send(packets).await,
            Self::WebSocket(w) => w.send(packets).await,
        }
    }

    async fn close(&self) -> SioResult<()> {
        match self {
            Self::Polling(p) => p.close().await,
            Self::WebSocket(w) => w.close().await,
        }
    }

    async fn pause(&self) -> SioResult<()> {
        match self {
            Self::Polling(p) => p.pause().await,
            Self::WebSocket(_) => Ok(()),
        }
    }

    fn spawn_receive_loop_if_needed(&self) {
        if let Self::WebSocket(w) = self {
            let w = w.clone();
            tokio::spawn(async move {
                w.run_receive_loop().await;
            });
        }
    }
}

struct Probe {
    candidate: ActiveTransport,
    task: JoinHandle<()>,
}

pub struct Engine {
    options: EngineOptions,
    state: Mutex<EngineState>,
    transport: AsyncMutex<Option<ActiveTransport>>,
    sid: Mutex<Option<String>>,
    upgrades: Mutex<Vec<String>>,
    ping_interval_ms: AtomicUsize,
    ping_timeout_ms: AtomicUsize,
    upgrading: AtomicBool,
    out_buffer: Mutex<Vec<EnginePacket>>,
    prev_buffer_len: AtomicUsize,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    probe: AsyncMutex<Option<Probe>>,
    events: EngineEvents,
}

impl Engine {
    /// Parse `uri`, defaulting the path to `/engine.io/` and stripping
    /// IPv6 brackets, then build an Engine with the given options
    /// layered over the parsed host/port/scheme.
    pub fn new(uri: &str, mut options: EngineOptions) -> SioResult<Arc<Self>> {
        let parsed = Url::parse(uri)?;

        let is_secure = matches!(parsed.scheme(), "https" | "wss");
        let hostname = parsed
            .host_str()
            .ok_or_else(|| SioError::InvalidUri("missing host".into()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed.port().unwrap_or(0);

        options.transport.is_secure = is_secure;
        options.transport.hostname = hostname;
        options.transport.port = port;
        if options.transport.path.is_empty() || options.transport.path == "/" {
            options.transport.path = "/engine.io/".to_string();
        }
        for (k, v) in parsed.query_pairs() {
            options.transport.set_query_param(&k, &v);
        }

        Ok(Arc::new(Self {
            options,
            state: Mutex::new(EngineState::Init),
            transport: AsyncMutex::new(None),
            sid: Mutex::new(None),
            upgrades: Mutex::new(Vec::new()),
            ping_interval_ms: AtomicUsize::new(25_000),
            ping_timeout_ms: AtomicUsize::new(20_000),
            upgrading: AtomicBool::new(false),
            out_buffer: Mutex::new(Vec::new()),
            prev_buffer_len: AtomicUsize::new(0),
            heartbeat_task: Mutex::new(None),
            probe: AsyncMutex::new(None),
            events: EngineEvents::new(),
        }))
    }

    pub fn events(&self) -> &EngineEvents {
        &self.events
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, s: EngineState) {
        *self.state.lock().unwrap() = s;
    }

    fn initial_transport_name(&self) -> String {
        let remember = self.options.remember_upgrade
            && PRIOR_WEBSOCKET_SUCCESS.load(Ordering::SeqCst)
            && self.options.transports.iter().any(|t| t == "websocket");
        if remember {
            "websocket".to_string()
        } else {
            self.options
                .transports
                .first()
                .cloned()
                .unwrap_or_else(|| "polling".to_string())
        }
    }

    fn transport_options_for(&self, name: &str) -> sio_transport::TransportOptions {
        let mut opts = self.options.transport.clone();
        opts.set_query_param("EIO", "4");
        opts.set_query_param("transport", name);
        if let Some(sid) = self.sid.lock().unwrap().clone() {
            opts.set_query_param("sid", &sid);
        }
        opts
    }

    /// Begin opening the Engine on its initial transport.
    pub async fn open(self: &Arc<Self>) -> SioResult<()> {
        self.set_state(EngineState::Opening);
        let name = self.initial_transport_name();
        let opts = self.transport_options_for(&name);
        let transport = ActiveTransport::build(&name, opts)?;

        self.install_packet_subscription(&transport);
        self.install_active_subscriptions(&transport);
        transport.spawn_receive_loop_if_needed();
        *self.transport.lock().await = Some(transport.clone());

        transport.open().await
    }

    /// Route a transport's inbound packets through `handle_packet`.
    /// Installed on the current transport only — a probe candidate's
    /// single expected `Pong{"probe"}` reply is watched for separately
    /// by `start_probe`'s own one-shot listener, since a candidate is
    /// not yet the Engine's transport and must not feed ordinary
    /// traffic through the main dispatch path until it is promoted.
    fn install_packet_subscription(self: &Arc<Self>, transport: &ActiveTransport) {
        let me = self.clone();
        transport.events().packet.on("packet", move |packets| {
            for packet in packets {
                let me = me.clone();
                let packet = packet.clone();
                tokio::spawn(async move {
                    if let Err(e) = me.handle_packet(packet).await {
                        me.events.error.emit("error", &[e.to_string()]);
                    }
                });
            }
        });
    }

    /// Forward a transport's `drain`/`close` events to the Engine's own
    /// listeners. Only ever installed on the current transport: a
    /// probe candidate closing (e.g. a failed probe) must not tear
    /// down the Engine.
    fn install_active_subscriptions(self: &Arc<Self>, transport: &ActiveTransport) {
        let me = self.clone();
        transport.events().drain.on("drain", move |counts| {
            if let Some(&n) = counts.first() {
                let me = me.clone();
                tokio::spawn(async move {
                    if let Err(e) = me.on_transport_drain(n).await {
                        me.events.error.emit("error", &[e.to_string()]);
                    }
                });
            }
        });

        let events = self.events.clone();
        transport.events().close.on("close", move |reasons| {
            if let Some(reason) = reasons.first() {
                events.close.emit("close", &[reason.clone()]);
            }
        });
    }

    /// Dispatch an inbound Engine.IO packet.
    pub async fn handle_packet(self: &Arc<Self>, packet: EnginePacket) -> SioResult<()> {
        self.events.packet.emit("packet", &[packet.clone()]);
        self.events.heartbeat.emit("heartbeat", &[]);
        self.schedule_heartbeat_timeout();

        match packet {
            EnginePacket::Open {
                sid,
                upgrades,
                ping_interval,
                ping_timeout,
            } => {
                *self.sid.lock().unwrap() = Some(sid.clone());
                *self.upgrades.lock().unwrap() = upgrades.clone();
                self.ping_interval_ms.store(ping_interval as usize, Ordering::SeqCst);
                self.ping_timeout_ms.store(ping_timeout as usize, Ordering::SeqCst);

                let current_is_polling = {
                    let guard = self.transport.lock().await;
                    if let Some(t) = guard.as_ref() {
                        t.set_sid(&sid);
                        t.name() == "polling"
                    } else {
                        false
                    }
                };

                self.events.handshake.emit(
                    "handshake",
                    &[HandshakeInfo {
                        sid,
                        upgrades: upgrades.clone(),
                        ping_interval,
                        ping_timeout,
                    }],
                );
                self.set_state(EngineState::Open);
                self.events.open.emit("open", &[]);

                let candidates = self.filter_upgrades(&upgrades).await;
                if self.options.upgrade && current_is_polling && !candidates.is_empty() {
                    self.start_probe(candidates[0].clone()).await?;
                }
            }
            EnginePacket::Ping { .. } => {
                self.events.ping.emit("ping", &[]);
                self.send(vec![EnginePacket::Pong { payload: None }]).await?;
            }
            EnginePacket::Message { payload } => {
                self.events.data.emit("data", &[EngineData::Text(payload)]);
            }
            EnginePacket::BinaryData { payload } => {
                self.events.data.emit("data", &[EngineData::Binary(payload)]);
            }
            _ => {}
        }

        Ok(())
    }

    async fn filter_upgrades(&self, remote: &[String]) -> Vec<String> {
        let current_name = self.transport.lock().await.as_ref().map(|t| t.name());
        remote
            .iter()
            .filter(|name| self.options.transports.iter().any(|t| t == *name))
            .filter(|name| Some(name.as_str()) != current_name)
            .cloned()
            .collect()
    }

    fn schedule_heartbeat_timeout(&self) {
        let interval = self.ping_interval_ms.load(Ordering::SeqCst) as u64;
        let timeout = self.ping_timeout_ms.load(Ordering::SeqCst) as u64;
        let delay = Duration::from_millis(interval + timeout);

        if let Some(old) = self.heartbeat_task.lock().unwrap().take() {
            old.abort();
        }

        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.close.emit("close", &["ping timeout".to_string()]);
        });
        *self.heartbeat_task.lock().unwrap() = Some(handle);
    }

    /// Queue packets for send and attempt a flush.
    pub async fn send(&self, packets: Vec<EnginePacket>) -> SioResult<()> {
        let state = self.state();
        if !matches!(state, EngineState::Opening | EngineState::Open) {
            return Ok(());
        }
        self.out_buffer.lock().unwrap().extend(packets);
        self.flush().await
    }

    async fn flush(&self) -> SioResult<()> {
        if self.state() == EngineState::Closed || self.upgrading.load(Ordering::SeqCst) {
            return Ok(());
        }
        let transport = self.transport.lock().await.clone();
        let Some(transport) = transport else { return Ok(()) };
        if !transport.writable() {
            return Ok(());
        }

        let suffix = {
            let buf = self.out_buffer.lock().unwrap();
            let prev = self.prev_buffer_len.load(Ordering::SeqCst);
            if prev >= buf.len() {
                return Ok(());
            }
            self.prev_buffer_len.store(buf.len(), Ordering::SeqCst);
            buf[prev..].to_vec()
        };
        if suffix.is_empty() {
            return Ok(());
        }

        transport.send(suffix).await?;
        self.events.flush.emit("flush", &[]);
        Ok(())
    }

    /// Handle a transport `drain(n)` event: pop delivered packets and
    /// flush again if more are queued.
    pub async fn on_transport_drain(&self, n: usize) -> SioResult<()> {
        let empty = {
            let mut buf = self.out_buffer.lock().unwrap();
            let drained = n.min(buf.len());
            buf.drain(0..drained);
            let prev = self.prev_buffer_len.load(Ordering::SeqCst);
            self.prev_buffer_len.store(prev.saturating_sub(n), Ordering::SeqCst);
            buf.is_empty()
        };

        if empty {
            self.events.drain.emit("drain", &[()]);
        } else {
            self.flush().await?;
        }
        Ok(())
    }

    /// Launch a probe against `name`: open a candidate transport, send
    /// it a `Ping{"probe"}`, and wait once for its reply. A prior
    /// outstanding probe (starting a different upgrade) is frozen
    /// first, per spec.md §4.6 step 6.
    async fn start_probe(self: &Arc<Self>, name: String) -> SioResult<()> {
        self.abandon_probe().await;

        let opts = self.transport_options_for(&name);
        let candidate = ActiveTransport::build(&name, opts)?;
        PRIOR_WEBSOCKET_SUCCESS.store(false, Ordering::SeqCst);
        candidate.spawn_receive_loop_if_needed();

        let me = self.clone();
        let cand = candidate.clone();
        candidate.events().error.on("error", move |_| {
            let me = me.clone();
            let cand = cand.clone();
            tokio::spawn(async move { me.freeze_probe(&cand).await });
        });

        let me = self.clone();
        let cand = candidate.clone();
        candidate.events().close.on("close", move |_| {
            let me = me.clone();
            let cand = cand.clone();
            tokio::spawn(async move { me.freeze_probe(&cand).await });
        });

        let me = self.clone();
        let cand = candidate.clone();
        candidate.events().packet.once("packet", move |packets| {
            let me = me.clone();
            let cand = cand.clone();
            let is_probe_pong = packets
                .first()
                .map(|p| matches!(p, EnginePacket::Pong { payload } if payload.as_deref() == Some("probe")))
                .unwrap_or(false);
            tokio::spawn(async move {
                if is_probe_pong {
                    if let Err(e) = me.confirm_probe().await {
                        me.events.error.emit("error", &[e.to_string()]);
                    }
                } else {
                    me.events.upgrade_error.emit("upgrade_error", &["probe error".to_string()]);
                    me.freeze_probe(&cand).await;
                }
            });
        });

        let me = self.clone();
        let probe_transport = candidate.clone();
        let task = tokio::spawn(async move {
            if probe_transport.open().await.is_err() {
                me.events.upgrade_error.emit("upgrade_error", &["probe error".to_string()]);
                me.freeze_probe(&probe_transport).await;
                return;
            }
            let _ = probe_transport
                .send(vec![EnginePacket::Ping {
                    payload: Some("probe".to_string()),
                }])
                .await;
        });

        *self.probe.lock().await = Some(Probe { candidate, task });
        Ok(())
    }

    /// Called when the expected `Pong{payload:"probe"}` arrives while a
    /// probe is outstanding — completes the upgrade.
    pub async fn confirm_probe(self: &Arc<Self>) -> SioResult<()> {
        let probe = self.probe.lock().await.take();
        let Some(probe) = probe else { return Ok(()) };

        self.upgrading.store(true, Ordering::SeqCst);
        self.events.upgrading.emit("upgrading", &[probe.candidate.name().to_string()]);
        PRIOR_WEBSOCKET_SUCCESS.store(probe.candidate.name() == "websocket", Ordering::SeqCst);

        let old_transport = self.transport.lock().await.clone();
        if let Some(old) = &old_transport {
            old.pause().await?;
        }

        probe.candidate.send(vec![EnginePacket::Upgrade]).await?;
        self.install_packet_subscription(&probe.candidate);
        self.install_active_subscriptions(&probe.candidate);
        *self.transport.lock().await = Some(probe.candidate.clone());
        self.events.upgrade.emit("upgrade", &[probe.candidate.name().to_string()]);
        self.upgrading.store(false, Ordering::SeqCst);
        self.flush().await?;

        if let Some(old) = old_transport {
            old.close().await?;
        }
        probe.task.abort();
        Ok(())
    }

    /// Abandon whatever probe is currently outstanding, regardless of
    /// which candidate it holds. Used when the Engine itself closes or
    /// a new probe supersedes the old one.
    pub async fn abandon_probe(&self) {
        if let Some(probe) = self.probe.lock().await.take() {
            probe.task.abort();
            let _ = probe.candidate.close().await;
        }
    }

    /// Freeze a probe only if `candidate` is still the one currently
    /// outstanding — guards against a stale event from an
    /// already-superseded or already-confirmed probe closing out the
    /// Engine's current probe state.
    async fn freeze_probe(&self, candidate: &ActiveTransport) {
        let frozen = {
            let mut guard = self.probe.lock().await;
            match guard.as_ref() {
                Some(p) if p.candidate.ptr() == candidate.ptr() => guard.take(),
                _ => None,
            }
        };
        if let Some(probe) = frozen {
            probe.task.abort();
            let _ = probe.candidate.close().await;
        }
    }

    /// Close the Engine: cancels the heartbeat, abandons any probe,
    /// closes the current transport, and resets buffers. If the write
    /// buffer still has packets queued or an upgrade is in flight, the
    /// actual teardown is deferred until the buffer drains or the
    /// upgrade settles, rather than discarding buffered packets or
    /// cutting off a probe mid-handshake.
    pub async fn close(self: &Arc<Self>) -> SioResult<()> {
        if !matches!(self.state(), EngineState::Opening | EngineState::Open) {
            return Ok(());
        }
        self.set_state(EngineState::Closing);

        let buffer_pending = !self.out_buffer.lock().unwrap().is_empty();
        let upgrading = self.upgrading.load(Ordering::SeqCst);

        if buffer_pending || upgrading {
            self.defer_close();
            return Ok(());
        }

        self.finish_close().await
    }

    /// Register one-shot listeners on `drain`/`upgrade`/`upgrade_error`
    /// that each race to run `finish_close` once the pending drain or
    /// upgrade settles. `finish_close` is `take()`-based and checks the
    /// state is still `Closing`, so whichever listener fires first does
    /// the real work and the others are harmless no-ops.
    fn defer_close(self: &Arc<Self>) {
        let me = self.clone();
        self.events.drain.once("drain", move |_| {
            let me = me.clone();
            tokio::spawn(async move {
                if let Err(e) = me.finish_close().await {
                    me.events.error.emit("error", &[e.to_string()]);
                }
            });
        });

        let me = self.clone();
        self.events.upgrade.once("upgrade", move |_| {
            let me = me.clone();
            tokio::spawn(async move {
                if let Err(e) = me.finish_close().await {
                    me.events.error.emit("error", &[e.to_string()]);
                }
            });
        });

        let me = self.clone();
        self.events.upgrade_error.once("upgrade_error", move |_| {
            let me = me.clone();
            tokio::spawn(async move {
                if let Err(e) = me.finish_close().await {
                    me.events.error.emit("error", &[e.to_string()]);
                }
            });
        });
    }

    /// The real teardown, run either immediately by `close()` when
    /// nothing is pending, or later by `defer_close` once it is.
    async fn finish_close(&self) -> SioResult<()> {
        if self.state() != EngineState::Closing {
            return Ok(());
        }

        if let Some(task) = self.heartbeat_task.lock().unwrap().take() {
            task.abort();
        }
        self.abandon_probe().await;

        if let Some(transport) = self.transport.lock().await.take() {
            transport.close().await?;
        }
        self.out_buffer.lock().unwrap().clear();
        self.prev_buffer_len.store(0, Ordering::SeqCst);
        self.set_state(EngineState::Closed);
        self.events.close.emit("close", &["force close".to_string()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_parses_uri_and_defaults_path() {
        let engine = Engine::new("https://example.com:8443", EngineOptions::default()).unwrap();
        assert!(engine.options.transport.is_secure);
        assert_eq!(engine.options.transport.hostname, "example.com");
        assert_eq!(engine.options.transport.port, 8443);
        assert_eq!(engine.options.transport.path, "/engine.io/");
        assert_eq!(engine.state(), EngineState::Init);
    }

    #[test]
    fn new_strips_ipv6_brackets() {
        let engine = Engine::new("http://[::1]:3000", EngineOptions::default()).unwrap();
        assert_eq!(engine.options.transport.hostname, "::1");
    }

    #[test]
    fn initial_transport_defaults_to_first_configured() {
        let engine = Engine::new("http://example.com", EngineOptions::default()).unwrap();
        assert_eq!(engine.initial_transport_name(), "polling");
    }

    #[test]
    fn initial_transport_remembers_websocket_when_configured() {
        PRIOR_WEBSOCKET_SUCCESS.store(true, Ordering::SeqCst);
        let mut opts = EngineOptions::default();
        opts.remember_upgrade = true;
        let engine = Engine::new("http://example.com", opts).unwrap();
        assert_eq!(engine.initial_transport_name(), "websocket");
        PRIOR_WEBSOCKET_SUCCESS.store(false, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn filter_upgrades_excludes_current_transport_and_unconfigured_names() {
        let engine = Engine::new("http://example.com", EngineOptions::default()).unwrap();
        *engine.transport.lock().await = Some(
            ActiveTransport::build("polling", engine.transport_options_for("polling")).unwrap(),
        );
        let candidates = engine
            .filter_upgrades(&["polling".to_string(), "websocket".to_string(), "flash".to_string()])
            .await;
        assert_eq!(candidates, vec!["websocket".to_string()]);
    }

    #[tokio::test]
    async fn send_before_open_is_a_no_op() {
        let engine = Engine::new("http://example.com", EngineOptions::default()).unwrap();
        engine
            .send(vec![EnginePacket::Message { payload: "x".into() }])
            .await
            .unwrap();
        assert!(engine.out_buffer.lock().unwrap().is_empty());
    }
}

