//! The transport abstraction.

use async_trait::async_trait;
use sio_codec::EnginePacket;
use sio_core::error::SioResult;

use crate::events::TransportEvents;
use crate::state::TransportState;

/// Common surface both `Polling` and `WebSocket` implement.
///
/// `open`/`send`/`close` are asynchronous but non-blocking from the
/// caller's perspective: they kick off work and report results through
/// `events()`, mirroring a serialized/I-O scope split (the actual
/// network work happens on tokio tasks; callers observe it via emitted
/// events).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable transport name, e.g. `"polling"` or `"websocket"`.
    fn name(&self) -> &'static str;

    fn state(&self) -> TransportState;

    /// Whether the send side is idle (no outstanding write).
    fn writable(&self) -> bool;

    /// Event channels: `open`, `close`, `packet`, `drain`, `error`,
    /// `requestHeaders`, `responseHeaders`.
    fn events(&self) -> &TransportEvents;

    /// Begin opening the transport. Returns once the open attempt has
    /// been dispatched; completion is reported via `events().open` or
    /// `events().error`.
    async fn open(&self) -> SioResult<()>;

    /// Send a batch of packets. Fails with `InvalidState` unless
    /// `state() == Open`.
    async fn send(&self, packets: Vec<EnginePacket>) -> SioResult<()>;

    /// Close the transport.
    async fn close(&self) -> SioResult<()>;

    /// Pause the transport ahead of an upgrade handoff. A no-op for
    /// transports where pausing has no meaning (websocket).
    async fn pause(&self) -> SioResult<()> {
        Ok(())
    }
}
