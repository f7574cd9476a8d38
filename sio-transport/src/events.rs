//! Typed event channels a [`crate::Transport`] exposes:
//! `open`, `close`, `packet`, `drain`, `error`, `requestHeaders`,
//! `responseHeaders`.
//!
//! `sio_util::Emitter<T>` is generic but each of these event names
//! always carries the same payload shape, so rather than stringly
//! dispatch through one `Emitter<EnginePacket>` (forcing every event
//! to share a type) this groups one differently-typed `Emitter` per
//! event name, each still independently snapshot-dispatched and
//! thread-safe.

use std::collections::HashMap;

use sio_codec::EnginePacket;
use sio_util::Emitter;

pub type HeaderMap = HashMap<String, Vec<String>>;

#[derive(Clone, Default)]
pub struct TransportEvents {
    pub open: Emitter<()>,
    pub close: Emitter<String>,
    pub packet: Emitter<EnginePacket>,
    pub drain: Emitter<usize>,
    pub error: Emitter<String>,
    pub request_headers: Emitter<HeaderMap>,
    pub response_headers: Emitter<HeaderMap>,
    /// Polling-only: fires after each GET batch finishes processing,
    /// used by `pause()` to know when it is safe to hand off.
    pub poll_complete: Emitter<()>,
}

impl TransportEvents {
    pub fn new() -> Self {
        Self::default()
    }
}
