//! User-facing and Manager-internal event tables.

use serde_json::Value as JsonValue;
use sio_util::Emitter;

use crate::socket::IncomingEvent;

/// Events a [`crate::manager::SocketManager`] exposes to its
/// namespace sockets and to user code that watches connection health.
#[derive(Clone, Default)]
pub struct ManagerEvents {
    pub open: Emitter<()>,
    pub error: Emitter<String>,
    pub close: Emitter<String>,
    pub reconnect: Emitter<u32>,
    pub reconnect_attempt: Emitter<u32>,
    pub reconnect_error: Emitter<String>,
    pub reconnect_failed: Emitter<()>,
}

/// Events a [`crate::socket::NamespaceSocket`] exposes to user code.
/// Arbitrary application event names (`"chat message"`, ...) all
/// multiplex through `event`, keyed by name the same way the other
/// typed emitters key by their event string.
#[derive(Clone, Default)]
pub struct SocketEvents {
    pub connect: Emitter<()>,
    pub disconnect: Emitter<String>,
    pub connect_error: Emitter<JsonValue>,
    pub error: Emitter<String>,
    pub event: Emitter<IncomingEvent>,
}

/// Names a user may not pass to [`crate::socket::NamespaceSocket::emit`]
/// since they are reserved for the socket's own
/// lifecycle notifications.
pub const RESERVED_EVENTS: &[&str] = &[
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

pub fn is_reserved(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}
