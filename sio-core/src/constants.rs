//! Workspace-wide constants.

/// Crate version, surfaced for diagnostics and user-agent-style strings.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine.IO protocol version this client speaks.
pub const EIO_VERSION: u8 = 4;

/// Default Engine.IO handshake path.
pub const DEFAULT_ENGINE_PATH: &str = "/engine.io/";

/// Default Socket.IO handshake path (kept for parity with the reference
/// server-side default; this client does not special-case it beyond
/// exposing the constant).
pub const DEFAULT_SOCKET_PATH: &str = "/socket.io/";

/// Default namespace path.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Default query parameter name carrying the cache-busting timestamp.
pub const DEFAULT_TIMESTAMP_PARAM: &str = "t";

/// Default reconnection delay (5s).
pub const DEFAULT_RECONNECTION_DELAY_MS: u64 = 5_000;

/// Default maximum reconnection delay (10s).
pub const DEFAULT_RECONNECTION_DELAY_MAX_MS: u64 = 10_000;

/// Default backoff jitter factor.
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Default Manager open timeout (20s).
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 20_000;

/// Reserved event names a user cannot emit directly.
pub const RESERVED_EVENTS: &[&str] = &[
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];
