//! Unified error type for the Socket.IO client.
//!
//! Every public operation across the workspace returns [`SioResult`].
//! Wire-level exceptions from transports are caught at the I/O boundary
//! and re-emitted here as `error` events; they never propagate across
//! the public emitter boundary as a thrown exception.

use thiserror::Error;

/// Convenience alias for `Result<T, SioError>`.
pub type SioResult<T> = Result<T, SioError>;

/// Unified error type covering every failure category in the client.
#[derive(Error, Debug)]
pub enum SioError {
    /// The operation was attempted while the owning state machine was
    /// in a state that does not permit it (e.g. `send` before `OPEN`).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A constructor or setter received an argument outside its
    /// documented domain (e.g. jitter outside `[0, 1)`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failed to open, or an established transport died.
    #[error("transport error: {0}")]
    Transport(String),

    /// Engine.IO / Socket.IO frame decode failure.
    #[error("decode error: {0}")]
    Decode(String),

    /// An operation did not complete before its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The Engine.IO heartbeat was not observed in time.
    #[error("ping timeout")]
    PingTimeout,

    /// A websocket upgrade probe failed; the current transport is
    /// unaffected, this is a non-fatal, logged condition.
    #[error("probe error")]
    ProbeError,

    /// Reconnection attempts were exhausted.
    #[error("reconnect failed after exhausting configured attempts")]
    ReconnectFailed,

    /// URI could not be parsed into transport options.
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    /// Percent-decoding encountered an invalid escape sequence.
    #[error("invalid percent-encoding: {0}")]
    InvalidPercentEncoding(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An internal invariant was violated; these are bugs, not
    /// recoverable user-facing conditions.
    #[error("internal error: {0}")]
    Internal(String),

    /// Escape hatch for interop with `anyhow`-based caller code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for SioError {
    fn from(e: std::io::Error) -> Self {
        SioError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for SioError {
    fn from(e: serde_json::Error) -> Self {
        SioError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for SioError {
    fn from(e: url::ParseError) -> Self {
        SioError::InvalidUri(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(SioError::PingTimeout.to_string(), "ping timeout");
        assert_eq!(
            SioError::InvalidState("send before open".into()).to_string(),
            "invalid state: send before open"
        );
    }
}
