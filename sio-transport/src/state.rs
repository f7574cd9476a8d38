//! Transport connection state.

/// Lifecycle state shared by every transport. `Paused` only ever
/// appears on the polling transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Init,
    Opening,
    Open,
    Closing,
    Closed,
    Paused,
}
