//! Engine connection state: the same lifecycle as a
//! transport, minus `Paused` (only transports pause).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    Opening,
    Open,
    Closing,
    Closed,
}
