//! The Engine.IO session layer: handshake, heartbeat,
//! outbound buffering, and the polling→websocket probe/upgrade dance.

pub mod engine;
pub mod events;
pub mod options;
pub mod state;

pub use engine::Engine;
pub use events::{EngineData, EngineEvents, HandshakeInfo};
pub use options::EngineOptions;
pub use state::EngineState;
