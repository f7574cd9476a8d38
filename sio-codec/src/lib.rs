//! Engine.IO v4 and Socket.IO v4 frame codec.
//!
//! This is the wire-format layer the rest of the workspace treats as an
//! external collaborator: it turns bytes on the wire into typed packet
//! values and back, and knows nothing about transports, handshakes, or
//! reconnection. Grounded on the Engine.IO/Socket.IO packet types and
//! text-framing scheme used throughout the open-source reference
//! implementations of both protocols (single leading digit for packet
//! type, comma-delimited namespace, bare integer ack id, trailing JSON).

pub mod engine;
pub mod socket;

pub use engine::{EnginePacket, EnginePacketType};
pub use socket::{PayloadElement, SocketPacket, SocketPacketType};
