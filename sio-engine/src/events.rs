//! Events the Engine emits to the Socket Manager.

use sio_codec::EnginePacket;
use sio_util::Emitter;

#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

/// Payload of a Message/BinaryData packet, handed up to the Socket
/// Manager for Socket.IO decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineData {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Clone, Default)]
pub struct EngineEvents {
    pub open: Emitter<()>,
    pub handshake: Emitter<HandshakeInfo>,
    pub packet: Emitter<EnginePacket>,
    pub data: Emitter<EngineData>,
    pub ping: Emitter<()>,
    pub heartbeat: Emitter<()>,
    pub upgrading: Emitter<String>,
    pub upgrade: Emitter<String>,
    pub upgrade_error: Emitter<String>,
    pub flush: Emitter<()>,
    pub drain: Emitter<()>,
    pub close: Emitter<String>,
    pub error: Emitter<String>,
}

impl EngineEvents {
    pub fn new() -> Self {
        Self::default()
    }
}
