//! Engine configuration.

use sio_transport::TransportOptions;

/// Options controlling how an `Engine` opens and upgrades its
/// connection. `transport` carries the host/path/query/header
/// settings shared by every transport the Engine constructs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub transport: TransportOptions,
    /// Ordered candidate transport names, e.g. `["polling", "websocket"]`.
    pub transports: Vec<String>,
    pub upgrade: bool,
    pub remember_upgrade: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            transport: TransportOptions::default(),
            transports: vec!["polling".to_string(), "websocket".to_string()],
            upgrade: true,
            remember_upgrade: false,
        }
    }
}
