//! Transport implementations for the Engine.IO session layer: HTTP
//! long-polling and WebSocket, plus the shared abstract `Transport`
//! trait and URL construction.

pub mod events;
pub mod options;
pub mod polling;
pub mod state;
pub mod transport;
pub mod websocket;

pub use events::TransportEvents;
pub use options::TransportOptions;
pub use polling::Polling;
pub use state::TransportState;
pub use transport::Transport;
pub use websocket::WebSocket;
