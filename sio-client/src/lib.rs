//! Socket.IO v4 client: namespace multiplexing, acknowledgements, and
//! binary reconstruction on top of [`sio_engine`]'s Engine.IO session
//!.

pub mod ack;
pub mod binary;
pub mod entry;
pub mod events;
pub mod manager;
pub mod socket;

pub use ack::{AckFn, AckWithTimeout};
pub use binary::{BinaryReconstructor, DataElement, ReconstructedMessage};
pub use entry::{io, IoConfig, LogLevel, LoggingConfig};
pub use events::{ManagerEvents, SocketEvents};
pub use manager::{ManagerOptions, ManagerState, SocketManager};
pub use socket::{AckResponder, IncomingEvent, NamespaceSocket, OutgoingPacket};
