//! Leaf utilities shared across the Socket.IO client: a jittered
//! exponential backoff generator, a thread-safe event emitter, and
//! query-string / percent-encoding helpers.

pub mod backoff;
pub mod emitter;
pub mod qs;

pub use backoff::Backoff;
pub use emitter::{Emitter, ListenerId};
pub use qs::{percent_decode, percent_encode, qs_decode, qs_encode};
