//! Socket.IO client — foundation crate.
//!
//! Shared error type, constants, and logging setup used by every other
//! crate in the workspace.

pub mod constants;
pub mod error;
pub mod logging;

pub use error::{SioError, SioResult};
pub use logging::init_logging;
