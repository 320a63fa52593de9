//! Runtime-free building blocks for the fsmonitor daemon.
//!
//! Public API surface:
//! - [`set`] — [`SyncSet`], the thread-safe string set shared between the
//!   command loop and the watch routers
//! - [`wire`] — percent-escaped line codec for the monitor protocol
//! - [`command`] — typed protocol commands with validated parsing
//! - [`error`] — [`ProtocolError`]

pub mod command;
pub mod error;
pub mod set;
pub mod wire;

pub use command::Command;
pub use error::ProtocolError;
pub use set::SyncSet;
