//! Daemon runtime: protocol command loop + per-replica watch routers.

mod error;
mod registry;
mod router;
mod runtime;
mod transport;

pub use error::MonitorError;
pub use registry::{ReplicaEntry, ReplicaRegistry, StartOutcome};
pub use runtime::{start_blocking, Monitor, PROTOCOL_VERSION};
pub use transport::CommandSender;
