pub mod connection_tracker;
pub mod graceful_shutdown;
pub mod probe_worker;

pub use connection_tracker::ConnectionTracker;
pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
pub use probe_worker::{ProbeWorkerHandle, spawn_probe_worker};
