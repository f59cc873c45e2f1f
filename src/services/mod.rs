//! Stream supervision services
//!
//! - [`StreamSupervisor`]: analyzer process lifecycle and snapshot emission
//! - [`FleetCoordinator`]: one supervisor and sink consumer per feed
//! - [`RawBuffer`]: bounded window of analyzer output
//! - [`RestartBackoff`]: capped exponential respawn delay

pub mod analyzer_command;
pub mod fleet_coordinator;
pub mod report_buffer;
pub mod restart_backoff;
pub mod stream_supervisor;

pub use analyzer_command::AnalyzerCommand;
pub use fleet_coordinator::FleetCoordinator;
pub use report_buffer::RawBuffer;
pub use restart_backoff::RestartBackoff;
pub use stream_supervisor::{SnapshotReceiver, StreamSupervisor};
