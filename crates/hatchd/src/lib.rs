//! Privilege brokering daemon.
//!
//! `hatchd` exports a small set of privileged methods on the message bus.
//! Each call is authenticated by the bus connection identity of its sender,
//! routed through an in-memory tree of service, object pattern, interface and
//! method, validated, and handed to a [`MethodHandler`]. Configured methods
//! run a helper program and return its exit code and output.
//!
//! Everything runs on one thread. The [`EventLoop`] multiplexes bus
//! descriptors, helper output pipes and child exits; [`Context`] owns the
//! routing tree and one bus connection per exported service, and reconnects
//! services whose connection was lost.

pub mod accounts;
mod bootstrap;
pub mod buffer;
pub mod bus;
pub mod connection;
mod daemon;
pub mod dispatch;
pub mod event_loop;
pub mod exec;
mod health;
mod telemetry;

pub use accounts::{AccountResolver, SystemAccounts};
pub use bootstrap::{BootstrapError, ConfigLoader, Daemon, SystemConfigLoader, bootstrap_with};
pub use buffer::OutputBuffer;
pub use daemon::{DaemonError, register_methods, run_daemon, run_daemon_with, run_iteration};
pub use dispatch::{CallError, Context, MethodCall, MethodHandler};
pub use event_loop::{EventLoop, WatchControl, WatchFlags};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
