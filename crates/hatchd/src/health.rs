//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use hatch_config::Config;

use crate::bootstrap::BootstrapError;
use crate::bus::BusError;
use crate::dispatch::ConnectError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after a connection attempt for `service` fails, before the
    /// retry pause.
    fn connect_attempt_failed(&self, service: &str, attempt: u32, error: &BusError, delay: Duration);

    /// Invoked once `service` owns its bus name.
    fn service_bound(&self, service: &str);

    /// Invoked when a fresh connection cannot claim its bus name.
    fn bind_failed(&self, error: &ConnectError);

    /// Invoked after the connection of `service` is torn down.
    fn service_released(&self, service: &str);

    /// Invoked before a lost connection is re-established.
    fn reconnecting(&self, service: &str);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn connect_attempt_failed(&self, service: &str, attempt: u32, error: &BusError, delay: Duration) {
        (**self).connect_attempt_failed(service, attempt, error, delay);
    }

    fn service_bound(&self, service: &str) {
        (**self).service_bound(service);
    }

    fn bind_failed(&self, error: &ConnectError) {
        (**self).bind_failed(error);
    }

    fn service_released(&self, service: &str) {
        (**self).service_released(service);
    }

    fn reconnecting(&self, service: &str) {
        (**self).reconnecting(service);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            bus = %config.bus(),
            reconnect_timeout = ?config.reconnect_timeout(),
            methods = %config.methods_path(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn connect_attempt_failed(&self, service: &str, attempt: u32, error: &BusError, delay: Duration) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "connect_attempt_failed",
            service,
            attempt,
            retry_in = ?delay,
            error = %error,
            "error connecting to the message bus"
        );
    }

    fn service_bound(&self, service: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_bound",
            service,
            "acquired well-known bus name"
        );
    }

    fn bind_failed(&self, error: &ConnectError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bind_failed",
            error = %error,
            "error acquiring well-known bus name"
        );
    }

    fn service_released(&self, service: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_released",
            service,
            "released bus connection"
        );
    }

    fn reconnecting(&self, service: &str) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "reconnecting",
            service,
            "connection lost; reconnecting"
        );
    }
}
