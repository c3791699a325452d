//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::sync::Mutex;
use std::time::Duration;

use hatch_config::Config;

use crate::bootstrap::BootstrapError;
use crate::bus::BusError;
use crate::dispatch::ConnectError;
use crate::health::HealthReporter;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ConnectAttemptFailed { service: String, attempt: u32 },
    ServiceBound(String),
    BindFailed(String),
    ServiceReleased(String),
    Reconnecting(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn connect_attempt_failed(&self, service: &str, attempt: u32, _error: &BusError, _delay: Duration) {
        self.record(HealthEvent::ConnectAttemptFailed {
            service: service.to_owned(),
            attempt,
        });
    }

    fn service_bound(&self, service: &str) {
        self.record(HealthEvent::ServiceBound(service.to_owned()));
    }

    fn bind_failed(&self, error: &ConnectError) {
        self.record(HealthEvent::BindFailed(error.to_string()));
    }

    fn service_released(&self, service: &str) {
        self.record(HealthEvent::ServiceReleased(service.to_owned()));
    }

    fn reconnecting(&self, service: &str) {
        self.record(HealthEvent::Reconnecting(service.to_owned()));
    }
}
