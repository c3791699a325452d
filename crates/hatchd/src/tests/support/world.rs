//! Scenario world shared by the behaviour suites.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, bootstrap_with};
use crate::bus::Outgoing;
use crate::dispatch::{CallError, Context, MethodCall, MethodHandler, Outcome, RegistrationError};
use crate::event_loop::EventLoop;

use super::accounts::FakeAccounts;
use super::bus::{FakeBus, method_call};
use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::reporter::RecordingHealthReporter;
use super::sleeper::RecordingSleeper;

/// Caller uid known to the fake account table.
pub const ALICE_UID: u32 = 1000;

/// What a recording handler saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub service: String,
    pub object: String,
    pub path: String,
    pub interface: String,
    pub method: String,
    pub user: String,
    pub uid: u32,
    pub args: Vec<String>,
}

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    pub bus: FakeBus,
    pub sleeper: RecordingSleeper,
    pub reporter: Arc<RecordingHealthReporter>,
    pub context: Context,
    pub events: EventLoop<Context>,
    pub calls: Rc<RefCell<Vec<RecordedCall>>>,
    pub registration: Option<Result<(), RegistrationError>>,
    pub outcomes: Vec<Outcome>,
    loader: Box<dyn ConfigLoader>,
    daemon: Option<Daemon>,
    bootstrap_error: Option<BootstrapError>,
}

impl TestWorld {
    /// Builds a world whose context reconnects every 30 seconds.
    #[must_use]
    pub fn new() -> Self {
        let bus = FakeBus::default();
        let sleeper = RecordingSleeper::default();
        let reporter = Arc::new(RecordingHealthReporter::default());
        let context = Context::new(bus.connector(), Duration::from_secs(30))
            .with_sleeper(sleeper.clone())
            .with_accounts(FakeAccounts::default().with(0, "root").with(ALICE_UID, "alice"))
            .with_reporter(reporter.clone());
        Self {
            bus,
            sleeper,
            reporter,
            context,
            events: EventLoop::new(),
            calls: Rc::default(),
            registration: None,
            outcomes: Vec::new(),
            loader: Box::new(TestConfigLoader),
            daemon: None,
            bootstrap_error: None,
        }
    }

    /// Handler that records each call and replies `(0, "ok")`.
    #[must_use]
    pub fn recording_handler(&self) -> Rc<dyn MethodHandler> {
        let calls = Rc::clone(&self.calls);
        Rc::new(move |call: &mut MethodCall<'_>| {
            calls.borrow_mut().push(RecordedCall {
                service: call.service().to_owned(),
                object: call.object().to_owned(),
                path: call.path().to_owned(),
                interface: call.interface().to_owned(),
                method: call.method().to_owned(),
                user: call.user().to_owned(),
                uid: call.uid(),
                args: call.args().to_vec(),
            });
            call.reply_text(0, "ok", false);
        })
    }

    /// Registers a recording method and keeps the result.
    pub fn register(&mut self, service: &str, object: &str, interface: &str, method: &str, arity: usize) {
        let handler = self.recording_handler();
        self.register_handler(service, object, interface, method, arity, handler);
    }

    /// Registers `handler` and keeps the result.
    pub fn register_handler(
        &mut self,
        service: &str,
        object: &str,
        interface: &str,
        method: &str,
        arity: usize,
        handler: Rc<dyn MethodHandler>,
    ) {
        let result = self.context.register(
            &mut self.events,
            service,
            object,
            interface,
            method,
            arity,
            Some(handler),
        );
        self.registration = Some(result);
    }

    /// Registers a method without a handler.
    pub fn register_unimplemented(&mut self, service: &str, object: &str, interface: &str, method: &str) {
        let result =
            self.context
                .register(&mut self.events, service, object, interface, method, 0, None);
        self.registration = Some(result);
    }

    pub fn unregister(&mut self, service: &str, object: &str, interface: &str, method: &str) {
        self.context
            .unregister(&mut self.events, service, object, interface, method);
    }

    /// Delivers a call from `sender` and drains every connection.
    pub fn call(
        &mut self,
        sender: Option<&str>,
        service: &str,
        path: &str,
        interface: Option<&str>,
        member: &str,
        args: &[&str],
    ) {
        self.bus
            .deliver(service, method_call(sender, service, path, interface, member, args));
        self.drain();
    }

    /// Processes every queued message.
    pub fn drain(&mut self) {
        let outcomes = self.context.dispatch_pending(&mut self.events);
        self.outcomes.extend(outcomes);
    }

    /// The error carried by the last rejected call.
    #[must_use]
    pub fn last_rejection(&self) -> Option<&CallError> {
        self.outcomes.iter().rev().find_map(|outcome| match outcome {
            Outcome::Rejected(error) => Some(error),
            _ => None,
        })
    }

    /// The last error reply sent for `service`, as `(name, text)`.
    #[must_use]
    pub fn last_error_reply(&self, service: &str) -> Option<(String, String)> {
        self.bus
            .sent_by(service)
            .into_iter()
            .rev()
            .find_map(|message| match message {
                Outgoing::Error { name, text, .. } => Some((name, text)),
                _ => None,
            })
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.daemon.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        match bootstrap_with(&*self.loader, self.reporter.clone()) {
            Ok(daemon) => self.daemon = Some(daemon),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    #[must_use]
    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    #[must_use]
    pub fn daemon_started(&self) -> bool {
        self.daemon.is_some()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture entry point for BDD steps.
#[must_use]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

