//! Daemon runtime: bootstrap, method registration and the main loop.

use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use hatch_config::{CommandLineError, MethodTable, MethodTableError};
use nix::errno::Errno;
use thiserror::Error;

use crate::bootstrap::{BootstrapError, ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::bus::system::SystemBusConnector;
use crate::dispatch::{Context, RegistrationError};
use crate::event_loop::EventLoop;
use crate::event_loop::signals::apply_signal_posture;
use crate::exec::{ExecHandler, INTROSPECT_METHOD, INTROSPECTABLE_INTERFACE, IntrospectHandler};
use crate::health::{HealthReporter, StructuredHealthReporter};

const DAEMON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::daemon");

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration or telemetry could not be prepared.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The signal posture could not be applied.
    #[error("failed to configure signal handling: {0}")]
    Signals(#[source] Errno),
    /// The method table could not be loaded.
    #[error(transparent)]
    Methods(#[from] MethodTableError),
    /// A helper command line could not be split.
    #[error("method {index}: {source}")]
    Helper {
        /// Zero-based position in the method table.
        index: usize,
        /// Parse failure.
        #[source]
        source: CommandLineError,
    },
    /// A service could not claim its bus name.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// Waiting for events failed.
    #[error("event loop failed: {0}")]
    Loop(#[source] Errno),
}

/// Runs the daemon with the production collaborators. Returns only on
/// failure.
///
/// # Errors
///
/// See [`DaemonError`].
pub fn run_daemon() -> Result<(), DaemonError> {
    run_daemon_with(&SystemConfigLoader, Arc::new(StructuredHealthReporter::new()))
}

/// Runs the daemon with an injected loader and reporter.
///
/// # Errors
///
/// See [`DaemonError`].
pub fn run_daemon_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<(), DaemonError> {
    let daemon = bootstrap_with(loader, reporter)?;
    let config = daemon.config();
    apply_signal_posture().map_err(DaemonError::Signals)?;

    let table = MethodTable::load(config.methods_path())?;
    let mut events = EventLoop::new();
    let mut context = Context::new(SystemBusConnector::new(config.bus()), config.reconnect_timeout())
        .with_reporter(daemon.reporter())
        .with_security_context_lookup(config.security_context_lookup());
    let registered = register_methods(&mut context, &mut events, &table)?;
    tracing::info!(
        target: DAEMON_TARGET,
        methods = registered,
        services = context.services().len(),
        "daemon ready"
    );

    loop {
        run_iteration(&mut context, &mut events)?;
    }
}

/// One turn of the main loop: wait and dispatch, answer queued calls, then
/// retry any service left without a connection.
///
/// # Errors
///
/// Returns [`DaemonError::Loop`] when waiting fails for a reason other than
/// an interrupted `poll(2)`.
pub fn run_iteration(context: &mut Context, events: &mut EventLoop<Context>) -> Result<(), DaemonError> {
    match events.iterate(context) {
        Ok(_) | Err(Errno::EINTR) => {}
        Err(errno) => return Err(DaemonError::Loop(errno)),
    }
    context.dispatch_pending(events);
    context.reconcile(events);
    Ok(())
}

/// Registers every method table entry, plus an introspection method on each
/// exported object. Returns the number of table entries registered.
///
/// # Errors
///
/// Returns [`DaemonError::Helper`] for a malformed helper and
/// [`DaemonError::Registration`] when a service cannot be bound.
pub fn register_methods(
    context: &mut Context,
    events: &mut EventLoop<Context>,
    table: &MethodTable,
) -> Result<usize, DaemonError> {
    let mut objects = BTreeSet::new();
    for (index, entry) in table.iter().enumerate() {
        let handler = ExecHandler::from_entry(entry)
            .map_err(|source| DaemonError::Helper { index, source })?;
        context.register(
            events,
            &entry.service,
            &entry.object,
            &entry.interface,
            &entry.method,
            entry.arguments as usize,
            Some(Rc::new(handler)),
        )?;
        objects.insert((entry.service.as_str(), entry.object.as_str()));
    }
    for (service, object) in objects {
        context.register(
            events,
            service,
            object,
            INTROSPECTABLE_INTERFACE,
            INTROSPECT_METHOD,
            0,
            Some(Rc::new(IntrospectHandler)),
        )?;
    }
    Ok(table.len())
}
