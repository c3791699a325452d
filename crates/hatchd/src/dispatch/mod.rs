//! Routing state and request dispatch for the daemon.
//!
//! A [`Context`] owns every exported [`Service`] together with its bus
//! connection. Methods are added with [`Context::register`]; creating the
//! first method of a service connects it and claims its well-known name.
//! Inbound messages flow from the [`EventLoop`] into the request pipeline,
//! which routes them and invokes the registered [`MethodHandler`].

mod errors;
mod handler;
mod pipeline;
mod request;
pub(crate) mod tree;

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::accounts::{AccountResolver, SystemAccounts};
use crate::bus::{BusConnector, BusTimeout, BusWatch, ConnectionToken, ReplyBody};
use crate::connection::{Sleeper, ThreadSleeper};
use crate::event_loop::{BusHost, BusTimeoutKey, BusWatchKey, EventLoop, WatchFlags};
use crate::health::{HealthReporter, StructuredHealthReporter};

pub use errors::{CallError, ConnectError, ERROR_PREFIX, RegistrationError, RouteError};
pub use handler::{DeferredReply, MethodCall, MethodHandler, output_body};
pub use pipeline::Outcome;
pub use request::RequestContext;
pub use tree::{Interface, MAX_CHILDREN, Method, Object, Route, Service};

use handler::send_reply;
use pipeline::Dispatch;
use tree::ensure_room;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Process-wide routing root.
pub struct Context {
    pub(crate) services: Vec<Service>,
    pub(crate) reconnect_timeout: Duration,
    pub(crate) connector: Box<dyn BusConnector>,
    pub(crate) sleeper: Box<dyn Sleeper>,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    accounts: Box<dyn AccountResolver>,
    security_lookup: bool,
    next_token: u64,
}

impl Context {
    /// Creates an empty context that opens connections through `connector`.
    ///
    /// `reconnect_timeout` of zero makes a lost connection fatal; otherwise
    /// it is the interval between reconnection attempts.
    #[must_use]
    pub fn new(connector: impl BusConnector + 'static, reconnect_timeout: Duration) -> Self {
        Self {
            services: Vec::new(),
            reconnect_timeout,
            connector: Box::new(connector),
            sleeper: Box::new(ThreadSleeper),
            reporter: Arc::new(StructuredHealthReporter::new()),
            accounts: Box::new(SystemAccounts),
            security_lookup: false,
            next_token: 0,
        }
    }

    /// Replaces the sleeper used between connection attempts.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Replaces the uid to account resolver.
    #[must_use]
    pub fn with_accounts(mut self, accounts: impl AccountResolver + 'static) -> Self {
        self.accounts = Box::new(accounts);
        self
    }

    /// Replaces the lifecycle reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Enables per-request security label lookup.
    #[must_use]
    pub fn with_security_context_lookup(mut self, enabled: bool) -> Self {
        self.security_lookup = enabled;
        self
    }

    /// Current reconnect interval.
    #[must_use]
    pub fn reconnect_timeout(&self) -> Duration {
        self.reconnect_timeout
    }

    /// Services in registration order.
    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Looks up a service by name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.name == name)
    }

    pub(crate) fn service_index(&self, name: &str) -> Option<usize> {
        self.services.iter().position(|service| service.name == name)
    }

    pub(crate) fn index_of_token(&self, token: ConnectionToken) -> Option<usize> {
        self.services
            .iter()
            .position(|service| service.token() == Some(token))
    }

    pub(crate) fn allocate_token(&mut self) -> ConnectionToken {
        self.next_token += 1;
        ConnectionToken::new(self.next_token)
    }

    /// Adds or replaces a method, creating its ancestors as needed.
    ///
    /// A new service is connected before anything is recorded; if that
    /// fails, the context is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Connect`] when a new service cannot
    /// claim its bus name.
    #[expect(clippy::too_many_arguments, reason = "one argument per routing level")]
    pub fn register(
        &mut self,
        events: &mut EventLoop<Self>,
        service: &str,
        object: &str,
        interface: &str,
        method: &str,
        arity: usize,
        handler: Option<Rc<dyn MethodHandler>>,
    ) -> Result<(), RegistrationError> {
        let index = match self.service_index(service) {
            Some(index) => index,
            None => {
                ensure_room("service", "context", self.services.len());
                let link = self.open_link(events, service).map_err(|source| {
                    RegistrationError::Connect {
                        service: service.to_owned(),
                        method: method.to_owned(),
                        source,
                    }
                })?;
                self.services.push(Service::new(service, link));
                self.services.len() - 1
            }
        };
        self.services[index].upsert(object, interface, method, arity, handler);
        tracing::debug!(
            target: DISPATCH_TARGET,
            service,
            object,
            interface,
            method,
            arity,
            "method registered"
        );
        Ok(())
    }

    /// Removes a method. Missing entries are ignored. A service left without
    /// objects is disconnected, its name released, and dropped.
    pub fn unregister(
        &mut self,
        events: &mut EventLoop<Self>,
        service: &str,
        object: &str,
        interface: &str,
        method: &str,
    ) {
        let Some(index) = self.service_index(service) else {
            return;
        };
        if !self.services[index].remove(object, interface, method) {
            return;
        }
        tracing::debug!(
            target: DISPATCH_TARGET,
            service,
            object,
            interface,
            method,
            "method unregistered"
        );
        if self.services[index].objects.is_empty() {
            self.disconnect_index(events, index);
            self.services.remove(index);
        }
    }

    /// Routes a call that arrived on `connection`.
    ///
    /// The service is identified by the connection rather than by
    /// `destination`, so calls addressed to the connection's unique name
    /// route the same way.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::NotOurs`] for a foreign connection and
    /// [`RouteError::Call`] for every other failure.
    pub fn find_method(
        &self,
        connection: ConnectionToken,
        destination: &str,
        path: &str,
        interface: Option<&str>,
        member: &str,
    ) -> Result<Route<'_>, RouteError> {
        let index = self.index_of_token(connection).ok_or(RouteError::NotOurs)?;
        let service = &self.services[index];
        tracing::trace!(
            target: DISPATCH_TARGET,
            service = %service.name,
            destination,
            path,
            member,
            "routing call"
        );
        Ok(service.route(path, interface, member)?)
    }

    /// Drains and processes every queued message on every connection, then
    /// flushes their output.
    pub fn dispatch_pending(&mut self, events: &mut EventLoop<Self>) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        for index in 0..self.services.len() {
            outcomes.extend(self.dispatch_connection(events, index));
        }
        outcomes
    }

    fn dispatch_connection(&mut self, events: &mut EventLoop<Self>, index: usize) -> Vec<Outcome> {
        let Self {
            services,
            accounts,
            security_lookup,
            ..
        } = self;
        let Some(service) = services.get_mut(index) else {
            return Vec::new();
        };
        let Some(link) = service.link.as_mut() else {
            return Vec::new();
        };
        let mut outcomes = Vec::new();
        if link.filter_attached {
            let mut dispatch = Dispatch {
                service: &service.name,
                objects: &service.objects,
                token: link.token,
                connection: &mut *link.connection,
                accounts: &**accounts,
                security_lookup: *security_lookup,
                events,
            };
            while let Some(message) = dispatch.connection.pop_message() {
                outcomes.push(dispatch.process(&message));
            }
        }
        link.connection.flush();
        outcomes
    }

    /// Sends a reply owed from an earlier call. Returns `false` when the
    /// caller's connection has since gone away.
    pub fn complete(&mut self, reply: DeferredReply, body: ReplyBody, also_signal: bool) -> bool {
        let link = self
            .services
            .iter_mut()
            .filter(|service| service.name == reply.service)
            .find_map(|service| service.link.as_mut())
            .filter(|link| link.token == reply.token);
        let Some(link) = link else {
            tracing::warn!(
                target: DISPATCH_TARGET,
                service = %reply.service,
                serial = reply.call.serial,
                "dropping reply for a connection that has gone away"
            );
            return false;
        };
        send_reply(
            &mut *link.connection,
            &reply.call,
            &reply.interface,
            body,
            also_signal,
        );
        link.connection.flush();
        true
    }
}

impl BusHost for Context {
    fn bus_watch(&self, key: BusWatchKey) -> Option<BusWatch> {
        let index = self.index_of_token(key.connection)?;
        let link = self.services[index].link.as_ref()?;
        link.connection
            .watches()
            .into_iter()
            .find(|watch| watch.id == key.watch)
    }

    fn bus_timeout(&self, key: BusTimeoutKey) -> Option<BusTimeout> {
        let index = self.index_of_token(key.connection)?;
        let link = self.services[index].link.as_ref()?;
        link.connection
            .timeouts()
            .into_iter()
            .find(|timeout| timeout.id == key.timeout)
    }

    fn handle_bus_watch(&mut self, events: &mut EventLoop<Self>, key: BusWatchKey, flags: WatchFlags) {
        let Some(index) = self.index_of_token(key.connection) else {
            return;
        };
        if let Some(link) = self.services[index].link.as_mut() {
            link.connection.handle_watch(key.watch, flags);
        }
        self.dispatch_connection(events, index);
    }

    fn handle_bus_timeout(&mut self, _events: &mut EventLoop<Self>, key: BusTimeoutKey) {
        let Some(index) = self.index_of_token(key.connection) else {
            return;
        };
        if let Some(link) = self.services[index].link.as_mut() {
            link.connection.handle_timeout(key.timeout);
        }
    }

    fn wait_bound(&self) -> Option<Duration> {
        self.reconcile_interval()
    }
}
