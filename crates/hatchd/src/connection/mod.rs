//! Bus connection lifecycle for exported services.
//!
//! Each service owns one private connection. Opening it blocks until the bus
//! answers, pacing retries with [`ReconnectBackoff`]. Once open, the
//! connection's disconnect policy is applied, dispatch is attached, the
//! well-known name is claimed exclusively, and the connection's watches and
//! timeouts are handed to the [`EventLoop`]. Teardown runs the same steps in
//! reverse.

mod backoff;

use std::time::Duration;

use crate::bus::{BusConnection, BusError, NameReply};
use crate::dispatch::tree::Link;
use crate::dispatch::{ConnectError, Context};
use crate::event_loop::{BusTimeoutKey, BusWatchKey, EventLoop};

pub use backoff::{
    FAST_RECONNECT_ATTEMPTS, FAST_RECONNECT_INTERVAL, ReconnectBackoff, Sleeper, ThreadSleeper,
};

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

impl Context {
    /// Opens a connection for `name`, retrying until the bus accepts one, and
    /// binds the name.
    pub(crate) fn open_link(
        &mut self,
        events: &mut EventLoop<Self>,
        name: &str,
    ) -> Result<Link, ConnectError> {
        let mut connection = self.open_connection(name);
        connection.set_exit_on_disconnect(self.reconnect_timeout.is_zero());
        let token = self.allocate_token();
        let mut link = Link {
            token,
            connection,
            filter_attached: true,
        };

        if let Err(error) = bind(&mut *link.connection, name) {
            self.reporter.bind_failed(&error);
            link.filter_attached = false;
            link.connection.close();
            return Err(error);
        }

        attach(events, &link);
        tracing::debug!(
            target: CONNECTION_TARGET,
            service = name,
            connection = %token,
            watches = link.connection.watches().len(),
            "connection attached"
        );
        self.reporter.service_bound(name);
        Ok(link)
    }

    fn open_connection(&mut self, name: &str) -> Box<dyn BusConnection> {
        let backoff = ReconnectBackoff::new(self.reconnect_timeout);
        let mut attempt = 0;
        loop {
            let error = match self.connector.open() {
                Ok(connection) if connection.is_connected() => return connection,
                Ok(mut connection) => {
                    connection.close();
                    BusError::Disconnected
                }
                Err(error) => error,
            };
            let delay = backoff.delay(attempt);
            self.reporter
                .connect_attempt_failed(name, attempt + 1, &error, delay);
            self.sleeper.sleep(delay);
            attempt = attempt.saturating_add(1);
        }
    }

    /// Connects a registered service that currently has no connection.
    ///
    /// Connected services are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::UnknownService`] for an unregistered name and
    /// the bind failure otherwise.
    pub fn connect(&mut self, events: &mut EventLoop<Self>, name: &str) -> Result<(), ConnectError> {
        let index = self
            .service_index(name)
            .ok_or_else(|| ConnectError::UnknownService {
                service: name.to_owned(),
            })?;
        if self.services[index].link.is_some() {
            return Ok(());
        }
        let link = self.open_link(events, name)?;
        self.services[index].link = Some(link);
        Ok(())
    }

    /// Tears down the connection of `name`. Repeated calls are no-ops.
    pub fn disconnect(&mut self, events: &mut EventLoop<Self>, name: &str) {
        if let Some(index) = self.service_index(name) {
            self.disconnect_index(events, index);
        }
    }

    pub(crate) fn disconnect_index(&mut self, events: &mut EventLoop<Self>, index: usize) {
        let Some(service) = self.services.get_mut(index) else {
            return;
        };
        let Some(mut link) = service.link.take() else {
            return;
        };
        events.detach_connection(link.token);
        link.filter_attached = false;
        if let Err(error) = link.connection.release_name(&service.name) {
            tracing::debug!(
                target: CONNECTION_TARGET,
                service = %service.name,
                error = %error,
                "failed to release bus name"
            );
        }
        link.connection.close();
        self.reporter.service_released(&service.name);
    }

    /// Reconnects every service whose connection is missing or lost.
    ///
    /// Returns the number of services that were reconnected.
    pub fn reconcile(&mut self, events: &mut EventLoop<Self>) -> usize {
        let mut reconnected = 0;
        for index in 0..self.services.len() {
            let healthy = self.services[index]
                .link
                .as_ref()
                .is_some_and(|link| link.connection.is_connected());
            if healthy {
                continue;
            }
            let name = self.services[index].name.clone();
            self.reporter.reconnecting(&name);
            self.disconnect_index(events, index);
            match self.open_link(events, &name) {
                Ok(link) => {
                    self.services[index].link = Some(link);
                    reconnected += 1;
                }
                Err(error) => tracing::warn!(
                    target: CONNECTION_TARGET,
                    service = %name,
                    error = %error,
                    "reconnection failed; retrying on the next pass"
                ),
            }
        }
        reconnected
    }

    /// How long the loop may sleep before [`Context::reconcile`] has work to
    /// retry, or `None` while every service holds a live connection.
    #[must_use]
    pub fn reconcile_interval(&self) -> Option<Duration> {
        let pending = self.services.iter().any(|service| {
            !service
                .link
                .as_ref()
                .is_some_and(|link| link.connection.is_connected())
        });
        pending.then(|| {
            if self.reconnect_timeout.is_zero() {
                FAST_RECONNECT_INTERVAL
            } else {
                self.reconnect_timeout
            }
        })
    }

    /// Changes the reconnect interval and re-applies the disconnect policy to
    /// every open connection. Zero makes a lost connection fatal.
    pub fn set_reconnect_timeout(&mut self, timeout: Duration) {
        self.reconnect_timeout = timeout;
        for link in self.services.iter_mut().filter_map(|service| service.link.as_mut()) {
            link.connection.set_exit_on_disconnect(timeout.is_zero());
        }
    }
}

fn bind(connection: &mut dyn BusConnection, name: &str) -> Result<(), ConnectError> {
    match connection.request_name(name) {
        Ok(NameReply::PrimaryOwner) => Ok(()),
        Ok(reply) => Err(ConnectError::NameUnavailable {
            service: name.to_owned(),
            reply,
        }),
        Err(source) => Err(ConnectError::RequestName {
            service: name.to_owned(),
            source,
        }),
    }
}

fn attach(events: &mut EventLoop<Context>, link: &Link) {
    for watch in link.connection.watches() {
        events.add_bus_watch(BusWatchKey {
            connection: link.token,
            watch: watch.id,
        });
    }
    for timeout in link.connection.timeouts() {
        events.add_bus_timeout(BusTimeoutKey {
            connection: link.token,
            timeout: timeout.id,
        });
    }
}
