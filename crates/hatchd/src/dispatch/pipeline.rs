//! Per-message request pipeline.
//!
//! Exactly one outcome per inbound method call addressed to us: the handler
//! runs, or an error reply is sent. Checks short-circuit in this order:
//! sender, route, caller identity, line breaks, argument count.

use super::{Context, DISPATCH_TARGET};
use super::errors::CallError;
use super::handler::{MethodCall, send_error};
use super::request::RequestContext;
use super::tree::{Object, route};
use crate::accounts::AccountResolver;
use crate::bus::{BusConnection, ConnectionToken, IncomingMessage, MessageKind};
use crate::event_loop::EventLoop;

/// What the pipeline did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not a method call for us; left alone without a reply.
    Ignored,
    /// Answered with an error reply.
    Rejected(CallError),
    /// Passed to the method handler.
    Handled,
}

/// Borrowed state the pipeline needs for one connection.
pub(crate) struct Dispatch<'a> {
    pub(crate) service: &'a str,
    pub(crate) objects: &'a [Object],
    pub(crate) token: ConnectionToken,
    pub(crate) connection: &'a mut dyn BusConnection,
    pub(crate) accounts: &'a dyn AccountResolver,
    pub(crate) security_lookup: bool,
    pub(crate) events: &'a mut EventLoop<Context>,
}

impl Dispatch<'_> {
    pub(crate) fn process(&mut self, message: &IncomingMessage) -> Outcome {
        if message.kind != MessageKind::MethodCall {
            return Outcome::Ignored;
        }
        let header = &message.header;
        let (Some(_), Some(path), Some(member)) = (
            header.destination.as_deref(),
            header.path.as_deref(),
            header.member.as_deref(),
        ) else {
            return Outcome::Ignored;
        };

        let mut request = RequestContext::from_message(message);
        if self.security_lookup
            && let Some(sender) = header.sender.as_deref()
        {
            match self.connection.security_context(sender) {
                Ok(label) => request.set_security_label(label),
                Err(error) => tracing::debug!(
                    target: DISPATCH_TARGET,
                    sender,
                    error = %error,
                    "security label unavailable"
                ),
            }
        }

        match self.authorise(message, &request, path, member) {
            Ok(outcome) => outcome,
            Err(error) => {
                send_error(self.connection, header, &error);
                Outcome::Rejected(error)
            }
        }
    }

    fn authorise(
        &mut self,
        message: &IncomingMessage,
        request: &RequestContext,
        path: &str,
        member: &str,
    ) -> Result<Outcome, CallError> {
        let header = &message.header;
        let sender = header.sender.as_deref().ok_or(CallError::UnknownSender)?;
        let route = route(self.objects, path, header.interface.as_deref(), member)?;

        let uid = self
            .connection
            .unix_user(sender)
            .map_err(|error| {
                tracing::debug!(
                    target: DISPATCH_TARGET,
                    sender,
                    error = %error,
                    "caller uid unavailable"
                );
                CallError::UnknownUser { uid: None }
            })?;
        let user = self
            .accounts
            .account_name(uid)
            .ok_or(CallError::UnknownUser { uid: Some(uid) })?;

        if request.has_line_breaks() {
            return Err(CallError::invalid_invocation());
        }
        let arity = route.method.arity();
        if request.args().len() != arity {
            return Err(CallError::wrong_argument_count(arity, request.args().len()));
        }

        let Some(handler) = route.handler() else {
            return Err(CallError::UnimplementedMethod {
                method: member.to_owned(),
            });
        };
        tracing::info!(
            target: DISPATCH_TARGET,
            service = self.service,
            path,
            interface = route.interface.name(),
            method = member,
            user = %user,
            uid,
            "dispatching call"
        );
        let mut call = MethodCall {
            service: self.service,
            object: route.object,
            interface: route.interface.name(),
            method: member,
            user: &user,
            uid,
            header,
            request,
            token: self.token,
            connection: &mut *self.connection,
            events: &mut *self.events,
        };
        handler.handle(&mut call);
        Ok(Outcome::Handled)
    }
}
