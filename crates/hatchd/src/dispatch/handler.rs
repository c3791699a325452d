//! Handler seam and the reply interface handed to handlers.

use super::{Context, DISPATCH_TARGET};
use super::errors::CallError;
use super::request::RequestContext;
use super::tree::Object;
use crate::buffer::OutputBuffer;
use crate::bus::{BusConnection, CallHeader, ConnectionToken, Outgoing, ReplyBody};
use crate::event_loop::EventLoop;

/// Implements a method. Handlers carry whatever state they need.
pub trait MethodHandler {
    /// Handles one authorised, validated call. The handler must reply, either
    /// right away or later through [`MethodCall::defer`].
    fn handle(&self, call: &mut MethodCall<'_>);
}

impl<F> MethodHandler for F
where
    F: Fn(&mut MethodCall<'_>),
{
    fn handle(&self, call: &mut MethodCall<'_>) {
        self(call);
    }
}

/// Everything a handler knows about the call it is answering.
pub struct MethodCall<'a> {
    pub(crate) service: &'a str,
    pub(crate) object: &'a Object,
    pub(crate) interface: &'a str,
    pub(crate) method: &'a str,
    pub(crate) user: &'a str,
    pub(crate) uid: u32,
    pub(crate) header: &'a CallHeader,
    pub(crate) request: &'a RequestContext,
    pub(crate) token: ConnectionToken,
    pub(crate) connection: &'a mut dyn BusConnection,
    pub(crate) events: &'a mut EventLoop<Context>,
}

impl MethodCall<'_> {
    /// Service name the call arrived on.
    #[must_use]
    pub fn service(&self) -> &str {
        self.service
    }

    /// Pattern of the object that matched.
    #[must_use]
    pub fn object(&self) -> &str {
        self.object.pattern()
    }

    /// The matched object node.
    #[must_use]
    pub fn object_node(&self) -> &Object {
        self.object
    }

    /// Concrete path the caller addressed.
    #[must_use]
    pub fn path(&self) -> &str {
        self.header.path.as_deref().unwrap_or_default()
    }

    /// Interface the call was routed to.
    #[must_use]
    pub fn interface(&self) -> &str {
        self.interface
    }

    /// Method name.
    #[must_use]
    pub fn method(&self) -> &str {
        self.method
    }

    /// Caller's account name.
    #[must_use]
    pub fn user(&self) -> &str {
        self.user
    }

    /// Caller's uid.
    #[must_use]
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// String arguments in call order.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.request.args()
    }

    /// Parsed request.
    #[must_use]
    pub fn request(&self) -> &RequestContext {
        self.request
    }

    /// Loop to register watches and child processes with.
    pub fn events(&mut self) -> &mut EventLoop<Context> {
        self.events
    }

    /// Replies `(code, text)`.
    pub fn reply_text(&mut self, code: i32, text: &str, also_signal: bool) {
        let body = ReplyBody::Text {
            code,
            text: text.to_owned(),
        };
        send_reply(self.connection, self.header, self.interface, body, also_signal);
    }

    /// Replies `(code, stdout, stderr)`.
    pub fn reply_success(
        &mut self,
        code: i32,
        stdout: &OutputBuffer,
        stderr: &OutputBuffer,
        also_signal: bool,
    ) {
        let body = output_body(code, stdout, stderr);
        send_reply(self.connection, self.header, self.interface, body, also_signal);
    }

    /// Replies with a single string.
    pub fn reply_plain(&mut self, text: String) {
        send_reply(
            self.connection,
            self.header,
            self.interface,
            ReplyBody::Plain(text),
            false,
        );
    }

    /// Replies with an error.
    pub fn reply_error(&mut self, error: &CallError) {
        send_error(self.connection, self.header, error);
    }

    /// Captures what is needed to reply after this call has returned.
    #[must_use]
    pub fn defer(&self) -> DeferredReply {
        DeferredReply {
            service: self.service.to_owned(),
            token: self.token,
            interface: self.interface.to_owned(),
            call: self.header.clone(),
        }
    }
}

/// A reply owed to a caller, completed through [`Context::complete`].
#[derive(Debug, Clone)]
pub struct DeferredReply {
    pub(crate) service: String,
    pub(crate) token: ConnectionToken,
    pub(crate) interface: String,
    pub(crate) call: CallHeader,
}

impl DeferredReply {
    /// Service the call arrived on.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

/// Builds an output reply body.
///
/// Aborts when `stdout` holds data not NUL-terminated at its logical end,
/// since the buffer can no longer be trusted.
#[must_use]
pub fn output_body(code: i32, stdout: &OutputBuffer, stderr: &OutputBuffer) -> ReplyBody {
    if !stdout.is_empty() && !stdout.is_nul_terminated() {
        tracing::error!(
            target: DISPATCH_TARGET,
            len = stdout.len(),
            "output buffer is not terminated"
        );
        std::process::abort();
    }
    ReplyBody::Output {
        code,
        stdout: stdout.to_text(),
        stderr: stderr.to_text(),
    }
}

pub(crate) fn send_reply(
    connection: &mut dyn BusConnection,
    call: &CallHeader,
    interface: &str,
    body: ReplyBody,
    also_signal: bool,
) {
    let mirror = (also_signal && call.sender.is_some()).then(|| Outgoing::Signal {
        call: call.clone(),
        interface: interface.to_owned(),
        body: body.clone(),
    });
    queue(
        connection,
        Outgoing::Return {
            call: call.clone(),
            body,
        },
    );
    if let Some(signal) = mirror {
        queue(connection, signal);
    }
}

pub(crate) fn send_error(connection: &mut dyn BusConnection, call: &CallHeader, error: &CallError) {
    tracing::debug!(
        target: DISPATCH_TARGET,
        error = error.kind(),
        detail = %error,
        serial = call.serial,
        "rejecting call"
    );
    queue(
        connection,
        Outgoing::Error {
            call: call.clone(),
            name: error.error_name(),
            text: error.to_string(),
        },
    );
}

fn queue(connection: &mut dyn BusConnection, message: Outgoing) {
    if let Err(error) = connection.send(message) {
        tracing::warn!(
            target: DISPATCH_TARGET,
            error = %error,
            "failed to queue reply"
        );
    }
}
