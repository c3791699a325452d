//! Synchronous method invocation over D-Bus.

use std::time::Duration;

use dbus::Message;
use dbus::arg::{ArgType, Iter};
use dbus::blocking::Connection;
use dbus::strings::{BusName, Interface, Member, Path};
use hatch_config::BusKind;

use crate::errors::CliError;

/// One method invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Well-known name of the service.
    pub service: String,
    /// Object path.
    pub object: String,
    /// Interface name.
    pub interface: String,
    /// Method name.
    pub method: String,
    /// String arguments, in order.
    pub arguments: Vec<String>,
    /// How long to wait for the reply.
    pub timeout: Duration,
}

/// Decoded reply: a result code and up to two strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallReply {
    /// Result code returned by the method.
    pub code: i32,
    /// Standard output, or the reply text.
    pub stdout: String,
    /// Standard error, when the reply carried one.
    pub stderr: String,
}

/// Performs calls on behalf of the runtime.
pub trait MethodCaller {
    /// Invokes `request` and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`CliError`] when the bus cannot be reached, the daemon
    /// answers with an error, or the reply cannot be decoded.
    fn call(&mut self, request: &CallRequest) -> Result<CallReply, CliError>;
}

/// Caller that opens a connection to the chosen bus per call.
#[derive(Debug, Clone, Copy)]
pub struct DbusCaller {
    bus: BusKind,
}

impl DbusCaller {
    /// Calls through `bus`.
    #[must_use]
    pub const fn new(bus: BusKind) -> Self {
        Self { bus }
    }
}

impl MethodCaller for DbusCaller {
    fn call(&mut self, request: &CallRequest) -> Result<CallReply, CliError> {
        let connection = match self.bus {
            BusKind::System => Connection::new_system(),
            BusKind::Session => Connection::new_session(),
        }
        .map_err(|error| CliError::Connect(error.to_string()))?;

        let mut message = Message::new_method_call(
            BusName::new(request.service.as_str()).map_err(CliError::Request)?,
            Path::new(request.object.as_str()).map_err(CliError::Request)?,
            Interface::new(request.interface.as_str()).map_err(CliError::Request)?,
            Member::new(request.method.as_str()).map_err(CliError::Request)?,
        )
        .map_err(CliError::Request)?;
        for argument in &request.arguments {
            message = message.append1(argument.as_str());
        }

        let reply = connection
            .channel()
            .send_with_reply_and_block(message, request.timeout)
            .map_err(|error| CliError::Remote {
                name: error.name().unwrap_or("org.freedesktop.DBus.Error.Failed").to_owned(),
                message: error.message().unwrap_or_default().to_owned(),
            })?;
        decode(&mut reply.iter_init())
    }
}

fn decode(iter: &mut Iter<'_>) -> Result<CallReply, CliError> {
    let code: i32 = iter
        .read()
        .map_err(|error| CliError::Decode(error.to_string()))?;
    let mut texts = Vec::new();
    while iter.arg_type() == ArgType::String {
        let text: &str = iter
            .read()
            .map_err(|error| CliError::Decode(error.to_string()))?;
        texts.push(text.to_owned());
    }
    let mut texts = texts.into_iter();
    Ok(CallReply {
        code,
        stdout: texts.next().unwrap_or_default(),
        stderr: texts.next().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn reply(build: impl FnOnce(Message) -> Message) -> Message {
        build(Message::new_signal("/t", "org.hatch.T", "R").expect("valid signal"))
    }

    #[rstest]
    fn text_replies_fill_stdout() {
        let message = reply(|message| message.append2(3_i32, "busy"));
        let decoded = decode(&mut message.iter_init()).expect("decodes");
        assert_eq!(
            decoded,
            CallReply {
                code: 3,
                stdout: "busy".to_owned(),
                stderr: String::new(),
            }
        );
    }

    #[rstest]
    fn output_replies_fill_both_streams() {
        let message = reply(|message| message.append3(0_i32, "out", "err"));
        let decoded = decode(&mut message.iter_init()).expect("decodes");
        assert_eq!(decoded.stdout, "out");
        assert_eq!(decoded.stderr, "err");
    }

    #[rstest]
    fn replies_without_a_code_are_rejected() {
        let message = reply(|message| message.append1("no code"));
        assert!(matches!(
            decode(&mut message.iter_init()),
            Err(CliError::Decode(_))
        ));
    }
}
