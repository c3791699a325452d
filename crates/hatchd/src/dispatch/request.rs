//! Per-message request state.

use crate::bus::{BusArg, IncomingMessage, MessageKind};

/// Transient view of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    result: i32,
    args: Vec<String>,
    security_label: Option<String>,
}

impl RequestContext {
    /// Parses `message`.
    ///
    /// The result is the leading `int32` of a reply message and `-1`
    /// otherwise. Every string argument is collected in order; other
    /// argument types are skipped.
    #[must_use]
    pub fn from_message(message: &IncomingMessage) -> Self {
        let result = match (message.kind, message.args.first()) {
            (MessageKind::MethodReturn, Some(BusArg::Int32(value))) => *value,
            _ => -1,
        };
        let args = message
            .args
            .iter()
            .filter_map(|arg| match arg {
                BusArg::Str(text) => Some(text.clone()),
                _ => None,
            })
            .collect();
        Self {
            result,
            args,
            security_label: None,
        }
    }

    /// Result code carried by a reply, `-1` otherwise.
    #[must_use]
    pub fn result(&self) -> i32 {
        self.result
    }

    /// String arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Cached security label of the sender.
    #[must_use]
    pub fn security_label(&self) -> Option<&str> {
        self.security_label.as_deref()
    }

    pub(crate) fn set_security_label(&mut self, label: String) {
        self.security_label = Some(label);
    }

    /// Whether any argument contains a carriage return or line feed.
    #[must_use]
    pub fn has_line_breaks(&self) -> bool {
        self.args
            .iter()
            .any(|arg| arg.contains(['\r', '\n']))
    }
}
