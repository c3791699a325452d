//! Error types for routing, registration and request handling.
//!
//! [`CallError`] values are never surfaced to the daemon: the pipeline turns
//! each one into an error reply named `org.hatch.Error.<Kind>` whose detail
//! text is the error's display form.

use thiserror::Error;

use crate::bus::{BusError, NameReply};

/// Prefix shared by every error name sent back to callers.
pub const ERROR_PREFIX: &str = "org.hatch.Error.";

/// Failures reported to a caller as an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// No object pattern matched the called path.
    #[error("{path}")]
    NoObject {
        /// Called object path.
        path: String,
    },
    /// The interface is unknown, or could not be guessed unambiguously.
    #[error("{interface}")]
    NoInterface {
        /// Called interface, empty when the call omitted it.
        interface: String,
    },
    /// The interface has no method of that name.
    #[error("{method}")]
    NoMethod {
        /// Called member.
        method: String,
    },
    /// The method is registered without a handler.
    #[error("{method}")]
    UnimplementedMethod {
        /// Called member.
        method: String,
    },
    /// The message carried no sender address.
    #[error("unknown sender")]
    UnknownSender,
    /// The sender's uid could not be resolved to a local account.
    #[error("UID={}", .uid.map_or_else(|| "unknown".to_owned(), |uid| uid.to_string()))]
    UnknownUser {
        /// Uid reported by the bus, when it answered at all.
        uid: Option<u32>,
    },
    /// The arguments are not acceptable.
    #[error("{detail}")]
    InvalidCall {
        /// What was wrong.
        detail: String,
    },
    /// The caller is not on the method's allow list.
    #[error("{user} is not permitted to call this method")]
    Acl {
        /// Account name of the caller.
        user: String,
    },
    /// The helper program could not be started.
    #[error("{detail}")]
    Exec {
        /// Why the helper failed to start.
        detail: String,
    },
}

impl CallError {
    /// Arguments containing a carriage return or line feed.
    #[must_use]
    pub fn invalid_invocation() -> Self {
        Self::InvalidCall {
            detail: "invalid invocation".to_owned(),
        }
    }

    /// Argument count differs from the method's arity.
    #[must_use]
    pub fn wrong_argument_count(expected: usize, actual: usize) -> Self {
        Self::InvalidCall {
            detail: format!(
                "wrong number of arguments: expected {expected}, called with {actual}"
            ),
        }
    }

    /// Short kind name used in the error name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoObject { .. } => "NoObject",
            Self::NoInterface { .. } => "NoInterface",
            Self::NoMethod { .. } => "NoMethod",
            Self::UnimplementedMethod { .. } => "UnimplementedMethod",
            Self::UnknownSender => "UnknownSender",
            Self::UnknownUser { .. } => "UnknownUser",
            Self::InvalidCall { .. } => "InvalidCall",
            Self::Acl { .. } => "ACL",
            Self::Exec { .. } => "Exec",
        }
    }

    /// Fully qualified error name, e.g. `org.hatch.Error.NoObject`.
    #[must_use]
    pub fn error_name(&self) -> String {
        format!("{ERROR_PREFIX}{}", self.kind())
    }
}

/// Routing failures from [`crate::Context::find_method`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The connection does not belong to any registered service; the
    /// message is left for other consumers.
    #[error("connection belongs to no registered service")]
    NotOurs,
    /// Reported to the caller.
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Failures while bringing a service onto the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The name is owned by another connection.
    #[error("bus name {service} is unavailable ({reply:?})")]
    NameUnavailable {
        /// Requested well-known name.
        service: String,
        /// Reply from the bus.
        reply: NameReply,
    },
    /// The name request itself failed.
    #[error("failed to request bus name {service}: {source}")]
    RequestName {
        /// Requested well-known name.
        service: String,
        /// Underlying bus failure.
        #[source]
        source: BusError,
    },
    /// No service with that name is registered.
    #[error("service {service} is not registered")]
    UnknownService {
        /// Requested well-known name.
        service: String,
    },
}

/// Failures while registering a method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The new service could not be connected; nothing was registered.
    #[error("failed to register {method} on {service}: {source}")]
    Connect {
        /// Service being created.
        service: String,
        /// Method being registered.
        method: String,
        /// Connection failure.
        #[source]
        source: ConnectError,
    },
}
