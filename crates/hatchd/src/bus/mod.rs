//! Message bus seam.
//!
//! The daemon core talks to the bus only through [`BusConnector`] and
//! [`BusConnection`]. The production backend lives in [`system`]; tests plug
//! in recording fakes.

mod message;
pub mod system;

use std::fmt;
use std::os::fd::RawFd;
use std::time::Duration;

use thiserror::Error;

use crate::event_loop::WatchFlags;

pub use message::{BusArg, CallHeader, IncomingMessage, MessageKind, MessageOrigin, Outgoing, ReplyBody};

/// Identifies one open connection for the lifetime of the process.
///
/// Tokens are never reused, so stale watch registrations from a closed
/// connection cannot alias a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionToken(u64);

impl ConnectionToken {
    /// Wraps a raw token value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw token value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Descriptor readiness requested by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusWatch {
    /// Connection-local watch id.
    pub id: u32,
    /// Descriptor to poll.
    pub fd: RawFd,
    /// Conditions of interest.
    pub flags: WatchFlags,
    /// Disabled watches are skipped when polling.
    pub enabled: bool,
}

/// Timer requested by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTimeout {
    /// Connection-local timeout id.
    pub id: u32,
    /// Interval after which the timeout fires.
    pub interval: Duration,
    /// Disabled timeouts never fire.
    pub enabled: bool,
}

/// Outcome of a well-known name request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameReply {
    /// The connection now owns the name.
    PrimaryOwner,
    /// The request was queued behind the current owner.
    InQueue,
    /// Another connection owns the name and queueing was refused.
    Exists,
    /// The connection already owned the name.
    AlreadyOwner,
}

impl NameReply {
    /// Maps the numeric `RequestName` reply code.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::PrimaryOwner),
            2 => Some(Self::InQueue),
            3 => Some(Self::Exists),
            4 => Some(Self::AlreadyOwner),
            _ => None,
        }
    }
}

/// Errors reported by a bus backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// No connection to the bus could be opened.
    #[error("failed to connect to the message bus: {0}")]
    Connect(String),
    /// The connection is no longer usable.
    #[error("connection to the message bus was lost")]
    Disconnected,
    /// A call to the bus daemon returned an error.
    #[error("bus call {method} failed: {message}")]
    Call {
        /// Bus method that failed.
        method: &'static str,
        /// Error text reported by the bus.
        message: String,
    },
    /// A message could not be built or queued.
    #[error("failed to send message: {0}")]
    Send(String),
}

impl BusError {
    pub(crate) fn call(method: &'static str, message: impl Into<String>) -> Self {
        Self::Call {
            method,
            message: message.into(),
        }
    }
}

/// Opens connections to the bus.
pub trait BusConnector {
    /// Opens a new private connection.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connect`] when the bus cannot be reached.
    fn open(&mut self) -> Result<Box<dyn BusConnection>, BusError>;
}

/// One private connection to the bus.
pub trait BusConnection {
    /// Whether the connection is still usable.
    fn is_connected(&self) -> bool;

    /// Chooses whether losing the connection terminates the process.
    fn set_exit_on_disconnect(&mut self, exit: bool);

    /// Requests `name` without queueing behind an existing owner.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the bus call fails.
    fn request_name(&mut self, name: &str) -> Result<NameReply, BusError>;

    /// Releases `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the bus call fails.
    fn release_name(&mut self, name: &str) -> Result<(), BusError>;

    /// Descriptor watches the connection needs serviced.
    fn watches(&self) -> Vec<BusWatch>;

    /// Timers the connection needs serviced.
    fn timeouts(&self) -> Vec<BusTimeout>;

    /// Performs I/O for watch `id` after it became ready with `flags`.
    fn handle_watch(&mut self, id: u32, flags: WatchFlags);

    /// Runs the expiry action of timeout `id`.
    fn handle_timeout(&mut self, id: u32);

    /// Takes the next queued inbound message.
    fn pop_message(&mut self) -> Option<IncomingMessage>;

    /// Queues an outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Send`] when the message cannot be built or queued.
    fn send(&mut self, message: Outgoing) -> Result<(), BusError>;

    /// Writes queued outbound messages.
    fn flush(&mut self);

    /// Numeric uid of the process behind `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the bus cannot answer.
    fn unix_user(&mut self, sender: &str) -> Result<u32, BusError>;

    /// Security label of the process behind `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the bus cannot answer.
    fn security_context(&mut self, sender: &str) -> Result<String, BusError>;

    /// Closes the connection. Further calls are no-ops.
    fn close(&mut self);
}
