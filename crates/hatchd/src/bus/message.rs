use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Message types carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A request to invoke a method.
    MethodCall,
    /// A successful reply.
    MethodReturn,
    /// An error reply.
    Error,
    /// A broadcast or directed signal.
    Signal,
}

/// One decoded message argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusArg {
    /// A string argument.
    Str(String),
    /// A 32-bit signed integer argument.
    Int32(i32),
    /// Any other argument type; only its position is kept.
    Other,
}

/// Backend handle for the wire message a header was decoded from.
///
/// Backends stash their native message here so replies can be built from
/// it; fakes leave it empty.
#[derive(Clone, Default)]
pub struct MessageOrigin(Option<Rc<dyn Any>>);

impl MessageOrigin {
    /// Wraps a backend message.
    #[must_use]
    pub fn new<T: Any>(message: T) -> Self {
        Self(Some(Rc::new(message)))
    }

    /// Borrows the backend message when it has type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|message| message.downcast_ref::<T>())
    }
}

impl fmt::Debug for MessageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("MessageOrigin(..)"),
            None => f.write_str("MessageOrigin(None)"),
        }
    }
}

/// Header fields of an inbound message.
#[derive(Debug, Clone, Default)]
pub struct CallHeader {
    /// Serial assigned by the sender.
    pub serial: u32,
    /// Unique bus name of the sender.
    pub sender: Option<String>,
    /// Bus name the message was addressed to.
    pub destination: Option<String>,
    /// Object path.
    pub path: Option<String>,
    /// Interface name.
    pub interface: Option<String>,
    /// Method or signal name.
    pub member: Option<String>,
    /// Native message, when the backend keeps one.
    pub origin: MessageOrigin,
}

/// A message taken from a connection's inbound queue.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Message type.
    pub kind: MessageKind,
    /// Header fields.
    pub header: CallHeader,
    /// Decoded arguments in wire order.
    pub args: Vec<BusArg>,
}

/// Payload of a reply or mirrored signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// `(int32 result, string text)`.
    Text {
        /// Result code.
        code: i32,
        /// Message text.
        text: String,
    },
    /// `(int32 result, string stdout, string stderr)`.
    Output {
        /// Result code.
        code: i32,
        /// Collected standard output.
        stdout: String,
        /// Collected standard error.
        stderr: String,
    },
    /// A single string, used for introspection data.
    Plain(String),
}

/// An outbound message, expressed relative to the call it answers.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// Method return for `call`.
    Return {
        /// Call being answered.
        call: CallHeader,
        /// Reply payload.
        body: ReplyBody,
    },
    /// Error reply for `call`.
    Error {
        /// Call being answered.
        call: CallHeader,
        /// Fully qualified error name.
        name: String,
        /// Human-readable detail.
        text: String,
    },
    /// Signal mirroring a reply, addressed to the caller with the call's
    /// serial as its reply serial.
    Signal {
        /// Call being mirrored.
        call: CallHeader,
        /// Interface to emit the signal on.
        interface: String,
        /// Reply payload.
        body: ReplyBody,
    },
}
