//! `dbus`-crate backend for the bus seam.
//!
//! Each connection is a private libdbus channel polled through a single
//! descriptor watch. Bus daemon queries (`RequestName`, `GetConnectionUnixUser`
//! and friends) are issued as blocking calls.

use std::ffi::{CString, c_char, c_int};
use std::ptr;
use std::time::Duration;

use dbus::Message;
use dbus::arg::ArgType;
use dbus::channel::{BusType, Channel};
use dbus::message::MessageType;
use dbus::strings::{BusName, ErrorName};
use hatch_config::BusKind;
use libdbus_sys::DBusMessage;

use super::{
    BusArg, BusConnection, BusConnector, BusError, BusTimeout, BusWatch, CallHeader,
    IncomingMessage, MessageKind, MessageOrigin, NameReply, Outgoing, ReplyBody,
};
use crate::event_loop::WatchFlags;

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

const BUS_NAME: &str = "org.freedesktop.DBus";
const BUS_PATH: &str = "/org/freedesktop/DBus";
const BUS_INTERFACE: &str = "org.freedesktop.DBus";

/// `DBUS_NAME_FLAG_DO_NOT_QUEUE`.
const NAME_FLAG_DO_NOT_QUEUE: u32 = 4;

const BUS_CALL_TIMEOUT: Duration = Duration::from_secs(25);

const CHANNEL_WATCH: u32 = 0;

/// Serial stamped on a message only so it survives a marshalling round trip;
/// cleared again before sending so the connection assigns a real one.
const TRANSIT_SERIAL: u32 = 1;

unsafe extern "C" {
    // Exported by libdbus but not bound by `libdbus-sys`.
    fn dbus_message_set_reply_serial(message: *mut DBusMessage, reply_serial: u32) -> u32;
}

/// Opens private connections to the system or session bus.
#[derive(Debug, Clone, Copy)]
pub struct SystemBusConnector {
    bus: BusKind,
}

impl SystemBusConnector {
    /// Connector for `bus`.
    #[must_use]
    pub fn new(bus: BusKind) -> Self {
        Self { bus }
    }
}

impl BusConnector for SystemBusConnector {
    fn open(&mut self) -> Result<Box<dyn BusConnection>, BusError> {
        let bus_type = match self.bus {
            BusKind::System => BusType::System,
            BusKind::Session => BusType::Session,
        };
        let mut channel =
            Channel::get_private(bus_type).map_err(|error| BusError::Connect(error.to_string()))?;
        channel.set_watch_enabled(true);
        let mut connection = SystemConnection {
            channel: Some(channel),
            watches: Vec::new(),
            exit_on_disconnect: false,
        };
        connection.refresh_watches();
        Ok(Box::new(connection))
    }
}

struct SystemConnection {
    channel: Option<Channel>,
    // Snapshot of the channel's watches, taken after every operation that can
    // change them. Empty once the connection is lost or closed.
    watches: Vec<BusWatch>,
    exit_on_disconnect: bool,
}

impl SystemConnection {
    fn channel(&self) -> Result<&Channel, BusError> {
        self.channel.as_ref().ok_or(BusError::Disconnected)
    }

    fn call_bus(
        &self,
        method: &'static str,
        build: impl FnOnce(Message) -> Message,
    ) -> Result<Message, BusError> {
        let channel = self.channel()?;
        let call = Message::new_method_call(BUS_NAME, BUS_PATH, BUS_INTERFACE, method)
            .map_err(|error| BusError::call(method, error))?;
        channel
            .send_with_reply_and_block(build(call), BUS_CALL_TIMEOUT)
            .map_err(|error| BusError::call(method, error.to_string()))
    }

    fn refresh_watches(&mut self) {
        self.watches.clear();
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if !channel.is_connected() {
            return;
        }
        #[expect(
            deprecated,
            reason = "watch_fds reports every descriptor without unwrapping a missing one"
        )]
        let Ok(listed) = channel.watch_fds() else {
            return;
        };
        self.watches.extend(listed.into_iter().map(|watch| {
            let mut flags = WatchFlags::empty();
            if watch.read {
                flags |= WatchFlags::READABLE;
            }
            if watch.write {
                flags |= WatchFlags::WRITABLE;
            }
            BusWatch {
                id: CHANNEL_WATCH,
                fd: watch.fd,
                flags,
                enabled: !flags.is_empty(),
            }
        }));
        self.watches.truncate(1);
    }

    fn exit_if_lost(&self) {
        if self.exit_on_disconnect && !self.is_connected() {
            tracing::error!(
                target: CONNECTION_TARGET,
                "lost connection to the message bus; exiting"
            );
            std::process::exit(1);
        }
    }
}

impl BusConnection for SystemConnection {
    fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(Channel::is_connected)
    }

    fn set_exit_on_disconnect(&mut self, exit: bool) {
        self.exit_on_disconnect = exit;
    }

    fn request_name(&mut self, name: &str) -> Result<NameReply, BusError> {
        let reply = self.call_bus("RequestName", |call| {
            call.append2(name, NAME_FLAG_DO_NOT_QUEUE)
        })?;
        let code: u32 = reply
            .read1()
            .map_err(|error| BusError::call("RequestName", error.to_string()))?;
        NameReply::from_code(code)
            .ok_or_else(|| BusError::call("RequestName", format!("unexpected reply code {code}")))
    }

    fn release_name(&mut self, name: &str) -> Result<(), BusError> {
        self.call_bus("ReleaseName", |call| call.append1(name))
            .map(drop)
    }

    fn watches(&self) -> Vec<BusWatch> {
        self.watches.clone()
    }

    fn timeouts(&self) -> Vec<BusTimeout> {
        Vec::new()
    }

    fn handle_watch(&mut self, id: u32, flags: WatchFlags) {
        let Some(channel) = self.channel.as_ref() else {
            return;
        };
        if channel.read_write(Some(Duration::ZERO)).is_err() {
            tracing::warn!(
                target: CONNECTION_TARGET,
                watch = id,
                flags = ?flags,
                "bus connection reported an I/O failure"
            );
        }
        self.refresh_watches();
        self.exit_if_lost();
    }

    fn handle_timeout(&mut self, _id: u32) {}

    fn pop_message(&mut self) -> Option<IncomingMessage> {
        self.channel.as_ref()?.pop_message().map(decode)
    }

    fn send(&mut self, message: Outgoing) -> Result<(), BusError> {
        let native = encode(message)?;
        let sent = self
            .channel()?
            .send(native)
            .map(drop)
            .map_err(|()| BusError::Send("outbound queue rejected the message".to_owned()));
        self.refresh_watches();
        sent
    }

    fn flush(&mut self) {
        if let Some(channel) = self.channel.as_ref() {
            channel.flush();
        }
        self.refresh_watches();
        self.exit_if_lost();
    }

    fn unix_user(&mut self, sender: &str) -> Result<u32, BusError> {
        let reply = self.call_bus("GetConnectionUnixUser", |call| call.append1(sender))?;
        reply
            .read1()
            .map_err(|error| BusError::call("GetConnectionUnixUser", error.to_string()))
    }

    fn security_context(&mut self, sender: &str) -> Result<String, BusError> {
        let method = "GetConnectionSELinuxSecurityContext";
        let reply = self.call_bus(method, |call| call.append1(sender))?;
        let raw: Vec<u8> = reply
            .read1()
            .map_err(|error| BusError::call(method, error.to_string()))?;
        let label = raw.split(|byte| *byte == 0).next().unwrap_or_default();
        Ok(String::from_utf8_lossy(label).into_owned())
    }

    fn close(&mut self) {
        // Dropping a private channel closes the underlying connection.
        self.channel = None;
        self.watches.clear();
    }
}

fn decode(message: Message) -> IncomingMessage {
    let kind = match message.msg_type() {
        MessageType::MethodCall => MessageKind::MethodCall,
        MessageType::MethodReturn => MessageKind::MethodReturn,
        MessageType::Error => MessageKind::Error,
        MessageType::Signal => MessageKind::Signal,
    };
    let args = decode_args(&message);
    let header = CallHeader {
        serial: message.get_serial().unwrap_or_default(),
        sender: message.sender().map(|name| name.to_string()),
        destination: message.destination().map(|name| name.to_string()),
        path: message.path().map(|path| path.to_string()),
        interface: message.interface().map(|name| name.to_string()),
        member: message.member().map(|name| name.to_string()),
        origin: MessageOrigin::new(message),
    };
    IncomingMessage { kind, header, args }
}

fn decode_args(message: &Message) -> Vec<BusArg> {
    let mut args = Vec::new();
    let mut iter = message.iter_init();
    loop {
        let arg = match iter.arg_type() {
            ArgType::Invalid => break,
            ArgType::String => iter.get::<String>().map_or(BusArg::Other, BusArg::Str),
            ArgType::Int32 => iter.get::<i32>().map_or(BusArg::Other, BusArg::Int32),
            _ => BusArg::Other,
        };
        args.push(arg);
        if !iter.next() {
            break;
        }
    }
    args
}

fn encode(message: Outgoing) -> Result<Message, BusError> {
    match message {
        Outgoing::Return { call, body } => Ok(append_body(native(&call)?.method_return(), body)),
        Outgoing::Error { call, name, text } => {
            let name = ErrorName::new(name).map_err(BusError::Send)?;
            let text = CString::new(text).map_err(|error| BusError::Send(error.to_string()))?;
            Ok(native(&call)?.error(&name, &text))
        }
        Outgoing::Signal {
            call,
            interface,
            body,
        } => {
            let path = call.path.clone().ok_or_else(|| missing("path"))?;
            let member = call.member.clone().ok_or_else(|| missing("member"))?;
            let sender = call.sender.clone().ok_or_else(|| missing("sender"))?;
            let mut signal =
                Message::new_signal(path, interface, member).map_err(BusError::Send)?;
            signal.set_destination(Some(BusName::new(sender).map_err(BusError::Send)?));
            with_reply_serial(append_body(signal, body), call.serial)
        }
    }
}

fn native(call: &CallHeader) -> Result<&Message, BusError> {
    call.origin
        .downcast_ref::<Message>()
        .ok_or_else(|| BusError::Send("call was not received on this backend".to_owned()))
}

fn missing(field: &str) -> BusError {
    BusError::Send(format!("call has no {field} to mirror"))
}

/// Copies `message` with its reply serial set to `serial`.
///
/// `dbus::Message` exposes no reply-serial setter, so the message is
/// marshalled, patched as a raw libdbus message and read back.
fn with_reply_serial(mut message: Message, serial: u32) -> Result<Message, BusError> {
    message.set_serial(TRANSIT_SERIAL);
    let raw = RawMessage::demarshal(&marshal(&message)?)?;
    raw.set_reply_serial(serial)?;
    let mut patched = Message::demarshal(&raw.marshal()?)
        .map_err(|error| BusError::Send(error.to_string()))?;
    patched.set_serial(0);
    Ok(patched)
}

fn marshal(message: &Message) -> Result<Vec<u8>, BusError> {
    let mut wire = Vec::new();
    message
        .marshal(|chunk| {
            wire.extend_from_slice(chunk);
            Ok::<(), ()>(())
        })
        .map_err(|()| BusError::Send("failed to marshal message".to_owned()))?;
    Ok(wire)
}

/// An owned libdbus message, unreferenced on drop.
struct RawMessage(*mut DBusMessage);

impl RawMessage {
    fn demarshal(wire: &[u8]) -> Result<Self, BusError> {
        let len = c_int::try_from(wire.len())
            .map_err(|_| BusError::Send("message too large".to_owned()))?;
        // SAFETY: `wire` is a valid buffer of `len` bytes; a null error
        // pointer is accepted by libdbus.
        let raw = unsafe {
            libdbus_sys::dbus_message_demarshal(wire.as_ptr().cast::<c_char>(), len, ptr::null_mut())
        };
        if raw.is_null() {
            return Err(BusError::Send("failed to demarshal message".to_owned()));
        }
        Ok(Self(raw))
    }

    fn set_reply_serial(&self, serial: u32) -> Result<(), BusError> {
        // SAFETY: `self.0` is a live, unlocked message owned by `self`.
        if unsafe { dbus_message_set_reply_serial(self.0, serial) } == 0 {
            return Err(BusError::Send("failed to set reply serial".to_owned()));
        }
        Ok(())
    }

    fn marshal(&self) -> Result<Vec<u8>, BusError> {
        let mut data: *mut c_char = ptr::null_mut();
        let mut len: c_int = 0;
        // SAFETY: `self.0` is live; on success libdbus hands back an
        // allocation of `len` bytes that must be released with `dbus_free`.
        let marshalled = unsafe { libdbus_sys::dbus_message_marshal(self.0, &mut data, &mut len) };
        if marshalled == 0 || data.is_null() {
            return Err(BusError::Send("failed to marshal message".to_owned()));
        }
        let size = usize::try_from(len).unwrap_or_default();
        // SAFETY: `data` points at `size` initialised bytes until freed below.
        let wire = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size) }.to_vec();
        // SAFETY: `data` came from `dbus_message_marshal` and is freed once.
        unsafe { libdbus_sys::dbus_free(data.cast()) };
        Ok(wire)
    }
}

impl Drop for RawMessage {
    fn drop(&mut self) {
        // SAFETY: the reference taken by `dbus_message_demarshal` is released
        // exactly once.
        unsafe { libdbus_sys::dbus_message_unref(self.0) };
    }
}

fn append_body(message: Message, body: ReplyBody) -> Message {
    match body {
        ReplyBody::Text { code, text } => message.append2(code, text),
        ReplyBody::Output {
            code,
            stdout,
            stderr,
        } => message.append3(code, stdout, stderr),
        ReplyBody::Plain(text) => message.append1(text),
    }
}
