//! In-memory bus used by the connection and pipeline suites.
//!
//! Every connection opened through [`FakeConnector`] shares one [`BusState`],
//! so scenarios can inspect what each connection did and inject failures.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use crate::bus::{
    BusArg, BusConnection, BusConnector, BusError, BusTimeout, BusWatch, CallHeader,
    IncomingMessage, MessageKind, NameReply, Outgoing,
};
use crate::event_loop::WatchFlags;

/// Per-connection bookkeeping.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub connected: bool,
    pub closed: bool,
    pub exit_on_disconnect: Option<bool>,
    pub names: Vec<String>,
    pub inbox: VecDeque<IncomingMessage>,
    pub sent: Vec<Outgoing>,
    pub flushes: usize,
    peer: UnixStream,
}

impl ConnectionRecord {
    fn new(connected: bool, peer: UnixStream) -> Self {
        Self {
            peer,
            connected,
            closed: false,
            exit_on_disconnect: None,
            names: Vec::new(),
            inbox: VecDeque::new(),
            sent: Vec::new(),
            flushes: 0,
        }
    }
}

/// State shared by the fake connector and every connection it opened.
#[derive(Debug, Default)]
pub struct BusState {
    pub log: Vec<String>,
    pub connections: Vec<ConnectionRecord>,
    pub failing_opens: usize,
    pub dead_opens: usize,
    pub foreign_names: Vec<String>,
    pub uids: HashMap<String, u32>,
    pub labels: HashMap<String, String>,
    pub watch_events: Vec<(usize, WatchFlags)>,
}

/// Cloneable handle onto the shared fake bus.
#[derive(Debug, Clone, Default)]
pub struct FakeBus {
    state: Rc<RefCell<BusState>>,
}

impl FakeBus {
    #[must_use]
    pub fn connector(&self) -> FakeConnector {
        FakeConnector { bus: self.clone() }
    }

    /// Makes the next `count` open attempts fail outright.
    pub fn fail_opens(&self, count: usize) {
        self.state.borrow_mut().failing_opens = count;
    }

    /// Makes the next `count` open attempts return a dead connection.
    pub fn dead_opens(&self, count: usize) {
        self.state.borrow_mut().dead_opens = count;
    }

    /// Marks `name` as owned by a process outside the test.
    pub fn occupy_name(&self, name: &str) {
        self.state.borrow_mut().foreign_names.push(name.to_owned());
    }

    /// Lets a name taken with [`FakeBus::occupy_name`] go.
    pub fn free_name(&self, name: &str) {
        self.state.borrow_mut().foreign_names.retain(|owned| owned != name);
    }

    pub fn set_uid(&self, sender: &str, uid: u32) {
        self.state.borrow_mut().uids.insert(sender.to_owned(), uid);
    }

    pub fn set_label(&self, sender: &str, label: &str) {
        self.state
            .borrow_mut()
            .labels
            .insert(sender.to_owned(), label.to_owned());
    }

    /// Index of the live connection owning `name`.
    #[must_use]
    pub fn owner_of(&self, name: &str) -> Option<usize> {
        self.state
            .borrow()
            .connections
            .iter()
            .position(|record| !record.closed && record.names.iter().any(|owned| owned == name))
    }

    /// Queues `message` on the connection owning `service`.
    pub fn deliver(&self, service: &str, message: IncomingMessage) {
        let index = self.owner_of(service).expect("service has no live connection");
        self.state.borrow_mut().connections[index]
            .inbox
            .push_back(message);
    }

    /// Makes the bus descriptor of `service` readable.
    pub fn poke(&self, service: &str) {
        let index = self.owner_of(service).expect("service has no live connection");
        (&self.state.borrow().connections[index].peer)
            .write_all(b"x")
            .expect("poke bus descriptor");
    }

    /// Simulates the bus dropping the connection of `service`.
    pub fn sever(&self, service: &str) {
        let index = self.owner_of(service).expect("service has no live connection");
        self.state.borrow_mut().connections[index].connected = false;
    }

    /// Every message sent on the connection that owned `service` most
    /// recently.
    #[must_use]
    pub fn sent_by(&self, service: &str) -> Vec<Outgoing> {
        let state = self.state.borrow();
        state
            .connections
            .iter()
            .rev()
            .find(|record| record.names.iter().any(|owned| owned == service))
            .map(|record| record.sent.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.state.borrow().log.clone()
    }

    #[must_use]
    pub fn opened(&self) -> usize {
        self.state.borrow().connections.len()
    }

    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state
            .borrow()
            .connections
            .iter()
            .filter(|record| !record.closed)
            .count()
    }

    #[must_use]
    pub fn exit_on_disconnect(&self, index: usize) -> Option<bool> {
        self.state.borrow().connections[index].exit_on_disconnect
    }

    #[must_use]
    pub fn watch_events(&self) -> Vec<(usize, WatchFlags)> {
        self.state.borrow().watch_events.clone()
    }

    fn push_log(&self, entry: String) {
        self.state.borrow_mut().log.push(entry);
    }
}

/// Opens [`FakeConnection`]s against a [`FakeBus`].
#[derive(Debug)]
pub struct FakeConnector {
    bus: FakeBus,
}

impl BusConnector for FakeConnector {
    fn open(&mut self) -> Result<Box<dyn BusConnection>, BusError> {
        let mut state = self.bus.state.borrow_mut();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            state.log.push("open failed".to_owned());
            return Err(BusError::Connect("bus unavailable".to_owned()));
        }
        let connected = if state.dead_opens > 0 {
            state.dead_opens -= 1;
            false
        } else {
            true
        };
        let (wake, peer) = UnixStream::pair().expect("socket pair");
        let index = state.connections.len();
        state.connections.push(ConnectionRecord::new(connected, peer));
        state.log.push(format!("open #{index}"));
        drop(state);
        Ok(Box::new(FakeConnection {
            bus: self.bus.clone(),
            index,
            wake,
        }))
    }
}

/// One connection on the fake bus.
#[derive(Debug)]
pub struct FakeConnection {
    bus: FakeBus,
    index: usize,
    wake: UnixStream,
}

impl FakeConnection {
    fn with_record<T>(&self, f: impl FnOnce(&mut ConnectionRecord) -> T) -> T {
        f(&mut self.bus.state.borrow_mut().connections[self.index])
    }
}

impl BusConnection for FakeConnection {
    fn is_connected(&self) -> bool {
        self.with_record(|record| record.connected && !record.closed)
    }

    fn set_exit_on_disconnect(&mut self, exit: bool) {
        self.with_record(|record| record.exit_on_disconnect = Some(exit));
        self.bus
            .push_log(format!("exit_on_disconnect #{} {exit}", self.index));
    }

    fn request_name(&mut self, name: &str) -> Result<NameReply, BusError> {
        self.bus.push_log(format!("request_name #{} {name}", self.index));
        if self
            .bus
            .state
            .borrow()
            .foreign_names
            .iter()
            .any(|taken| taken == name)
        {
            return Ok(NameReply::Exists);
        }
        self.with_record(|record| record.names.push(name.to_owned()));
        Ok(NameReply::PrimaryOwner)
    }

    fn release_name(&mut self, name: &str) -> Result<(), BusError> {
        self.bus.push_log(format!("release_name #{} {name}", self.index));
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        Ok(())
    }

    fn watches(&self) -> Vec<BusWatch> {
        if self.with_record(|record| record.closed) {
            return Vec::new();
        }
        vec![BusWatch {
            id: 0,
            fd: self.wake.as_raw_fd(),
            flags: WatchFlags::READABLE,
            enabled: true,
        }]
    }

    fn timeouts(&self) -> Vec<BusTimeout> {
        Vec::new()
    }

    fn handle_watch(&mut self, _id: u32, flags: WatchFlags) {
        self.bus
            .state
            .borrow_mut()
            .watch_events
            .push((self.index, flags));
    }

    fn handle_timeout(&mut self, _id: u32) {}

    fn pop_message(&mut self) -> Option<IncomingMessage> {
        self.with_record(|record| record.inbox.pop_front())
    }

    fn send(&mut self, message: Outgoing) -> Result<(), BusError> {
        self.with_record(|record| record.sent.push(message));
        Ok(())
    }

    fn flush(&mut self) {
        self.with_record(|record| record.flushes += 1);
    }

    fn unix_user(&mut self, sender: &str) -> Result<u32, BusError> {
        self.bus
            .state
            .borrow()
            .uids
            .get(sender)
            .copied()
            .ok_or_else(|| BusError::call("GetConnectionUnixUser", "no such name"))
    }

    fn security_context(&mut self, sender: &str) -> Result<String, BusError> {
        self.bus
            .state
            .borrow()
            .labels
            .get(sender)
            .cloned()
            .ok_or_else(|| BusError::call("GetConnectionSELinuxSecurityContext", "no label"))
    }

    fn close(&mut self) {
        let newly = self.with_record(|record| !std::mem::replace(&mut record.closed, true));
        if newly {
            self.bus.push_log(format!("close #{}", self.index));
        }
    }
}

/// Builds a method call as the bus would deliver it.
#[must_use]
pub fn method_call(
    sender: Option<&str>,
    destination: &str,
    path: &str,
    interface: Option<&str>,
    member: &str,
    args: &[&str],
) -> IncomingMessage {
    IncomingMessage {
        kind: MessageKind::MethodCall,
        header: CallHeader {
            serial: 7,
            sender: sender.map(str::to_owned),
            destination: Some(destination.to_owned()),
            path: Some(path.to_owned()),
            interface: interface.map(str::to_owned),
            member: Some(member.to_owned()),
            ..CallHeader::default()
        },
        args: args.iter().map(|arg| BusArg::Str((*arg).to_owned())).collect(),
    }
}
