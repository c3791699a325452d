//! Single-threaded readiness loop.
//!
//! One [`EventLoop::iterate`] call runs Prepare (gather interest and the wait
//! bound), Wait (`poll(2)`) and Dispatch. Dispatch order is fixed: bus
//! watches, generic descriptor watches, bus timeouts, then child reaping.
//!
//! Callbacks receive the host and the loop itself, so they can add or remove
//! registrations (their own included) while being dispatched.

mod flags;
pub mod signals;

use std::os::fd::{BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::bus::{BusTimeout, BusWatch, ConnectionToken};

pub use flags::WatchFlags;

const EVENT_LOOP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::event_loop");

/// Poll interval used while children are pending.
pub const PID_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Names a watch owned by a bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusWatchKey {
    /// Owning connection.
    pub connection: ConnectionToken,
    /// Connection-local watch id.
    pub watch: u32,
}

/// Names a timeout owned by a bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusTimeoutKey {
    /// Owning connection.
    pub connection: ConnectionToken,
    /// Connection-local timeout id.
    pub timeout: u32,
}

/// Whether a generic watch stays registered after its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchControl {
    /// Keep watching.
    Continue,
    /// Remove the watch.
    Done,
}

/// Owner of the bus connections whose watches and timeouts the loop polls.
///
/// The loop stores only keys; current descriptor, flags, interval and
/// enabled state are read back from the host at every Prepare.
pub trait BusHost: Sized {
    /// Current state of a bus watch, or `None` when it no longer exists.
    fn bus_watch(&self, key: BusWatchKey) -> Option<BusWatch>;

    /// Current state of a bus timeout, or `None` when it no longer exists.
    fn bus_timeout(&self, key: BusTimeoutKey) -> Option<BusTimeout>;

    /// Services a ready bus watch.
    fn handle_bus_watch(&mut self, events: &mut EventLoop<Self>, key: BusWatchKey, flags: WatchFlags);

    /// Fires an elapsed bus timeout.
    fn handle_bus_timeout(&mut self, events: &mut EventLoop<Self>, key: BusTimeoutKey);

    /// Longest the loop may block before the host needs another turn.
    fn wait_bound(&self) -> Option<Duration> {
        None
    }
}

/// Callback invoked when a generic watch becomes ready.
pub type WatchCallback<H> = dyn FnMut(&mut H, &mut EventLoop<H>, RawFd, WatchFlags) -> WatchControl;

/// Callback invoked once a watched child has been reaped.
pub type PidCallback<H> = dyn FnOnce(&mut H, &mut EventLoop<H>, Pid, WaitStatus);

struct ArmedTimeout {
    key: BusTimeoutKey,
    armed_at: Instant,
}

struct FdWatch<H> {
    fd: RawFd,
    flags: WatchFlags,
    // Taken out while the callback runs.
    callback: Option<Box<WatchCallback<H>>>,
}

struct PidWatch<H> {
    pid: Pid,
    callback: Box<PidCallback<H>>,
}

#[derive(Clone, Copy)]
enum SlotTarget {
    Bus(BusWatchKey),
    Generic(RawFd),
}

struct Slot {
    target: SlotTarget,
    fd: RawFd,
    interest: PollFlags,
}

struct Plan {
    slots: Vec<Slot>,
    wait: Option<Duration>,
}

/// Registry of watches, timeouts and child processes for one host type.
pub struct EventLoop<H> {
    bus_watches: Vec<BusWatchKey>,
    bus_timeouts: Vec<ArmedTimeout>,
    watches: Vec<FdWatch<H>>,
    pids: Vec<PidWatch<H>>,
}

impl<H> Default for EventLoop<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> EventLoop<H> {
    /// Creates an empty loop.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bus_watches: Vec::new(),
            bus_timeouts: Vec::new(),
            watches: Vec::new(),
            pids: Vec::new(),
        }
    }

    /// Starts polling a bus watch. Adding a key twice has no effect.
    pub fn add_bus_watch(&mut self, key: BusWatchKey) {
        if !self.bus_watches.contains(&key) {
            self.bus_watches.push(key);
        }
    }

    /// Stops polling a bus watch.
    pub fn remove_bus_watch(&mut self, key: BusWatchKey) {
        self.bus_watches.retain(|existing| *existing != key);
    }

    /// Starts tracking a bus timeout from now. Adding a key twice has no
    /// effect.
    pub fn add_bus_timeout(&mut self, key: BusTimeoutKey) {
        if self.bus_timeouts.iter().any(|armed| armed.key == key) {
            return;
        }
        self.bus_timeouts.push(ArmedTimeout {
            key,
            armed_at: Instant::now(),
        });
    }

    /// Stops tracking a bus timeout.
    pub fn remove_bus_timeout(&mut self, key: BusTimeoutKey) {
        self.bus_timeouts.retain(|armed| armed.key != key);
    }

    /// Drops every watch and timeout owned by `connection`.
    pub fn detach_connection(&mut self, connection: ConnectionToken) {
        self.bus_watches.retain(|key| key.connection != connection);
        self.bus_timeouts
            .retain(|armed| armed.key.connection != connection);
    }

    /// Watches `fd` for `flags`. Returns `false` when `fd` is already
    /// watched, leaving the existing registration in place.
    pub fn add_watch<F>(&mut self, fd: RawFd, flags: WatchFlags, callback: F) -> bool
    where
        F: FnMut(&mut H, &mut Self, RawFd, WatchFlags) -> WatchControl + 'static,
    {
        if self.has_watch(fd) {
            return false;
        }
        self.watches.push(FdWatch {
            fd,
            flags,
            callback: Some(Box::new(callback)),
        });
        true
    }

    /// Stops watching `fd`.
    pub fn remove_watch(&mut self, fd: RawFd) {
        self.watches.retain(|watch| watch.fd != fd);
    }

    /// Whether `fd` has a generic watch.
    #[must_use]
    pub fn has_watch(&self, fd: RawFd) -> bool {
        self.watches.iter().any(|watch| watch.fd == fd)
    }

    /// Waits for `pid` to exit. Returns `false` when `pid` is already
    /// watched.
    pub fn add_pid<F>(&mut self, pid: Pid, callback: F) -> bool
    where
        F: FnOnce(&mut H, &mut Self, Pid, WaitStatus) + 'static,
    {
        if self.has_pid(pid) {
            return false;
        }
        self.pids.push(PidWatch {
            pid,
            callback: Box::new(callback),
        });
        true
    }

    /// Stops waiting for `pid` without reaping it.
    pub fn remove_pid(&mut self, pid: Pid) {
        self.pids.retain(|watch| watch.pid != pid);
    }

    /// Whether `pid` is being waited for.
    #[must_use]
    pub fn has_pid(&self, pid: Pid) -> bool {
        self.pids.iter().any(|watch| watch.pid == pid)
    }

    /// Number of generic descriptor watches.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Number of pending child watches.
    #[must_use]
    pub fn pid_count(&self) -> usize {
        self.pids.len()
    }

    /// Number of registered bus watches.
    #[must_use]
    pub fn bus_watch_count(&self) -> usize {
        self.bus_watches.len()
    }

    /// Number of registered bus timeouts.
    #[must_use]
    pub fn bus_timeout_count(&self) -> usize {
        self.bus_timeouts.len()
    }
}

impl<H: BusHost> EventLoop<H> {
    /// Runs one Prepare/Wait/Dispatch cycle and returns the number of ready
    /// descriptors. Zero is a normal result when the wait timed out.
    ///
    /// # Errors
    ///
    /// Returns the errno from `poll(2)`, `EINTR` included; nothing is
    /// dispatched in that case.
    pub fn iterate(&mut self, host: &mut H) -> Result<usize, Errno> {
        self.prune(host);
        let plan = self.prepare(host);
        let revents = wait(&plan)?;
        let ready = revents.iter().filter(|flags| !flags.is_empty()).count();
        self.dispatch_bus_watches(host, &plan, &revents);
        self.dispatch_watches(host, &plan, &revents);
        self.dispatch_timeouts(host);
        self.dispatch_pids(host);
        Ok(ready)
    }

    // Keys outliving their connection would otherwise poll a recycled fd.
    fn prune(&mut self, host: &H) {
        self.bus_watches.retain(|key| host.bus_watch(*key).is_some());
        self.bus_timeouts
            .retain(|armed| host.bus_timeout(armed.key).is_some());
    }

    fn prepare(&self, host: &H) -> Plan {
        let mut slots = Vec::with_capacity(self.bus_watches.len() + self.watches.len());
        for key in &self.bus_watches {
            let Some(watch) = host.bus_watch(*key) else {
                continue;
            };
            if watch.enabled {
                slots.push(Slot {
                    target: SlotTarget::Bus(*key),
                    fd: watch.fd,
                    interest: watch.flags.interest(),
                });
            }
        }
        for watch in &self.watches {
            slots.push(Slot {
                target: SlotTarget::Generic(watch.fd),
                fd: watch.fd,
                interest: watch.flags.interest(),
            });
        }

        let mut bound = (!self.pids.is_empty()).then_some(PID_POLL_INTERVAL);
        if let Some(limit) = host.wait_bound() {
            bound = Some(bound.map_or(limit, |current| current.min(limit)));
        }
        for armed in &self.bus_timeouts {
            let Some(timeout) = host.bus_timeout(armed.key) else {
                continue;
            };
            if !timeout.enabled {
                continue;
            }
            let remaining = timeout.interval.saturating_sub(armed.armed_at.elapsed());
            bound = Some(bound.map_or(remaining, |current| current.min(remaining)));
        }

        Plan { slots, wait: bound }
    }

    fn dispatch_bus_watches(&mut self, host: &mut H, plan: &Plan, revents: &[WatchFlags]) {
        let mut ready: Vec<(BusWatchKey, WatchFlags)> = Vec::new();
        for (slot, flags) in plan.slots.iter().zip(revents) {
            let SlotTarget::Bus(key) = slot.target else {
                continue;
            };
            if flags.is_empty() {
                continue;
            }
            match ready.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, merged)) => *merged |= *flags,
                None => ready.push((key, *flags)),
            }
        }
        for (key, flags) in ready {
            // An earlier handler may have torn the connection down.
            if self.bus_watches.contains(&key) {
                host.handle_bus_watch(self, key, flags);
            }
        }
    }

    fn dispatch_watches(&mut self, host: &mut H, plan: &Plan, revents: &[WatchFlags]) {
        for (slot, flags) in plan.slots.iter().zip(revents) {
            let SlotTarget::Generic(fd) = slot.target else {
                continue;
            };
            if flags.is_empty() {
                continue;
            }
            let Some(mut callback) = self
                .watches
                .iter_mut()
                .find(|watch| watch.fd == fd)
                .and_then(|watch| watch.callback.take())
            else {
                continue;
            };
            let control = callback(host, self, fd, *flags);
            // Only restore into the registration we emptied; a callback that
            // removed and re-added its fd keeps the new one.
            let slot = self
                .watches
                .iter_mut()
                .find(|watch| watch.fd == fd && watch.callback.is_none());
            match (control, slot) {
                (WatchControl::Continue, Some(watch)) => watch.callback = Some(callback),
                (WatchControl::Done, Some(_)) => {
                    self.watches
                        .retain(|watch| watch.fd != fd || watch.callback.is_some());
                }
                (_, None) => {}
            }
        }
    }

    fn dispatch_timeouts(&mut self, host: &mut H) {
        let keys: Vec<BusTimeoutKey> = self.bus_timeouts.iter().map(|armed| armed.key).collect();
        for key in keys {
            let Some(timeout) = host.bus_timeout(key) else {
                continue;
            };
            if !timeout.enabled {
                continue;
            }
            let Some(armed) = self.bus_timeouts.iter_mut().find(|armed| armed.key == key) else {
                continue;
            };
            if armed.armed_at.elapsed() < timeout.interval {
                continue;
            }
            armed.armed_at = Instant::now();
            host.handle_bus_timeout(self, key);
        }
    }

    fn dispatch_pids(&mut self, host: &mut H) {
        let pids: Vec<Pid> = self.pids.iter().map(|watch| watch.pid).collect();
        for pid in pids {
            if !self.has_pid(pid) {
                continue;
            }
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    if let Some(watch) = self.take_pid(pid) {
                        (watch.callback)(host, self, pid, status);
                    }
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(error) => {
                    tracing::warn!(
                        target: EVENT_LOOP_TARGET,
                        pid = pid.as_raw(),
                        error = %error,
                        "cannot wait for child; dropping its watch"
                    );
                    self.remove_pid(pid);
                }
            }
        }
    }

    fn take_pid(&mut self, pid: Pid) -> Option<PidWatch<H>> {
        let index = self.pids.iter().position(|watch| watch.pid == pid)?;
        Some(self.pids.remove(index))
    }
}

fn wait(plan: &Plan) -> Result<Vec<WatchFlags>, Errno> {
    let mut fds: Vec<PollFd<'_>> = plan
        .slots
        .iter()
        .map(|slot| {
            // SAFETY: every descriptor comes from a live registration and
            // stays open for the duration of this poll call.
            let fd = unsafe { BorrowedFd::borrow_raw(slot.fd) };
            PollFd::new(fd, slot.interest)
        })
        .collect();
    poll(&mut fds, poll_timeout(plan.wait))?;
    Ok(fds
        .iter()
        .map(|fd| WatchFlags::from_revents(fd.revents().unwrap_or(PollFlags::empty())))
        .collect())
}

fn poll_timeout(wait: Option<Duration>) -> PollTimeout {
    match wait {
        None => PollTimeout::NONE,
        Some(duration) => {
            // Round up so a timeout is never polled a millisecond early; long
            // waits are clamped and simply re-armed on the next iteration.
            let millis = duration.as_micros().div_ceil(1000);
            PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
        }
    }
}
