use bitflags::bitflags;
use nix::poll::PollFlags;

bitflags! {
    /// Readiness conditions a watch is interested in or was woken for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WatchFlags: u8 {
        /// Data can be read.
        const READABLE = 1;
        /// Data can be written.
        const WRITABLE = 1 << 1;
        /// The descriptor is in an error state.
        const ERROR = 1 << 2;
        /// The peer hung up.
        const HANGUP = 1 << 3;
    }
}

impl WatchFlags {
    /// Poll interest for these flags. Hangup shares the read interest.
    pub(crate) fn interest(self) -> PollFlags {
        let mut interest = PollFlags::empty();
        if self.intersects(Self::READABLE | Self::HANGUP) {
            interest |= PollFlags::POLLIN;
        }
        if self.contains(Self::WRITABLE) {
            interest |= PollFlags::POLLOUT;
        }
        if self.contains(Self::ERROR) {
            interest |= PollFlags::POLLPRI;
        }
        interest
    }

    /// Translates returned poll events.
    pub(crate) fn from_revents(revents: PollFlags) -> Self {
        let mut flags = Self::empty();
        if revents.intersects(PollFlags::POLLIN | PollFlags::POLLPRI) {
            flags |= Self::READABLE;
        }
        if revents.contains(PollFlags::POLLOUT) {
            flags |= Self::WRITABLE;
        }
        if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
            flags |= Self::ERROR;
        }
        if revents.contains(PollFlags::POLLHUP) {
            flags |= Self::HANGUP;
        }
        flags
    }
}
