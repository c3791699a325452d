//! Process-wide signal dispositions for the daemon.

use nix::sys::signal::{SigHandler, Signal, signal};

/// Signals restored to their default disposition before the first iteration.
pub const RESET_TO_DEFAULT: [Signal; 9] = [
    Signal::SIGALRM,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGILL,
    Signal::SIGABRT,
    Signal::SIGSEGV,
    Signal::SIGTERM,
    Signal::SIGCHLD,
    Signal::SIGCONT,
];

/// Resets [`RESET_TO_DEFAULT`] to their defaults and ignores `SIGPIPE`, so a
/// caller that goes away mid-reply cannot kill the daemon.
///
/// # Errors
///
/// Returns the errno reported by `signal(2)`.
pub fn apply_signal_posture() -> nix::Result<()> {
    for sig in RESET_TO_DEFAULT {
        // SAFETY: only the default disposition is installed; no handler code
        // runs in signal context.
        unsafe { signal(sig, SigHandler::SigDfl) }?;
    }
    // SAFETY: as above, ignoring installs no handler code.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }?;
    Ok(())
}
