//! Converts "child stopped/exited" into a poll-able file descriptor.
//!
//! `gulag.ptrace.PTracedProcess.communicate` blocks `SIGCHLD` on itself,
//! opens a `signalfd`, and registers it alongside the child's output pipes
//! in one `poll()` loop so a single blocking call can wait on both signal
//! delivery and I/O readiness. `SigChldFd` is a scoped guard around that:
//! the mask is restored and the descriptor closed on drop, so an early
//! return from the supervisor can never leak the process-wide signal mask
//! (spec's design notes call this out explicitly - it is global state).

use std::os::unix::io::{AsRawFd, RawFd};

use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{siginfo, SfdFlags, SignalFd};

use crate::error::Result;

pub struct SigChldFd {
    fd: SignalFd,
    previous_mask: SigSet,
}

impl SigChldFd {
    /// Blocks `SIGCHLD` on the calling thread and returns a non-blocking
    /// signalfd that will report it. Only one of these should be alive per
    /// process at a time (see spec's design notes on the process-wide
    /// signal mask).
    pub fn new() -> Result<SigChldFd> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);

        let previous_mask = SigSet::thread_get_mask()?;
        mask.thread_block()?;

        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK)?;

        Ok(SigChldFd { fd, previous_mask })
    }

    /// Drains one pending signal record, if any. Returns `Ok(None)` if the
    /// descriptor is, surprisingly, not yet readable (can happen if a
    /// caller polls it without waiting for a POLLIN event first).
    pub fn read(&mut self) -> Result<Option<siginfo>> {
        Ok(self.fd.read_signal()?)
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Drop for SigChldFd {
    fn drop(&mut self) {
        let _ = self.previous_mask.thread_set_mask();
    }
}

#[cfg(test)]
mod test {
    // SigChldFd touches process-wide signal state, so it is exercised only
    // by the end-to-end scenarios in spec.md section 8, run by the judge
    // service that embeds this crate under a live ptrace-capable kernel.
}
