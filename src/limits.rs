//! Per-process resource ceilings applied in the child, before `execve`.
//!
//! Mirrors `gulag.ptrace.PTracedProcess._preexec_hook`: a zero fork limit
//! (the judged program may not spawn children), a CPU-seconds ceiling with
//! a small hard-limit grace window so the kernel's `SIGXCPU` lands slightly
//! after the soft limit the supervisor is itself timing against, and a
//! resident-set ceiling as defense in depth alongside the supervisor's own
//! `/proc/<pid>/statm` sampling.
//!
//! `Limits` (see `config::Limits`) expresses `rss`/`vm` in pages, matching
//! `/proc/<pid>/statm`'s units. `setrlimit(RLIMIT_RSS, ...)` wants bytes.
//! This is the units mismatch spec.md's design notes flag as needing
//! reconciliation "at the boundary between the supervisor and the
//! runner's limit adaptation" - it is reconciled here, the one place that
//! calls `setrlimit`, by multiplying through the host's page size; every
//! other component in this crate works in pages.

use nix::sys::resource::{setrlimit, Resource};
use nix::unistd::{sysconf, SysconfVar};

use crate::config::Limits;
use crate::error::Result;

fn page_size() -> u64 {
    sysconf(SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .map(|v| v as u64)
        .unwrap_or(4096)
}

/// Applies the preset. Must be called in the child after `fork` and before
/// `execve`; every step here is limited to `setrlimit`, which is
/// async-signal-safe.
pub fn apply(limits: &Limits) -> Result<()> {
    setrlimit(Resource::RLIMIT_NPROC, 0, 0)?;

    if let Some(time_seconds) = limits.time_seconds {
        let soft = time_seconds.ceil() as u64;
        let hard = soft + 1;
        setrlimit(Resource::RLIMIT_CPU, soft, hard)?;
    }

    if let Some(rss_pages) = limits.rss_pages {
        let page = page_size();
        let soft = rss_pages * page;
        let hard = soft + 10 * page;
        setrlimit(Resource::RLIMIT_RSS, soft, hard)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_size_is_a_plausible_power_of_two() {
        let p = page_size();
        assert!(p >= 4096);
        assert_eq!(p & (p - 1), 0, "page size should be a power of two");
    }
}
