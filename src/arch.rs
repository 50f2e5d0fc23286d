//! Architecture-specific syscall identifiers and register access.
//!
//! `gulag.compat` hardcodes x86-64 syscall numbers and `PTRACE_PEEKUSER`
//! register offsets behind a `platform.machine() == 'x86_64'` guard that
//! raises `NotImplementedError` otherwise. Here that guard becomes a
//! fallible constructor behind a small trait, so a future arm64
//! implementation can sit alongside this one instead of requiring a
//! rewrite (see spec's design notes on architecture-specific register
//! layout).

use libc::user_regs_struct;
use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Syscalls whose arguments must be inspected before they are allowed to
/// proceed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RestrictedSyscall {
    Open,
    Openat,
    Socket,
    Creat,
}

/// Syscalls that grow or shrink the address space, and are therefore
/// sampled for resource usage at their syscall-exit stop.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MemorySyscall {
    Mmap,
    Munmap,
    Brk,
    Mremap,
    RemapFilePages,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SyscallClass {
    Restricted(RestrictedSyscall),
    Memory(MemorySyscall),
    Other,
}

/// Thin seam over architecture-specific register layout and syscall
/// numbering, so the supervisor's event loop never switches on
/// `target_arch` directly.
pub trait Arch: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reads the syscall number the child is stopped on (`ORIG_RAX` on
    /// x86-64).
    fn syscall_number(&self, regs: &user_regs_struct) -> i64;

    /// Reads the child's syscall return value (`RAX` on x86-64). Only
    /// meaningful at a syscall-exit stop.
    fn syscall_return(&self, regs: &user_regs_struct) -> i64;

    fn classify(&self, num: i64) -> SyscallClass;

    /// True iff the flags of an `open`/`openat` the child is stopped on
    /// request only a read-only open - no write-only, read-write, or
    /// create flag. `socket` and `creat` are unconditionally disallowed
    /// by the caller and never reach this method.
    fn allow_open_like(&self, regs: &user_regs_struct, num: i64) -> bool;

    /// `PTRACE_SYSCALL`: resume the child until its next syscall-entry or
    /// syscall-exit stop.
    fn continue_to_next_syscall_stop(&self, pid: Pid) -> Result<()> {
        ptrace::syscall(pid, None).map_err(Error::from)
    }
}

#[cfg(target_arch = "x86_64")]
pub struct X86_64Arch;

#[cfg(target_arch = "x86_64")]
impl Arch for X86_64Arch {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn syscall_number(&self, regs: &user_regs_struct) -> i64 {
        regs.orig_rax as i64
    }

    fn syscall_return(&self, regs: &user_regs_struct) -> i64 {
        regs.rax as i64
    }

    fn classify(&self, num: i64) -> SyscallClass {
        use RestrictedSyscall::*;
        use SyscallClass::*;

        match num {
            n if n == libc::SYS_open => Restricted(Open),
            n if n == libc::SYS_openat => Restricted(Openat),
            n if n == libc::SYS_socket => Restricted(Socket),
            n if n == libc::SYS_creat => Restricted(Creat),
            n if n == libc::SYS_mmap => Memory(MemorySyscall::Mmap),
            n if n == libc::SYS_munmap => Memory(MemorySyscall::Munmap),
            n if n == libc::SYS_brk => Memory(MemorySyscall::Brk),
            n if n == libc::SYS_mremap => Memory(MemorySyscall::Mremap),
            n if n == libc::SYS_remap_file_pages => Memory(MemorySyscall::RemapFilePages),
            _ => Other,
        }
    }

    fn allow_open_like(&self, regs: &user_regs_struct, num: i64) -> bool {
        let flags = if num == libc::SYS_open {
            regs.rsi as i32
        } else if num == libc::SYS_openat {
            regs.rdx as i32
        } else {
            return false;
        };

        flags & (libc::O_WRONLY | libc::O_RDWR | libc::O_CREAT) == 0
    }
}

/// Detects the running process's architecture and returns the matching
/// [`Arch`] implementation, or `Error::UnsupportedArch` if this crate has
/// no register layout for it.
pub fn detect() -> Result<Box<dyn Arch>> {
    #[cfg(target_arch = "x86_64")]
    {
        Ok(Box::new(X86_64Arch))
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        Err(Error::UnsupportedArch(
            std::env::consts::ARCH.to_string(),
        ))
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod test {
    use super::*;

    fn regs_with(orig_rax: u64, rax: u64, rsi: u64, rdx: u64) -> user_regs_struct {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        regs.orig_rax = orig_rax;
        regs.rax = rax;
        regs.rsi = rsi;
        regs.rdx = rdx;
        regs
    }

    #[test]
    fn classifies_restricted_and_memory_syscalls() {
        let arch = X86_64Arch;
        assert_eq!(
            arch.classify(libc::SYS_open),
            SyscallClass::Restricted(RestrictedSyscall::Open)
        );
        assert_eq!(
            arch.classify(libc::SYS_mmap),
            SyscallClass::Memory(MemorySyscall::Mmap)
        );
        assert_eq!(arch.classify(39 /* getpid */), SyscallClass::Other);
    }

    #[test]
    fn allows_pure_read_only_open() {
        let arch = X86_64Arch;
        let regs = regs_with(libc::SYS_open as u64, 0, libc::O_RDONLY as u64, 0);
        assert!(arch.allow_open_like(&regs, libc::SYS_open));
    }

    #[test]
    fn rejects_write_and_create_opens() {
        let arch = X86_64Arch;
        let wronly = regs_with(libc::SYS_open as u64, 0, libc::O_WRONLY as u64, 0);
        assert!(!arch.allow_open_like(&wronly, libc::SYS_open));
    }

    #[test]
    fn openat_reads_flags_from_rdx() {
        let arch = X86_64Arch;
        let regs = regs_with(libc::SYS_openat as u64, 0, 0, libc::O_CREAT as u64);
        assert!(!arch.allow_open_like(&regs, libc::SYS_openat));
    }
}
