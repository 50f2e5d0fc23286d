//! The traced-process supervisor: forks and execs the child under
//! `ptrace`, then runs a single-threaded event loop that multiplexes
//! syscall-stop notification (via the `signalfd`) with the child's output
//! pipes, until a verdict is reached.
//!
//! Mirrors `gulag.ptrace.PTracedProcess` and its `communicate()` method.
//! Per spec.md's design notes, the original's table of bound callables
//! (`fd_callbacks[fd] = (callback, *args)`) becomes a plain enum
//! dispatched by `match` here - no trait objects or captured closures are
//! needed since there are only four descriptor kinds.

use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::unistd::{close, dup2, execve, fork, pipe, read, ForkResult, Pid};

use crate::arch::{Arch, SyscallClass};
use crate::config::Limits;
use crate::error::{Error, Result};
use crate::log::{log_debug, log_error, log_info, log_warn};
use crate::signalfd::SigChldFd;
use crate::verdict::{Verdict, VerdictCell};

const READ_CHUNK: usize = 4096;

/// What to do with the child's stdout.
pub enum StdoutTarget {
    /// Stream-compare against this file as the child produces output; the
    /// child's stdout is piped to the supervisor. This is the normal
    /// judging path.
    Compare(File),
    /// Dup the child's stdout directly onto this file; the supervisor
    /// never sees the bytes and performs no comparison. Used when
    /// generating an expected-output file in benchmark mode.
    WriteDirect(File),
    /// Pipe the child's stdout to the supervisor and accumulate it into a
    /// buffer, for `debug()`.
    Capture,
}

/// What to do with the child's stderr.
pub enum StderrTarget {
    /// Redirect to `/dev/null`.
    Discard,
    /// Pipe and accumulate into a buffer, for `debug()`.
    Capture,
}

pub struct RunOutcome {
    pub verdict: Verdict,
    pub exit_code: i32,
    pub cputime: Option<f64>,
    pub maxrss: u64,
    pub maxvm: u64,
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
}

enum DescriptorKind {
    SigFd,
    StdoutCompare { expected: File },
    StdoutBuffer { buf: Vec<u8> },
    StderrBuffer { buf: Vec<u8> },
}

struct Registered {
    fd: RawFd,
    kind: DescriptorKind,
}

/// Owns the per-run mutable state spec.md's data model calls "traced
/// process state": the child's pid, the sticky verdict, running RSS/VM
/// maxima, final CPU time, and the configured limits.
struct Supervisor<'a> {
    arch: &'a dyn Arch,
    pid: Pid,
    limits: Limits,
    verdict: VerdictCell,
    maxrss: u64,
    maxvm: u64,
    cputime: Option<f64>,
    exit_code: i32,
    killed: bool,
}

/// Spawns `executable` with `args`/`env` inside `cwd`, wires up the
/// requested stdin/stdout/stderr treatment, and runs the event loop to
/// completion. Mirrors `Runner._spawn` + `PTracedProcess.__init__` +
/// `PTracedProcess.communicate`.
pub fn spawn_and_run(
    arch: &dyn Arch,
    executable: &Path,
    args: &[String],
    env: &[(String, String)],
    cwd: &Path,
    stdin: File,
    stdout: StdoutTarget,
    stderr: StderrTarget,
    limits: Limits,
) -> Result<RunOutcome> {
    use std::os::unix::io::IntoRawFd;

    // `keep_alive` keeps a `WriteDirect` file (or the `/dev/null` we open
    // for a discarded stderr) alive until after the fork: the child needs
    // its fd to still be valid when it dup2s onto it.
    let mut keep_alive: Vec<File> = Vec::new();

    let (stdout_read_fd, child_stdout_fd, stdout_kind) = match stdout {
        StdoutTarget::Compare(expected) => {
            let (r, w) = pipe()?;
            (
                Some(r.into_raw_fd()),
                w.into_raw_fd(),
                Some(DescriptorKind::StdoutCompare { expected }),
            )
        }
        StdoutTarget::WriteDirect(f) => {
            let fd = f.as_raw_fd();
            keep_alive.push(f);
            (None, fd, None)
        }
        StdoutTarget::Capture => {
            let (r, w) = pipe()?;
            (
                Some(r.into_raw_fd()),
                w.into_raw_fd(),
                Some(DescriptorKind::StdoutBuffer { buf: Vec::new() }),
            )
        }
    };

    let (stderr_read_fd, child_stderr_fd, stderr_kind) = match stderr {
        StderrTarget::Discard => {
            let devnull = File::options()
                .write(true)
                .open("/dev/null")
                .map_err(|e| Error::io("/dev/null", e))?;
            let fd = devnull.as_raw_fd();
            keep_alive.push(devnull);
            (None, fd, None)
        }
        StderrTarget::Capture => {
            let (r, w) = pipe()?;
            (
                Some(r.into_raw_fd()),
                w.into_raw_fd(),
                Some(DescriptorKind::StderrBuffer { buf: Vec::new() }),
            )
        }
    };

    let child_stdin_fd = stdin.as_raw_fd();

    let pid = unsafe { spawn_child(executable, args, env, cwd, child_stdin_fd, child_stdout_fd, child_stderr_fd, &limits)? };

    // The pipe write ends, and any keep-alive handles, live only in the
    // child after dup2; close our copies so EOF is observable once the
    // child exits.
    if stdout_read_fd.is_some() {
        let _ = close(child_stdout_fd);
    }
    if stderr_read_fd.is_some() {
        let _ = close(child_stderr_fd);
    }
    drop(keep_alive);
    drop(stdin);

    wait_for_initial_stop(pid)?;

    let mut registered = Vec::new();

    let mut sigfd = SigChldFd::new()?;
    registered.push(Registered {
        fd: sigfd.as_raw_fd(),
        kind: DescriptorKind::SigFd,
    });

    if let (Some(fd), Some(kind)) = (stdout_read_fd, stdout_kind) {
        set_nonblocking(fd)?;
        registered.push(Registered { fd, kind });
    }

    if let (Some(fd), Some(kind)) = (stderr_read_fd, stderr_kind) {
        set_nonblocking(fd)?;
        registered.push(Registered { fd, kind });
    }

    let mut supervisor = Supervisor {
        arch,
        pid,
        limits,
        verdict: VerdictCell::new(),
        maxrss: 0,
        maxvm: 0,
        cputime: None,
        exit_code: -1,
        killed: false,
    };

    arch.continue_to_next_syscall_stop(pid)?;

    run_event_loop(&mut supervisor, &mut sigfd, &mut registered)?;

    supervisor.finalize();

    let mut stdout_buf = None;
    let mut stderr_buf = None;
    for r in registered {
        match r.kind {
            DescriptorKind::StdoutBuffer { buf } => stdout_buf = Some(buf),
            DescriptorKind::StderrBuffer { buf } => stderr_buf = Some(buf),
            _ => {}
        }
        let _ = close(r.fd);
    }

    log_info!(
        "pid {} finalized as {} (exit={}, cpu={:?}, rss={}, vm={})",
        pid,
        supervisor.verdict.get().unwrap(),
        supervisor.exit_code,
        supervisor.cputime,
        supervisor.maxrss,
        supervisor.maxvm
    );

    Ok(RunOutcome {
        verdict: supervisor.verdict.get().expect("finalize always sets a verdict"),
        exit_code: supervisor.exit_code,
        cputime: supervisor.cputime,
        maxrss: supervisor.maxrss,
        maxvm: supervisor.maxvm,
        stdout: stdout_buf,
        stderr: stderr_buf,
    })
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Forks and, in the child, applies resource limits, requests tracing,
/// and execs. Returns the child's pid in the parent. Safety: runs between
/// `fork()` and `execve()`, so only async-signal-safe operations happen
/// on the child side.
unsafe fn spawn_child(
    executable: &Path,
    args: &[String],
    env: &[(String, String)],
    cwd: &Path,
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    limits: &Limits,
) -> Result<Pid> {
    match fork()? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            match child_exec(executable, args, env, cwd, stdin_fd, stdout_fd, stderr_fd, limits) {
                Ok(()) => unreachable!("execve only returns on error"),
                Err(_) => libc::_exit(127),
            }
        }
    }
}

unsafe fn child_exec(
    executable: &Path,
    args: &[String],
    env: &[(String, String)],
    cwd: &Path,
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    limits: &Limits,
) -> Result<()> {
    dup2(stdin_fd, libc::STDIN_FILENO)?;
    dup2(stdout_fd, libc::STDOUT_FILENO)?;
    dup2(stderr_fd, libc::STDERR_FILENO)?;

    nix::unistd::chdir(cwd)?;

    crate::limits::apply(limits)?;

    ptrace::traceme()?;

    let c_executable = CString::new(executable.as_os_str().to_string_lossy().as_bytes())
        .map_err(|_| Error::UnexpectedInitialStop)?;
    let c_args: Vec<CString> = args.iter().map(|a| CString::new(a.as_str()).unwrap()).collect();
    let c_env: Vec<CString> = env
        .iter()
        .map(|(k, v)| CString::new(format!("{}={}", k, v)).unwrap())
        .collect();

    execve(&c_executable, &c_args, &c_env)?;
    unreachable!()
}

fn wait_for_initial_stop(pid: Pid) -> Result<()> {
    let mut status: i32 = 0;
    let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, libc::WUNTRACED) };
    if ret < 0 {
        return Err(Error::from(nix::Error::last()));
    }

    if !wifstopped(status) {
        return Err(Error::ChildDidNotStop);
    }

    if wstopsig(status) != libc::SIGTRAP {
        let _ = nix::sys::signal::kill(pid, Signal::SIGKILL);
        let _ = unsafe {
            let mut discard = 0;
            libc::waitpid(pid.as_raw(), &mut discard, 0)
        };
        return Err(Error::UnexpectedInitialStop);
    }

    Ok(())
}

fn wifstopped(status: i32) -> bool {
    (status & 0xff) == 0x7f
}

fn wstopsig(status: i32) -> i32 {
    (status >> 8) & 0xff
}

fn wifexited(status: i32) -> bool {
    (status & 0x7f) == 0
}

fn wexitstatus(status: i32) -> i32 {
    (status >> 8) & 0xff
}

fn run_event_loop(
    supervisor: &mut Supervisor,
    sigfd: &mut SigChldFd,
    registered: &mut Vec<Registered>,
) -> Result<()> {
    let timeout = match supervisor.limits.time_seconds {
        Some(t) => {
            let ms = ((t + 1.0) * 1000.0).max(0.0) as i64;
            PollTimeout::try_from(ms.min(i32::MAX as i64) as i32).unwrap_or(PollTimeout::MAX)
        }
        None => PollTimeout::NONE,
    };

    while !registered.is_empty() {
        let mut pollfds: Vec<PollFd> = registered
            .iter()
            .map(|r| unsafe {
                PollFd::new(
                    std::os::fd::BorrowedFd::borrow_raw(r.fd),
                    PollFlags::POLLIN | PollFlags::POLLPRI | PollFlags::POLLHUP,
                )
            })
            .collect();

        let ready = match poll(&mut pollfds, timeout) {
            Ok(n) => n,
            Err(nix::Error::EINTR) => continue,
            Err(e) => {
                kill_child(supervisor);
                return Err(Error::from(e));
            }
        };

        if ready == 0 {
            if supervisor.verdict.set_if_unset(Verdict::TL) {
                log_warn!("pid {} exceeded its time budget", supervisor.pid);
            }
            kill_child(supervisor);
            continue;
        }

        let mut finished = Vec::new();

        for (i, pollfd) in pollfds.iter().enumerate() {
            let revents = match pollfd.revents() {
                Some(r) if !r.is_empty() => r,
                _ => continue,
            };
            let _ = revents;

            let done = dispatch(supervisor, sigfd, &mut registered[i]);
            if done {
                finished.push(i);
            }
        }

        for i in finished.into_iter().rev() {
            let r = registered.remove(i);
            let _ = close(r.fd);
        }
    }

    Ok(())
}

/// Handles one ready descriptor. Returns `true` if it should be
/// unregistered (hangup/EOF, or a terminal event that ends supervision of
/// that descriptor).
fn dispatch(supervisor: &mut Supervisor, sigfd: &mut SigChldFd, registered: &mut Registered) -> bool {
    match &mut registered.kind {
        DescriptorKind::SigFd => on_sigchld(supervisor, sigfd),
        DescriptorKind::StdoutCompare { expected } => on_stdout_compare(supervisor, registered.fd, expected),
        DescriptorKind::StdoutBuffer { buf } => on_read_into_buffer(registered.fd, buf),
        DescriptorKind::StderrBuffer { buf } => on_read_into_buffer(registered.fd, buf),
    }
}

fn on_read_into_buffer(fd: RawFd, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; READ_CHUNK];
    match read(fd, &mut chunk) {
        Ok(0) => true,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            false
        }
        Err(nix::Error::EAGAIN) => false,
        Err(_) => true,
    }
}

fn on_stdout_compare(supervisor: &mut Supervisor, fd: RawFd, expected: &mut File) -> bool {
    let mut chunk = [0u8; READ_CHUNK];
    match read(fd, &mut chunk) {
        Ok(0) => {
            let cur = expected.stream_position().unwrap_or(0);
            let end = expected.seek(SeekFrom::End(0)).unwrap_or(cur);
            let _ = expected.seek(SeekFrom::Start(cur));
            if cur != end {
                if supervisor.verdict.set_if_unset(Verdict::WA) {
                    log_debug!("pid {} produced less output than expected", supervisor.pid);
                }
            }
            true
        }
        Ok(n) => {
            let data = &chunk[..n];
            let mut expected_buf = vec![0u8; n];
            let got = expected.read(&mut expected_buf).unwrap_or(0);
            if got != n || &expected_buf[..got] != data {
                if supervisor.verdict.set_if_unset(Verdict::WA) {
                    log_debug!("pid {} diverged from expected output", supervisor.pid);
                }
                kill_child(supervisor);
                true
            } else {
                false
            }
        }
        Err(nix::Error::EAGAIN) => false,
        Err(_) => true,
    }
}

fn on_sigchld(supervisor: &mut Supervisor, sigfd: &mut SigChldFd) -> bool {
    match sigfd.read() {
        Ok(_) => {}
        Err(_) => return false,
    }

    let mut status: i32 = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe {
        libc::wait4(
            supervisor.pid.as_raw(),
            &mut status,
            libc::WUNTRACED | libc::WNOHANG,
            &mut usage,
        )
    };

    if ret == 0 {
        // Spurious wakeup: the status hasn't changed yet.
        return false;
    }
    if ret < 0 {
        return false;
    }

    if !wifstopped(status) {
        supervisor.cputime = Some(rusage_cputime(&usage));
        supervisor.exit_code = if wifexited(status) { wexitstatus(status) } else { -1 };
        return true;
    }

    let stopsig = wstopsig(status);
    if stopsig != libc::SIGTRAP {
        if supervisor.verdict.set_if_unset(Verdict::RE) {
            log_warn!(
                "pid {} stopped on signal {} (not a syscall trap)",
                supervisor.pid,
                stopsig
            );
        }
        kill_child(supervisor);
        return true;
    }

    handle_syscall_stop(supervisor);
    false
}

fn handle_syscall_stop(supervisor: &mut Supervisor) {
    let regs = match ptrace::getregs(supervisor.pid) {
        Ok(r) => r,
        Err(_) => return,
    };

    let num = supervisor.arch.syscall_number(&regs);

    match supervisor.arch.classify(num) {
        SyscallClass::Restricted(which) => {
            use crate::arch::RestrictedSyscall::*;
            let allowed = match which {
                Open | Openat => supervisor.arch.allow_open_like(&regs, num),
                Socket | Creat => false,
            };

            if !allowed {
                if supervisor.verdict.set_if_unset(Verdict::RF) {
                    log_warn!("pid {} attempted a restricted syscall ({:?})", supervisor.pid, which);
                }
                kill_child(supervisor);
                return;
            }
        }
        SyscallClass::Memory(which) => {
            let ret = supervisor.arch.syscall_return(&regs);
            if ret != -(libc::ENOSYS as i64) {
                match read_statm(supervisor.pid) {
                    Ok((vm, rss)) => {
                        supervisor.maxvm = supervisor.maxvm.max(vm);
                        supervisor.maxrss = supervisor.maxrss.max(rss);

                        if let Some(vm_limit) = supervisor.limits.vm_pages {
                            if supervisor.maxvm > vm_limit {
                                if supervisor.verdict.set_if_unset(Verdict::ML) {
                                    log_warn!(
                                        "pid {} exceeded its virtual memory budget via {:?}",
                                        supervisor.pid,
                                        which
                                    );
                                }
                                kill_child(supervisor);
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        // The child may have already been reaped between
                        // the syscall-exit stop and this read; either way
                        // a statm read failure here is an infrastructure
                        // fault, not a verdict the submission earned.
                        log_error!("pid {} statm read failed after {:?}: {}", supervisor.pid, which, e);
                        supervisor.verdict.set_if_unset(Verdict::SE);
                        kill_child(supervisor);
                        return;
                    }
                }
            }
        }
        SyscallClass::Other => {}
    }

    let _ = supervisor.arch.continue_to_next_syscall_stop(supervisor.pid);
}

fn read_statm(pid: Pid) -> Result<(u64, u64)> {
    let path = format!("/proc/{}/statm", pid);
    let contents = std::fs::read_to_string(&path).map_err(|e| Error::io(path, e))?;
    let mut fields = contents.split_whitespace();
    let vm = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let rss = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    Ok((vm, rss))
}

fn rusage_cputime(usage: &libc::rusage) -> f64 {
    let user = usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1e6;
    let sys = usage.ru_stime.tv_sec as f64 + usage.ru_stime.tv_usec as f64 / 1e6;
    user + sys
}

/// Best-effort, idempotent. A kill never itself produces a verdict - the
/// event that requested it already set one.
fn kill_child(supervisor: &mut Supervisor) {
    if !supervisor.killed {
        supervisor.killed = true;
        let _ = nix::sys::signal::kill(supervisor.pid, Signal::SIGKILL);
    }
}

impl<'a> Supervisor<'a> {
    fn finalize(&mut self) {
        if !self.verdict.is_set() {
            let v = if self.exit_code == 0 { Verdict::AC } else { Verdict::RE };
            self.verdict.upgrade(v);

            if let (Some(limit), Some(cputime)) = (self.limits.time_seconds, self.cputime) {
                if cputime > limit {
                    self.verdict.upgrade(Verdict::TL);
                }
            }

            if self.verdict.get() == Some(Verdict::RE) {
                if let Some(rss_limit) = self.limits.rss_pages {
                    if self.maxrss > rss_limit {
                        self.verdict.upgrade(Verdict::ML);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wait_status_decoding_matches_libc_macros() {
        // WIFSTOPPED(status) for a SIGTRAP stop: (status & 0xff) == 0x7f
        let stopped_on_trap: i32 = (libc::SIGTRAP << 8) | 0x7f;
        assert!(wifstopped(stopped_on_trap));
        assert_eq!(wstopsig(stopped_on_trap), libc::SIGTRAP);

        let exited_zero: i32 = 0;
        assert!(wifexited(exited_zero));
        assert_eq!(wexitstatus(exited_zero), 0);
    }

    #[test]
    fn rusage_cputime_sums_user_and_sys() {
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        usage.ru_utime.tv_sec = 1;
        usage.ru_utime.tv_usec = 500_000;
        usage.ru_stime.tv_sec = 0;
        usage.ru_stime.tv_usec = 250_000;
        assert!((rusage_cputime(&usage) - 1.75).abs() < 1e-9);
    }
}
