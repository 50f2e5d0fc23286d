//! Sandbox session: stages a submission into an ephemeral, MAC-labeled
//! directory, drives the compiler-family's compile step, then delegates to
//! [`crate::supervisor`] for the traced run. Mirrors `gulag.runner.Runner`.

use std::fs::{self, File};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::arch::Arch;
use crate::compiler::CompilerFamily;
use crate::config::Limits;
use crate::error::{Error, Result};
use crate::label::{self, Label};
use crate::supervisor::{self, RunOutcome, StderrTarget, StdoutTarget};
use crate::which;

const TEMPDIR_PREFIX: &str = ".judge-core-";

/// Owns one submission's sandbox directory for its full lifetime: created
/// at construction, recursively removed on drop regardless of how the
/// session ends. Mirrors `Runner.__enter__`/`__exit__` (a context manager
/// in the original, where `rmtree` runs in `__exit__` unconditionally).
pub struct Runner {
    arch: Arc<dyn Arch>,
    tempdir: PathBuf,
    src_path: PathBuf,
    filename: String,
    own_label: Label,
    family: CompilerFamily,
    compile_level: String,
    run_level: String,
}

impl Runner {
    /// Derives compile/run labels from the caller's own security context
    /// and creates the sandbox directory under `tempdir_root`, labeled for
    /// the compile phase. `arch` is shared across every `Runner` a `Judge`
    /// creates, since it is purely a syscall-table lookup with no
    /// per-submission state.
    pub fn new(
        src_path: impl AsRef<Path>,
        filename: Option<String>,
        family: CompilerFamily,
        compile_level: impl Into<String>,
        run_level: impl Into<String>,
        tempdir_root: impl AsRef<Path>,
        arch: Arc<dyn Arch>,
    ) -> Result<Runner> {
        if !label::is_selinux_enabled() {
            return Err(Error::MacDisabled);
        }

        let own_label = label::getcon()?;
        let src_path = src_path.as_ref().to_path_buf();
        let filename = filename.unwrap_or_else(|| {
            src_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "submission".to_string())
        });
        let compile_level = compile_level.into();
        let run_level = run_level.into();

        let dir_label = own_label.as_file_context(label::SANDBOX_FILE_TYPE, &compile_level);
        let tempdir = {
            let _guard = label::ScopedFsCreateContext::enter(&dir_label)?;
            make_tempdir(tempdir_root.as_ref())?
        };

        Ok(Runner {
            arch,
            tempdir,
            src_path,
            filename,
            own_label,
            family,
            compile_level,
            run_level,
        })
    }

    fn filecon(&self, level: &str) -> Label {
        self.own_label.as_file_context(label::SANDBOX_FILE_TYPE, level)
    }

    fn execcon(&self, level: &str) -> Label {
        self.own_label.with_type_and_level(label::SANDBOX_TYPE, level)
    }

    fn copy_into(&self, src: &Path, dest_name: &str, level: &str) -> Result<()> {
        let label = self.filecon(level);
        let _guard = label::ScopedFsCreateContext::enter(&label)?;
        let dest = self.tempdir.join(dest_name);
        fs::copy(src, &dest).map_err(|e| Error::io(&dest, e))?;
        Ok(())
    }

    /// Stages an auxiliary input file (beyond the submission source)
    /// alongside it under the run label. Mirrors `Runner.copy`.
    pub fn copy(&self, src: &Path) -> Result<()> {
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        self.copy_into(src, &name, &self.run_level.clone())
    }

    /// Override point for language families that need extra headroom
    /// beyond the judge-wide grace factors (e.g. a JIT warmup allowance).
    /// The default, like every mixin in the original, is the identity.
    pub fn adapt_limit(&self, limits: Limits) -> Limits {
        limits
    }

    /// Override point translating raw usage into a normalized,
    /// cross-run-comparable figure for `benchmark()`. Identity by default.
    pub fn normalize_usage(&self, cputime: f64, maxrss: u64, maxvm: u64) -> (f64, u64, u64) {
        (cputime, maxrss, maxvm)
    }

    /// Copies the submission source into the sandbox and, for families
    /// that need one, invokes the compiler with merged stdout/stderr
    /// captured as diagnostic output. Returns `(exit_code, diagnostics)`;
    /// a non-zero exit code means the sandbox directory is left at
    /// compile-label and the caller should surface a compile-error
    /// verdict without attempting a run.
    pub fn compile(&self, extra_args: &[String]) -> Result<(i32, Vec<u8>)> {
        if !self.family.needs_compile() {
            self.copy_into(&self.src_path, &self.filename, &self.compile_level.clone())?;
            label::set_file_label(&self.tempdir, &self.filecon(&self.run_level))?;
            return Ok((0, Vec::new()));
        }

        self.copy_into(&self.src_path, &self.filename, &self.compile_level.clone())?;

        let compiler_name = self
            .family
            .compiler_name()
            .expect("needs_compile() implies a compiler name");
        let path_env = std::env::var("PATH").unwrap_or_default();
        let compiler_path = which::which(compiler_name, &path_env)
            .ok_or_else(|| Error::CompilerNotFound(compiler_name.to_string()))?;

        let argv = self.family.compile_args(extra_args, &self.filename);
        let devnull = File::open("/dev/null").map_err(|e| Error::io("/dev/null", e))?;

        let fs_label = self.filecon(&self.compile_level);
        let exec_label = self.execcon(&self.compile_level);

        let child = {
            let _fscreate = label::ScopedFsCreateContext::enter(&fs_label)?;
            let _exec = label::ScopedExecContext::enter(&exec_label)?;

            Command::new(&compiler_path)
                .args(&argv)
                .current_dir(&self.tempdir)
                .env_clear()
                .env("PATH", &path_env)
                .env("TMPDIR", &self.tempdir)
                .stdin(Stdio::from(devnull))
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| Error::io(&compiler_path, e))?
        };

        let output = child
            .wait_with_output()
            .map_err(|e| Error::io(&compiler_path, e))?;
        let mut diagnostics = output.stdout;
        diagnostics.extend_from_slice(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        if code != 0 {
            return Ok((code, diagnostics));
        }

        label::set_file_label(&self.tempdir, &self.filecon(&self.run_level))?;

        let target = self.tempdir.join(self.family.target_filename(&self.filename));
        label::set_file_label(&target, &self.filecon(&self.run_level))?;

        Ok((code, diagnostics))
    }

    /// Opens `path` under the run label, applied via `fscreate` if the
    /// open creates a new file. For an existing file opened read-only
    /// (and not `/dev/null`), narrows its label to the run level first if
    /// it is currently broader. Mirrors `Runner.open`.
    pub fn open(&self, path: &Path, writable: bool) -> Result<File> {
        let label = self.filecon(&self.run_level);

        let file = {
            let _guard = label::ScopedFsCreateContext::enter(&label)?;
            if writable {
                File::create(path)
            } else {
                File::open(path)
            }
            .map_err(|e| Error::io(path, e))?
        };

        if !writable && path != Path::new("/dev/null") {
            label::narrow_to_run_level(path, Some(file.as_raw_fd()), &label)?;
        }

        Ok(file)
    }

    fn run_executable_and_args(&self) -> Result<(PathBuf, Vec<String>)> {
        let args = self.family.run_args(&self.filename);

        let executable = match &self.family {
            CompilerFamily::Binary { .. } => self.family.run_executable(&self.filename),
            CompilerFamily::Bytecode { interpreter, .. } | CompilerFamily::Script { interpreter } => {
                let path_env = std::env::var("PATH").unwrap_or_default();
                which::which(interpreter, &path_env)
                    .ok_or_else(|| Error::CompilerNotFound(interpreter.clone()))?
            }
        };

        Ok((executable, args))
    }

    /// Runs the compiled (or staged) artifact to completion, comparing
    /// against or writing directly to `stdout` per `stdout`'s variant,
    /// discarding stderr. Mirrors `Runner.run`.
    pub fn run(&self, stdin: File, stdout: StdoutTarget, limits: Limits) -> Result<RunOutcome> {
        let (executable, args) = self.run_executable_and_args()?;

        let exec_label = self.execcon(&self.run_level);
        let _exec = label::ScopedExecContext::enter(&exec_label)?;

        supervisor::spawn_and_run(
            self.arch.as_ref(),
            &executable,
            &args,
            &[],
            &self.tempdir,
            stdin,
            stdout,
            StderrTarget::Discard,
            limits,
        )
    }

    /// Like [`Runner::run`], but captures both stdout and stderr for
    /// human inspection rather than comparing against a reference.
    /// Mirrors `Runner.debug`.
    pub fn debug(&self, stdin: File, limits: Limits) -> Result<RunOutcome> {
        let (executable, args) = self.run_executable_and_args()?;

        let exec_label = self.execcon(&self.run_level);
        let _exec = label::ScopedExecContext::enter(&exec_label)?;

        supervisor::spawn_and_run(
            self.arch.as_ref(),
            &executable,
            &args,
            &[],
            &self.tempdir,
            stdin,
            StdoutTarget::Capture,
            StderrTarget::Capture,
            limits,
        )
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.tempdir) {
            crate::log::log_warn!("failed to remove sandbox directory {:?}: {}", self.tempdir, e);
        }
    }
}

fn make_tempdir(root: &Path) -> Result<PathBuf> {
    for _ in 0..8 {
        let suffix: u64 = rand::random();
        let candidate = root.join(format!("{}{:016x}", TEMPDIR_PREFIX, suffix));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::io(candidate, e)),
        }
    }
    Err(Error::io(
        root,
        io::Error::new(io::ErrorKind::AlreadyExists, "exhausted retries allocating a sandbox directory"),
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn make_tempdir_creates_a_unique_directory() {
        let root = tempfile::tempdir().unwrap();
        let a = make_tempdir(root.path()).unwrap();
        let b = make_tempdir(root.path()).unwrap();
        assert!(a.exists());
        assert!(b.exists());
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with(TEMPDIR_PREFIX));
    }
}
