//! The caller-facing entry point bundling [`crate::runner::Runner`] and
//! [`crate::supervisor`] behind the two operations spec.md documents as
//! this crate's external interface: `judge` and `benchmark`. Mirrors
//! `gulag.judge.Judge`, minus the `_runners`/`_langs` lookup tables the
//! spec places out of scope - callers hand in an already-resolved
//! [`CompilerFamily`] and an already-split argument vector instead of a
//! `cmdline` template string.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::arch::{self, Arch};
use crate::compiler::CompilerFamily;
use crate::config::{JudgeConfig, Limits};
use crate::error::{Error, Result};
use crate::runner::Runner;
use crate::supervisor::StdoutTarget;
use crate::verdict::Verdict;

/// `(input_path, expected_output_path, auxiliary_paths)`, spec.md §6's
/// `files` tuple. `expected_output` need not exist yet when passed to
/// [`Judge::benchmark`] - it is generated by one reference run.
#[derive(Clone, Debug)]
pub struct Files {
    pub input: PathBuf,
    pub expected_output: PathBuf,
    pub auxiliary: Vec<PathBuf>,
}

impl Files {
    pub fn new(input: impl Into<PathBuf>, expected_output: impl Into<PathBuf>) -> Files {
        Files {
            input: input.into(),
            expected_output: expected_output.into(),
            auxiliary: Vec::new(),
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: Vec<PathBuf>) -> Files {
        self.auxiliary = auxiliary;
        self
    }
}

/// A full judge result: verdict plus resource accounting, matching
/// `gulag.judge.Judge.judge`'s return tuple.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JudgeOutcome {
    pub verdict: Verdict,
    pub exit_code: i32,
    pub cputime: f64,
    pub maxrss: u64,
    pub maxvm: u64,
}

/// Bundles judge-wide configuration (grace factors, absolute ceilings,
/// sandbox labels) with the architecture adapter every submission's
/// [`Runner`] shares. One `Judge` is built once per judge process and
/// reused across submissions; each `judge`/`benchmark` call creates and
/// tears down its own sandbox session.
pub struct Judge {
    config: JudgeConfig,
    arch: Arc<dyn Arch>,
    tempdir_root: PathBuf,
}

impl Judge {
    pub fn new(config: JudgeConfig, tempdir_root: impl Into<PathBuf>) -> Result<Judge> {
        let arch: Arc<dyn Arch> = Arc::from(arch::detect()?);
        Ok(Judge {
            config,
            arch,
            tempdir_root: tempdir_root.into(),
        })
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    fn new_runner(
        &self,
        source_path: &Path,
        filename: Option<String>,
        compiler: CompilerFamily,
    ) -> Result<Runner> {
        Runner::new(
            source_path,
            filename,
            compiler,
            self.config.compile_level.clone(),
            self.config.run_level.clone(),
            &self.tempdir_root,
            Arc::clone(&self.arch),
        )
    }

    /// Compiles and runs one submission against one test case. On a
    /// compile error, writes the compiler's merged stdout+stderr to
    /// `error_file` and returns `(CE, -1, 0.0, 0, 0)` without attempting a
    /// run, matching `gulag.judge.Judge.judge`.
    pub fn judge(
        &self,
        compile_args: &[String],
        compiler: CompilerFamily,
        source_path: &Path,
        files: &Files,
        error_file: &mut dyn Write,
        limits: Limits,
        filename: Option<String>,
    ) -> Result<JudgeOutcome> {
        let runner = self.new_runner(source_path, filename, compiler)?;

        let (exit_code, diagnostics) = runner.compile(compile_args)?;
        if exit_code != 0 {
            error_file
                .write_all(&diagnostics)
                .map_err(|e| Error::io("error_file", e))?;
            return Ok(JudgeOutcome {
                verdict: Verdict::CE,
                exit_code: -1,
                cputime: 0.0,
                maxrss: 0,
                maxvm: 0,
            });
        }

        for aux in &files.auxiliary {
            runner.copy(aux)?;
        }

        let adapted = self.config.adapt(limits);

        let stdin = runner.open(&files.input, false)?;
        let expected = runner.open(&files.expected_output, false)?;

        let outcome = runner.run(stdin, StdoutTarget::Compare(expected), adapted)?;

        Ok(JudgeOutcome {
            verdict: outcome.verdict,
            exit_code: outcome.exit_code,
            // An open question per spec.md §9: `cputime` can be absent if
            // the child was killed before any exit-status wait4 returned.
            // Resolved in DESIGN.md: reported as 0.0, matching what the
            // finalization upgrade rule itself treats as "no CPU time to
            // compare against the limit".
            cputime: outcome.cputime.unwrap_or(0.0),
            maxrss: outcome.maxrss,
            maxvm: outcome.maxvm,
        })
    }

    /// Runs a submission `times` times and returns averaged resource
    /// usage, generating `files.expected_output` by one reference run
    /// first if it does not already exist. Returns `Err` on compile
    /// failure or any non-`AC` verdict, matching
    /// `gulag.judge.Judge.benchmark`'s `raise`.
    pub fn benchmark(
        &self,
        compile_args: &[String],
        compiler: CompilerFamily,
        source_path: &Path,
        files: &Files,
        times: u32,
        filename: Option<String>,
    ) -> Result<(f64, u64, u64)> {
        assert!(times > 0, "benchmark must run at least once");

        let runner = self.new_runner(source_path, filename, compiler)?;

        let (exit_code, diagnostics) = runner.compile(compile_args)?;
        if exit_code != 0 {
            return Err(Error::BenchmarkCompileError(
                String::from_utf8_lossy(&diagnostics).into_owned(),
            ));
        }

        for aux in &files.auxiliary {
            runner.copy(aux)?;
        }

        let limits = self.config.adapt(Limits::default());

        if !files.expected_output.exists() {
            let stdin = runner.open(&files.input, false)?;
            let stdout = runner.open(&files.expected_output, true)?;
            let reference = runner.run(stdin, StdoutTarget::WriteDirect(stdout), limits)?;
            if reference.verdict != Verdict::AC {
                return Err(Error::BenchmarkNotAccepted(reference.verdict));
            }
        }

        let mut total_cputime = 0.0;
        let mut total_rss: u64 = 0;
        let mut total_vm: u64 = 0;

        for _ in 0..times {
            let stdin = runner.open(&files.input, false)?;
            let expected = runner.open(&files.expected_output, false)?;
            let outcome = runner.run(stdin, StdoutTarget::Compare(expected), limits)?;

            if outcome.verdict != Verdict::AC {
                return Err(Error::BenchmarkNotAccepted(outcome.verdict));
            }

            let (cputime, rss, vm) =
                runner.normalize_usage(outcome.cputime.unwrap_or(0.0), outcome.maxrss, outcome.maxvm);
            total_cputime += cputime;
            total_rss += rss;
            total_vm += vm;
        }

        Ok((
            total_cputime / times as f64,
            total_rss / times as u64,
            total_vm / times as u64,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn files_builder_defaults_to_no_auxiliary() {
        let files = Files::new("in.txt", "out.txt");
        assert!(files.auxiliary.is_empty());
        assert_eq!(files.input, PathBuf::from("in.txt"));
        assert_eq!(files.expected_output, PathBuf::from("out.txt"));
    }

    #[test]
    fn files_builder_attaches_auxiliary_paths() {
        let files = Files::new("in.txt", "out.txt")
            .with_auxiliary(vec![PathBuf::from("data.csv")]);
        assert_eq!(files.auxiliary, vec![PathBuf::from("data.csv")]);
    }
}
