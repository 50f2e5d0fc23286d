//! The sandboxed execution core of a contest judge: compiles a submitted
//! source program into a labeled, ephemeral sandbox, then runs it under a
//! `ptrace`-based supervisor that enforces CPU/RSS/VM ceilings, filters
//! disallowed syscalls, and compares its output against a reference.
//!
//! The top-level verdict dispatcher, the language-name-to-invocation-
//! template lookup table, and the surrounding judge service's CLI are out
//! of scope - this crate exposes [`judge::Judge`] as the seam a caller
//! wires those into.

#[macro_use]
extern crate lazy_static;

pub mod log;

pub mod arch;
pub mod compiler;
pub mod config;
pub mod error;
pub mod judge;
pub mod label;
pub mod limits;
pub mod runner;
pub mod signalfd;
pub mod supervisor;
pub mod verdict;
pub mod which;

pub use error::{Error, Result};
pub use judge::{Files, Judge, JudgeOutcome};
pub use verdict::Verdict;
