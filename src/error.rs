use std::path::PathBuf;

use thiserror::Error;

/// Infrastructure failures that abort a submission before a verdict can be
/// formed. Verdicts (`AC`, `WA`, `CE`, ...) are never represented here -
/// they are ordinary results returned from `judge`/`benchmark`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported architecture {0:?}: ptrace-based judging requires a known register layout")]
    UnsupportedArch(String),

    #[error("SELinux (or a compatible MAC subsystem) is not enabled on this host")]
    MacDisabled,

    #[error("compiler {0:?} not found on PATH")]
    CompilerNotFound(String),

    #[error("child process did not reach the initial trace-stop")]
    ChildDidNotStop,

    #[error("child process stopped on an unexpected signal before exec")]
    UnexpectedInitialStop,

    #[error("no runner is registered for cmdline {0:?}")]
    UnknownCmdline(String),

    #[error("security context {0:?} does not have the expected user:role:type:level shape")]
    MalformedLabel(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Nix(#[from] nix::Error),

    #[error(transparent)]
    Io0(#[from] std::io::Error),

    #[error("benchmark run did not accept: {0:?}")]
    BenchmarkNotAccepted(crate::verdict::Verdict),

    #[error("benchmark run failed to compile:\n{0}")]
    BenchmarkCompileError(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
