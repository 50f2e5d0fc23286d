//! Minimal level-gated logger, in the style of this codebase's `rd` lineage:
//! a `lazy_static` global rather than a process-wide logging facade, since
//! this crate is linked into a single judge process and never needs to
//! reconfigure per-module levels at runtime.

use std::env;
use std::io::Write;
use std::sync::Mutex;

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Debug)]
pub enum LogLevel {
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

lazy_static! {
    static ref LOG_LEVEL: Mutex<LogLevel> = Mutex::new(default_level());
}

fn default_level() -> LogLevel {
    match env::var("RD_JUDGE_LOG").as_deref() {
        Ok("debug") => LogDebug,
        Ok("info") => LogInfo,
        Ok("warn") => LogWarn,
        Ok("error") => LogError,
        _ => LogWarn,
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

#[doc(hidden)]
pub fn log_enabled(level: LogLevel) -> bool {
    level <= *LOG_LEVEL.lock().unwrap()
}

#[doc(hidden)]
pub fn log_line(level: LogLevel, module: &str, args: std::fmt::Arguments) {
    if log_enabled(level) {
        let _ = writeln!(
            std::io::stderr(),
            "[{}] {}: {}",
            level_name(level),
            module,
            args
        );
    }
}

macro_rules! rd_log {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::log_line($level, module_path!(), format_args!($($arg)*))
    };
}

macro_rules! log_error {
    ($($arg:tt)*) => { rd_log!($crate::log::LogLevel::LogError, $($arg)*) };
}

macro_rules! log_warn {
    ($($arg:tt)*) => { rd_log!($crate::log::LogLevel::LogWarn, $($arg)*) };
}

macro_rules! log_info {
    ($($arg:tt)*) => { rd_log!($crate::log::LogLevel::LogInfo, $($arg)*) };
}

macro_rules! log_debug {
    ($($arg:tt)*) => { rd_log!($crate::log::LogLevel::LogDebug, $($arg)*) };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
pub(crate) use rd_log;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn debug_is_more_verbose_than_error() {
        assert!(LogDebug > LogError);
        assert!(LogWarn > LogError);
    }
}
