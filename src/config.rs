//! Judge-wide configuration: grace factors applied on top of per-test
//! limits, and optional absolute ceilings that clamp the result. Mirrors
//! the keyword defaults of `gulag.judge.Judge.__init__`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A `(time, rss, vm)` triple where any component may be absent, meaning
/// "no ceiling". Pages for `rss`/`vm`, seconds for `time`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub time_seconds: Option<f64>,
    pub rss_pages: Option<u64>,
    pub vm_pages: Option<u64>,
}

impl Limits {
    pub fn new(
        time_seconds: Option<f64>,
        rss_pages: Option<u64>,
        vm_pages: Option<u64>,
    ) -> Limits {
        Limits {
            time_seconds,
            rss_pages,
            vm_pages,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub time_grace_factor: f64,
    pub rss_grace_factor: f64,
    pub vm_grace_factor: f64,

    /// Absolute ceilings the judge will never exceed regardless of what a
    /// per-test limit, scaled by the grace factors above, asked for.
    pub time_limit: Option<f64>,
    pub rss_limit: Option<u64>,
    pub vm_limit: Option<u64>,

    /// The MLS level a sandbox directory and its compile-phase artifacts
    /// are labeled with - broad enough to let the compiler touch its own
    /// scratch files. Mirrors the `level` half of the label tuple
    /// spec.md's data model assigns to "compile-label".
    pub compile_level: String,
    /// The MLS level the sandbox is relabeled to once compilation
    /// succeeds, and the judged child is executed under. Strictly
    /// narrower than `compile_level` - differs in at least one category -
    /// so [`crate::label::Label::is_broader_than`] has something to catch
    /// when an auxiliary input file was staged too broadly.
    pub run_level: String,
}

impl Default for JudgeConfig {
    fn default() -> JudgeConfig {
        JudgeConfig {
            time_grace_factor: 5.0,
            rss_grace_factor: 5.0,
            vm_grace_factor: 5.0,
            time_limit: None,
            rss_limit: None,
            vm_limit: None,
            compile_level: "s0:c0.c1023".to_string(),
            run_level: "s0:c0.c0".to_string(),
        }
    }
}

impl JudgeConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<JudgeConfig> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&contents)
            .map_err(|e| Error::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Scale a per-test `Limits` triple by the configured grace factors and
    /// clamp by the configured absolute ceilings. Mirrors
    /// `Judge._run`'s `adapt_limit(...)` + `min(...)` sequence.
    pub fn adapt(&self, limits: Limits) -> Limits {
        let time_seconds = limits
            .time_seconds
            .map(|t| t * self.time_grace_factor)
            .map(|t| match self.time_limit {
                Some(ceiling) => t.min(ceiling),
                None => t,
            })
            .or(self.time_limit);

        let rss_pages = scale_and_clamp(limits.rss_pages, self.rss_grace_factor, self.rss_limit);
        let vm_pages = scale_and_clamp(limits.vm_pages, self.vm_grace_factor, self.vm_limit);

        Limits {
            time_seconds,
            rss_pages,
            vm_pages,
        }
    }
}

fn scale_and_clamp(value: Option<u64>, factor: f64, ceiling: Option<u64>) -> Option<u64> {
    let scaled = value.map(|v| ((v as f64) * factor) as u64);
    match (scaled, ceiling) {
        (Some(v), Some(c)) => Some(v.min(c)),
        (Some(v), None) => Some(v),
        (None, c) => c,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_grace_factors_are_five() {
        let cfg = JudgeConfig::default();
        assert_eq!(cfg.time_grace_factor, 5.0);
        assert_eq!(cfg.rss_grace_factor, 5.0);
        assert_eq!(cfg.vm_grace_factor, 5.0);
    }

    #[test]
    fn adapt_scales_then_clamps() {
        let mut cfg = JudgeConfig::default();
        cfg.rss_limit = Some(1000);
        let out = cfg.adapt(Limits::new(Some(1.0), Some(300), None));
        assert_eq!(out.rss_pages, Some(1000));
        assert_eq!(out.time_seconds, Some(5.0));
        assert_eq!(out.vm_pages, None);
    }

    #[test]
    fn adapt_without_ceiling_just_scales() {
        let cfg = JudgeConfig::default();
        let out = cfg.adapt(Limits::new(None, Some(100), Some(200)));
        assert_eq!(out.rss_pages, Some(500));
        assert_eq!(out.vm_pages, Some(1000));
        assert_eq!(out.time_seconds, None);
    }
}
