//! The verdict enumeration and its single-assignment "sticky" cell.
//!
//! Mirrors `gulag.verdict`: ten terminal classifications for a judged run.
//! `QU` ("in queue") and `CJ` ("can't be judged") belong to the external
//! verdict dispatcher and are not representable here - by the time a
//! submission reaches this crate it is already running or compiling.

use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Verdict {
    /// Accepted.
    AC,
    /// Presentation error.
    PE,
    /// Wrong answer.
    WA,
    /// Compile error.
    CE,
    /// Runtime error.
    RE,
    /// Time limit exceeded.
    TL,
    /// Memory limit exceeded.
    ML,
    /// Output limit exceeded.
    OL,
    /// Submission error (infrastructure fault attributed to the submission).
    SE,
    /// Restricted function: the child attempted a forbidden syscall.
    RF,
}

impl Verdict {
    pub fn code(self) -> &'static str {
        match self {
            Verdict::AC => "AC",
            Verdict::PE => "PE",
            Verdict::WA => "WA",
            Verdict::CE => "CE",
            Verdict::RE => "RE",
            Verdict::TL => "TL",
            Verdict::ML => "ML",
            Verdict::OL => "OL",
            Verdict::SE => "SE",
            Verdict::RF => "RF",
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Verdict::AC => "Accepted",
            Verdict::PE => "Presentation Error",
            Verdict::WA => "Wrong Answer",
            Verdict::CE => "Compile Error",
            Verdict::RE => "Runtime Error",
            Verdict::TL => "Time Limit Exceeded",
            Verdict::ML => "Memory Limit Exceeded",
            Verdict::OL => "Output Limit Exceeded",
            Verdict::SE => "Submission Error",
            Verdict::RF => "Restricted Function",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A single-assignment cell for the verdict of one run. "First setter
/// wins": once a verdict is recorded, later `set_if_unset` calls are no-ops.
/// Finalization reads the cell and may apply the documented `RE -> TL` /
/// `RE -> ML` upgrades directly via `set_unconditionally`.
#[derive(Default, Debug)]
pub struct VerdictCell(Option<Verdict>);

impl VerdictCell {
    pub fn new() -> VerdictCell {
        VerdictCell(None)
    }

    pub fn get(&self) -> Option<Verdict> {
        self.0
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Sets the verdict iff it is not already set. Returns `true` if this
    /// call was the one that set it.
    pub fn set_if_unset(&mut self, v: Verdict) -> bool {
        if self.0.is_none() {
            self.0 = Some(v);
            true
        } else {
            false
        }
    }

    /// Used only by finalization's documented upgrade rules.
    pub fn upgrade(&mut self, v: Verdict) {
        self.0 = Some(v);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_setter_wins() {
        let mut cell = VerdictCell::new();
        assert!(cell.set_if_unset(Verdict::WA));
        assert!(!cell.set_if_unset(Verdict::RF));
        assert_eq!(cell.get(), Some(Verdict::WA));
    }

    #[test]
    fn upgrade_overrides_regardless() {
        let mut cell = VerdictCell::new();
        cell.set_if_unset(Verdict::RE);
        cell.upgrade(Verdict::TL);
        assert_eq!(cell.get(), Some(Verdict::TL));
    }
}
