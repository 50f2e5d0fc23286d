//! Mandatory-access-control label handling.
//!
//! `gulag.runner` leans on `pyselinux` (`getcon`, `setfscreatecon`,
//! `setexeccon`, `f[get|set]filecon`) for every one of these operations.
//! There is no equivalent binding crate in this corpus, so this module
//! talks to the same kernel interface `libselinux` itself is a thin
//! wrapper over: the `security.selinux` extended attribute for file
//! labels (via the `xattr` crate), and the per-process `/proc/self/attr/*`
//! pseudo-files for the "next file created" and "next exec'd" context
//! overrides. `is_selinux_enabled()` reads `/sys/fs/selinux/enabled`,
//! the same file libselinux's own `is_selinux_enabled()` checks.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const SANDBOX_TYPE: &str = "sandbox_t";
pub const SANDBOX_FILE_TYPE: &str = "sandbox_file_t";

const SELINUX_XATTR: &str = "security.selinux";

/// A decoded `user:role:type:level` security context. Only `type` and
/// `level` ever vary between the compile and run phases.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Label {
    pub user: String,
    pub role: String,
    pub type_: String,
    pub level: String,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.user, self.role, self.type_, self.level)
    }
}

impl Label {
    pub fn parse(context: &str) -> Result<Label> {
        let mut parts = context.splitn(4, ':');
        let user = parts.next();
        let role = parts.next();
        let type_ = parts.next();
        let level = parts.next();

        match (user, role, type_, level) {
            (Some(user), Some(role), Some(type_), Some(level)) => Ok(Label {
                user: user.to_string(),
                role: role.to_string(),
                type_: type_.to_string(),
                level: level.to_string(),
            }),
            _ => Err(Error::MalformedLabel(context.to_string())),
        }
    }

    pub fn with_type_and_level(&self, type_: &str, level: &str) -> Label {
        Label {
            user: self.user.clone(),
            role: self.role.clone(),
            type_: type_.to_string(),
            level: level.to_string(),
        }
    }

    /// The `object_r` file-context variant of this label at the given
    /// level, used for files created inside the sandbox.
    pub fn as_file_context(&self, file_type: &str, level: &str) -> Label {
        Label {
            user: self.user.clone(),
            role: "object_r".to_string(),
            type_: file_type.to_string(),
            level: level.to_string(),
        }
    }

    /// The set of integer categories encoded in this label's level, e.g.
    /// `"s0:c0.c1023"` -> `{0, 1, ..., 1023}`. A level with no category
    /// set (just a sensitivity, e.g. `"s0"`) yields the empty set.
    pub fn categories(&self) -> HashSet<u32> {
        parse_categories(&self.level)
    }

    /// True iff `self` carries at least one category `run` does not -
    /// i.e. `self` is strictly broader than `run` and must be narrowed
    /// before a program confined to `run`'s level may read it.
    pub fn is_broader_than(&self, run: &Label) -> bool {
        self.categories().difference(&run.categories()).next().is_some()
    }
}

fn parse_categories(level: &str) -> HashSet<u32> {
    let mut result = HashSet::new();

    let categories = match level.splitn(2, ':').nth(1) {
        Some(c) => c,
        None => return result,
    };

    for term in categories.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }

        let mut bounds = term.splitn(2, '.');
        let lo = bounds.next().and_then(parse_category_token);
        let hi = bounds.next().and_then(parse_category_token);

        match (lo, hi) {
            (Some(lo), Some(hi)) => result.extend(lo..=hi),
            (Some(lo), None) => {
                result.insert(lo);
            }
            _ => {}
        }
    }

    result
}

fn parse_category_token(s: &str) -> Option<u32> {
    s.strip_prefix('c').and_then(|n| n.parse().ok())
}

pub fn is_selinux_enabled() -> bool {
    fs::read_to_string("/sys/fs/selinux/enabled")
        .map(|s| s.trim() == "1")
        .unwrap_or(false)
}

/// Returns the calling process's own security context, trimmed of the
/// trailing NUL `/proc/self/attr/current` reports.
pub fn getcon() -> Result<Label> {
    let raw =
        fs::read_to_string("/proc/self/attr/current").map_err(|e| Error::io("/proc/self/attr/current", e))?;
    Label::parse(raw.trim_end_matches('\0').trim())
}

pub fn get_file_label(path: impl AsRef<Path>) -> Result<Label> {
    let path = path.as_ref();
    let raw = xattr::get(path, SELINUX_XATTR)
        .map_err(|e| Error::io(path, e))?
        .unwrap_or_default();
    let s = String::from_utf8_lossy(&raw);
    Label::parse(s.trim_end_matches('\0'))
}

pub fn set_file_label(path: impl AsRef<Path>, label: &Label) -> Result<()> {
    let path = path.as_ref();
    let mut value = label.to_string().into_bytes();
    value.push(0);
    xattr::set(path, SELINUX_XATTR, &value).map_err(|e| Error::io(path, e))
}

/// Narrows `path`'s label to `run` if its current label carries
/// categories `run` does not. Writes the xattr via `/proc/self/fd/<fd>`
/// of an already-open handle when `fd` is given, avoiding a TOCTOU
/// between the check and the relabel. The relabel writes `run` in full
/// (not just its level) so the file actually lands in the run phase's
/// `sandbox_file_t` type the judged process's `sandbox_t` domain is
/// granted read access to - keeping the input file's own type would
/// leave it outside that grant regardless of level.
pub fn narrow_to_run_level(path: impl AsRef<Path>, fd: Option<i32>, run: &Label) -> Result<()> {
    let path = path.as_ref();
    let target: std::borrow::Cow<Path> = match fd {
        Some(fd) => std::borrow::Cow::Owned(std::path::PathBuf::from(format!("/proc/self/fd/{}", fd))),
        None => std::borrow::Cow::Borrowed(path),
    };

    let current = get_file_label(&target)?;
    if current.is_broader_than(run) {
        set_file_label(&target, run)?;
    }
    Ok(())
}

/// Scoped `/proc/self/attr/fscreate` override: every regular file or
/// directory the calling thread creates while this guard is alive is
/// labeled `label`. Clearing on drop is load-bearing - spec's invariants
/// call out that files must inherit exactly the label of the phase that
/// created them, and a guard that forgot to clear would leak the label
/// to whatever this thread creates next.
pub struct ScopedFsCreateContext;

impl ScopedFsCreateContext {
    pub fn enter(label: &Label) -> Result<ScopedFsCreateContext> {
        write_proc_attr("/proc/self/attr/fscreate", Some(&label.to_string()))?;
        Ok(ScopedFsCreateContext)
    }
}

impl Drop for ScopedFsCreateContext {
    fn drop(&mut self) {
        let _ = write_proc_attr("/proc/self/attr/fscreate", None);
    }
}

/// Scoped `/proc/self/attr/exec` override: the next `execve` performed by
/// the calling thread (or a thread forked from it before the guard is
/// cleared) runs under `label`.
pub struct ScopedExecContext;

impl ScopedExecContext {
    pub fn enter(label: &Label) -> Result<ScopedExecContext> {
        write_proc_attr("/proc/self/attr/exec", Some(&label.to_string()))?;
        Ok(ScopedExecContext)
    }
}

impl Drop for ScopedExecContext {
    fn drop(&mut self) {
        let _ = write_proc_attr("/proc/self/attr/exec", None);
    }
}

fn write_proc_attr(path: &str, label: Option<&str>) -> Result<()> {
    use std::io::Write;
    let mut f = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    match label {
        Some(s) => f.write_all(s.as_bytes()).map_err(|e| Error::io(path, e)),
        None => f.write_all(&[]).map_err(|e| Error::io(path, e)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_user_role_type_level() {
        let label = Label::parse("staff_u:staff_r:sandbox_t:s0:c0.c1023").unwrap();
        assert_eq!(label.user, "staff_u");
        assert_eq!(label.role, "staff_r");
        assert_eq!(label.type_, "sandbox_t");
        assert_eq!(label.level, "s0:c0.c1023");
    }

    #[test]
    fn rejects_malformed_context() {
        assert!(Label::parse("not-a-context").is_err());
    }

    #[test]
    fn categories_cover_inclusive_range() {
        let label = Label::parse("u:r:t:s0:c0.c3").unwrap();
        let cats = label.categories();
        assert_eq!(cats, [0, 1, 2, 3].iter().copied().collect());
    }

    #[test]
    fn categories_handle_discrete_list() {
        let label = Label::parse("u:r:t:s0:c1,c4,c9").unwrap();
        let cats = label.categories();
        assert_eq!(cats, [1, 4, 9].iter().copied().collect());
    }

    #[test]
    fn level_with_no_categories_is_empty() {
        let label = Label::parse("u:r:t:s0").unwrap();
        assert!(label.categories().is_empty());
    }

    #[test]
    fn broader_label_is_detected_by_set_difference() {
        let broad = Label::parse("u:r:t:s0:c0.c1023").unwrap();
        let narrow = Label::parse("u:r:t:s0:c0.c512").unwrap();
        assert!(broad.is_broader_than(&narrow));
        assert!(!narrow.is_broader_than(&broad));
    }

    #[test]
    fn equal_category_sets_are_not_broader() {
        let a = Label::parse("u:r:t:s0:c0.c10").unwrap();
        let b = Label::parse("u:r:t:s0:c0.c10").unwrap();
        assert!(!a.is_broader_than(&b));
    }

    #[test]
    fn file_context_uses_object_r() {
        let own = Label::parse("staff_u:staff_r:staff_t:s0").unwrap();
        let filecon = own.as_file_context(SANDBOX_FILE_TYPE, "s0:c0.c2");
        assert_eq!(filecon.to_string(), "staff_u:object_r:sandbox_file_t:s0:c0.c2");
    }
}
