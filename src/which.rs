//! `PATH` search, mirroring `gulag.utils.which`: the first entry that
//! names a regular file with the other-execute bit set.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Searches `path_env` (a colon-separated `PATH`-style string) for `name`,
/// returning the first match that is a regular file executable by "other".
/// `gulag` checks `S_IXOTH` specifically rather than `os.access`, since the
/// sandboxed child runs as a different, less-privileged context than the
/// judge process doing the search.
pub fn which(name: &str, path_env: &str) -> Option<PathBuf> {
    for dir in path_env.split(':') {
        if dir.is_empty() {
            continue;
        }

        let candidate = PathBuf::from(dir).join(name);
        let metadata = match fs::metadata(&candidate) {
            Ok(m) => m,
            Err(_) => continue,
        };

        if !metadata.is_file() {
            continue;
        }

        if metadata.permissions().mode() & 0o001 != 0 {
            return Some(candidate);
        }
    }

    None
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    #[test]
    fn finds_executable_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let exe_path = dir.path().join("probe");
        {
            let mut f = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .mode(0o755)
                .open(&exe_path)
                .unwrap();
            f.write_all(b"#!/bin/sh\n").unwrap();
        }

        let found = which("probe", dir.path().to_str().unwrap());
        assert_eq!(found, Some(exe_path));
    }

    #[test]
    fn skips_non_executable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o644)
            .open(&path)
            .unwrap();

        assert_eq!(which("data", dir.path().to_str().unwrap()), None);
    }

    #[test]
    fn returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(which("definitely-not-here", dir.path().to_str().unwrap()), None);
    }

    #[test]
    fn searches_multiple_path_entries_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let exe_path = second.path().join("only-in-second");
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o755)
            .open(&exe_path)
            .unwrap();

        let path_env = format!("{}:{}", first.path().to_str().unwrap(), second.path().to_str().unwrap());
        assert_eq!(which("only-in-second", &path_env), Some(exe_path));
    }
}
