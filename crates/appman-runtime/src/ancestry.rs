//! Process ancestry lookups used to authenticate peer connections.
//!
//! A connecting process is accepted if it is the spawned process or one of
//! its descendants within a bounded number of generations. The bound covers
//! debuggers and wrapper scripts that sit between the manager and the
//! application.

use std::io::Read;
use std::path::{Path, PathBuf};

/// Bytes read from a `status` file at most.
const MAX_STATUS_READ: u64 = 4096;

/// Parent lookup for a pid.
pub trait ProcessAncestry: Send + Sync {
    /// Parent pid, or `None` if unknown.
    fn parent_of(&self, pid: u32) -> Option<u32>;

    /// Whether `candidate` is `ancestor` or descends from it within
    /// `max_depth` generations.
    fn descends_from(&self, candidate: u32, ancestor: u32, max_depth: u32) -> bool {
        let mut pid = candidate;
        let mut depth: u32 = 0;
        loop {
            if pid == ancestor {
                return true;
            }
            if depth >= max_depth || pid <= 1 {
                return false;
            }
            match self.parent_of(pid) {
                Some(parent) if parent != pid => pid = parent,
                _ => return false,
            }
            depth = depth.saturating_add(1);
        }
    }
}

/// Reads `PPid` from `<proc_root>/<pid>/status`.
#[derive(Debug, Clone)]
pub struct ProcfsAncestry {
    proc_root: PathBuf,
}

impl Default for ProcfsAncestry {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsAncestry {
    /// Read from a custom proc root.
    #[must_use]
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn read_status(&self, pid: u32) -> Option<String> {
        let path: PathBuf = self.proc_root.join(pid.to_string()).join("status");
        read_bounded(&path)
    }
}

fn read_bounded(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut content = String::new();
    file.take(MAX_STATUS_READ)
        .read_to_string(&mut content)
        .ok()?;
    Some(content)
}

impl ProcessAncestry for ProcfsAncestry {
    fn parent_of(&self, pid: u32) -> Option<u32> {
        let status = self.read_status(pid)?;
        status
            .lines()
            .find_map(|line| line.strip_prefix("PPid:"))
            .and_then(|rest| rest.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc(entries: &[(u32, u32)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (pid, ppid) in entries {
            let pid_dir = dir.path().join(pid.to_string());
            std::fs::create_dir_all(&pid_dir).unwrap();
            std::fs::write(
                pid_dir.join("status"),
                format!("Name:\tproc{pid}\nState:\tS (sleeping)\nPPid:\t{ppid}\n"),
            )
            .unwrap();
        }
        dir
    }

    #[test]
    fn test_reads_ppid() {
        let dir = fake_proc(&[(200, 100)]);
        let ancestry = ProcfsAncestry::new(dir.path());
        assert_eq!(ancestry.parent_of(200), Some(100));
        assert_eq!(ancestry.parent_of(999), None);
    }

    #[test]
    fn test_descends_within_depth() {
        // 100 (spawned, e.g. gdb) -> 200 -> 300 -> 400
        let dir = fake_proc(&[(200, 100), (300, 200), (400, 300), (100, 1)]);
        let ancestry = ProcfsAncestry::new(dir.path());

        assert!(ancestry.descends_from(100, 100, 0));
        assert!(ancestry.descends_from(400, 100, 3));
        assert!(!ancestry.descends_from(400, 100, 2));
    }

    #[test]
    fn test_unrelated_process_rejected() {
        let dir = fake_proc(&[(500, 1), (100, 1)]);
        let ancestry = ProcfsAncestry::new(dir.path());
        assert!(!ancestry.descends_from(500, 100, 4));
    }
}
