//! Caller identity lookups.
//!
//! Protected calls are attributed to the pid on the other end of the
//! transport. Everything else the policy needs is derived from `/proc`.

use std::io::Read;
use std::path::PathBuf;

/// Bytes read from a `status` file at most.
const MAX_STATUS_READ: u64 = 4096;

/// Resolves identity facts about a calling process.
pub trait CallerResolver: Send + Sync {
    /// Real uid of the process.
    fn uid(&self, pid: u32) -> Option<u32>;

    /// Absolute path of the process image.
    fn executable(&self, pid: u32) -> Option<PathBuf>;
}

/// Reads `<proc_root>/<pid>/status` and `<proc_root>/<pid>/exe`.
#[derive(Debug, Clone)]
pub struct ProcfsCallerResolver {
    proc_root: PathBuf,
}

impl Default for ProcfsCallerResolver {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsCallerResolver {
    /// Read from a custom proc root.
    #[must_use]
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.proc_root.join(pid.to_string())
    }
}

impl CallerResolver for ProcfsCallerResolver {
    fn uid(&self, pid: u32) -> Option<u32> {
        let file = std::fs::File::open(self.pid_dir(pid).join("status")).ok()?;
        let mut status = String::new();
        file.take(MAX_STATUS_READ)
            .read_to_string(&mut status)
            .ok()?;
        // "Uid:\treal\teffective\tsaved\tfs"
        status
            .lines()
            .find_map(|line| line.strip_prefix("Uid:"))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|real| real.parse().ok())
    }

    fn executable(&self, pid: u32) -> Option<PathBuf> {
        std::fs::read_link(self.pid_dir(pid).join("exe")).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_real_uid() {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join("42");
        std::fs::create_dir_all(&pid_dir).unwrap();
        std::fs::write(
            pid_dir.join("status"),
            "Name:\tapp\nUid:\t1000\t0\t0\t0\nGid:\t1000\t1000\t1000\t1000\n",
        )
        .unwrap();

        let resolver = ProcfsCallerResolver::new(dir.path());
        assert_eq!(resolver.uid(42), Some(1000));
        assert_eq!(resolver.uid(43), None);
    }

    #[test]
    fn test_reads_exe_link() {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join("7");
        std::fs::create_dir_all(&pid_dir).unwrap();
        std::os::unix::fs::symlink("/bin/evil", pid_dir.join("exe")).unwrap();

        let resolver = ProcfsCallerResolver::new(dir.path());
        assert_eq!(resolver.executable(7), Some(PathBuf::from("/bin/evil")));
        assert_eq!(resolver.executable(8), None);
    }

    #[test]
    fn test_own_process_resolves() {
        let resolver = ProcfsCallerResolver::default();
        let pid = std::process::id();
        assert!(resolver.executable(pid).is_some());
        assert!(resolver.uid(pid).is_some());
    }
}
