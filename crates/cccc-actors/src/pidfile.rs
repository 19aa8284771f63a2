//! Pidfile persistence for crash recovery across daemon restarts (spec §4.4, §6).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub argv_hash: String,
}

impl PidRecord {
    /// Write atomically: write to a sibling temp file, then rename, so a
    /// reader never observes a partially-written pidfile (spec §4.4).
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Option<PidRecord>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// `kill(pid, 0)` — POSIX idiom for "does this process still exist"
    /// without actually signaling it.
    #[cfg(unix)]
    pub fn process_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[cfg(not(unix))]
    pub fn process_alive(_pid: u32) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pidfile");
        let rec = PidRecord {
            pid: std::process::id(),
            started_at: chrono::Utc::now(),
            argv_hash: "abc123".into(),
        };
        rec.write(&path).unwrap();
        let read = PidRecord::read(&path).unwrap().unwrap();
        assert_eq!(read.pid, rec.pid);
        assert_eq!(read.argv_hash, "abc123");
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pidfile");
        PidRecord::remove(&path).unwrap();
        PidRecord::remove(&path).unwrap();
    }

    #[test]
    fn current_process_is_alive() {
        assert!(PidRecord::process_alive(std::process::id()));
    }
}
