//! Projected-state snapshot written alongside compaction (spec §4.9).
//!
//! A snapshot captures whatever downstream components need to resume without
//! replaying the whole archive: the ledger itself only needs to remember
//! where the active file's cursor was at the moment of the snapshot.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub group_id: String,
    pub taken_at: DateTime<Utc>,
    /// Last event id/seq/ts covered by this snapshot and everything archived
    /// before it — the resume point for a cold-start recovery scan.
    pub last_event_id: String,
    pub last_seq: u64,
    pub last_ts: DateTime<Utc>,
}

impl Snapshot {
    /// Write `snapshot.latest.json` and a timestamped copy next to it, so a
    /// partial write of the former never loses the previous good snapshot
    /// (spec §4.9 "snapshot-plus-tail recovery must never regress").
    pub fn write(&self, snapshots_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(snapshots_dir)?;
        let body = serde_json::to_vec_pretty(self)?;

        let dated = snapshots_dir.join(format!("snapshot.{}.json", self.taken_at.timestamp()));
        std::fs::write(&dated, &body)?;

        let latest = snapshots_dir.join("snapshot.latest.json");
        let tmp = snapshots_dir.join("snapshot.latest.json.tmp");
        std::fs::write(&tmp, &body)?;
        std::fs::rename(&tmp, &latest)?;
        Ok(())
    }

    pub fn read_latest(snapshots_dir: &Path) -> Result<Option<Snapshot>> {
        let latest = snapshots_dir.join("snapshot.latest.json");
        match std::fs::read(&latest) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_latest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let snap = Snapshot {
            group_id: "g1".into(),
            taken_at: Utc::now(),
            last_event_id: "e1".into(),
            last_seq: 41,
            last_ts: Utc::now(),
        };
        snap.write(dir.path()).unwrap();
        let read = Snapshot::read_latest(dir.path()).unwrap().unwrap();
        assert_eq!(read.last_event_id, "e1");
        assert_eq!(read.last_seq, 41);
    }

    #[test]
    fn read_latest_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Snapshot::read_latest(dir.path()).unwrap().is_none());
    }
}
