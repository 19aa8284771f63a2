//! Compaction eligibility and execution (spec §4.9, C9).
//!
//! Compaction never runs inline with `append` — it is driven by a periodic
//! tick owned by the daemon's recovery coordinator, kept separate from the
//! jobs it fires.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::cursor::Cursor;
use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::store::Ledger;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionMetadata {
    pub last_compacted_event_id: Option<String>,
    pub archived_files: Vec<String>,
    pub last_compacted_at: Option<DateTime<Utc>>,
}

impl CompactionMetadata {
    pub fn read(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Per-group inputs the ledger itself has no way to know: read cursors live
/// in C3, not C2.
pub struct CompactionInputs {
    /// Minimum `last_read_event_id` across all actors + `user`. `None` means
    /// at least one has no cursor set yet, which blocks compaction entirely.
    pub safe_watermark: Option<Cursor>,
    pub last_compaction_at: Option<DateTime<Utc>>,
}

pub fn is_eligible(
    active_size_bytes: u64,
    max_active_bytes: u64,
    min_interval_seconds: u64,
    now: DateTime<Utc>,
    inputs: &CompactionInputs,
) -> bool {
    if active_size_bytes <= max_active_bytes {
        return false;
    }
    let Some(last) = inputs.last_compaction_at else {
        return inputs.safe_watermark.is_some();
    };
    if (now - last).num_seconds() < min_interval_seconds as i64 {
        return false;
    }
    inputs.safe_watermark.is_some()
}

/// Snapshot, archive everything strictly before `min(safe_watermark,
/// tail_boundary)`, truncate the active ledger, and update metadata.
///
/// `tail_keep` lines immediately preceding the archive point are always left
/// in the active ledger for UI context, even if the watermark would allow
/// archiving further.
#[instrument(skip(ledger, meta_path, snapshots_dir), fields(group_id = %ledger.group_id()))]
pub async fn perform_compaction(
    ledger: &Ledger,
    meta_path: &Path,
    snapshots_dir: &Path,
    safe_watermark: &Cursor,
    tail_keep: usize,
) -> Result<CompactionMetadata> {
    let all = ledger.tail(None, None, None).await?;
    if all.is_empty() {
        return CompactionMetadata::read(meta_path);
    }

    let watermark_idx = all
        .iter()
        .position(|e| safe_watermark.matches_or_after(&e.id, e.ts, e.seq))
        .unwrap_or(all.len());
    let tail_boundary = all.len().saturating_sub(tail_keep);
    let archive_end = std::cmp::min(watermark_idx, tail_boundary);

    if archive_end == 0 {
        return CompactionMetadata::read(meta_path);
    }

    let last_archived = &all[archive_end - 1];
    let snapshot = Snapshot {
        group_id: ledger.group_id().to_string(),
        taken_at: Utc::now(),
        last_event_id: last_archived.id.clone(),
        last_seq: last_archived.seq.unwrap_or(0),
        last_ts: last_archived.ts,
    };
    snapshot.write(snapshots_dir)?;

    let archive_name = format!("archive.{}.jsonl", Utc::now().timestamp());
    let archive_path = ledger.archive_dir().join(&archive_name);
    std::fs::create_dir_all(ledger.archive_dir())?;
    {
        let mut body = String::new();
        for event in &all[..archive_end] {
            body.push_str(&serde_json::to_string(event)?);
            body.push('\n');
        }
        std::fs::write(&archive_path, body)?;
    }

    rewrite_active_with_suffix(ledger, &all[archive_end..]).await?;
    ledger.register_archive_file(archive_path).await;

    let mut meta = CompactionMetadata::read(meta_path)?;
    meta.last_compacted_event_id = Some(last_archived.id.clone());
    meta.archived_files.push(archive_name);
    meta.last_compacted_at = Some(Utc::now());
    meta.write(meta_path)?;

    info!(
        archived = archive_end,
        remaining = all.len() - archive_end,
        "ledger compacted"
    );
    Ok(meta)
}

async fn rewrite_active_with_suffix(
    ledger: &Ledger,
    suffix: &[cccc_core::event::Event],
) -> Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    let mut guard = ledger.writer().await;
    let file = guard.file_mut();
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    for event in suffix {
        file.write_all(serde_json::to_string(event)?.as_bytes())?;
        file.write_all(b"\n")?;
    }
    file.sync_data()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_eligible_under_size_threshold() {
        let inputs = CompactionInputs {
            safe_watermark: Some(Cursor::Seq(10)),
            last_compaction_at: None,
        };
        assert!(!is_eligible(10, 100, 300, Utc::now(), &inputs));
    }

    #[test]
    fn not_eligible_without_watermark() {
        let inputs = CompactionInputs {
            safe_watermark: None,
            last_compaction_at: None,
        };
        assert!(!is_eligible(1000, 100, 300, Utc::now(), &inputs));
    }

    #[test]
    fn not_eligible_before_min_interval() {
        let inputs = CompactionInputs {
            safe_watermark: Some(Cursor::Seq(10)),
            last_compaction_at: Some(Utc::now()),
        };
        assert!(!is_eligible(1000, 100, 300, Utc::now(), &inputs));
    }

    #[test]
    fn eligible_when_all_conditions_hold() {
        let inputs = CompactionInputs {
            safe_watermark: Some(Cursor::Seq(10)),
            last_compaction_at: Some(Utc::now() - chrono::Duration::seconds(400)),
        };
        assert!(is_eligible(1000, 100, 300, Utc::now(), &inputs));
    }

    #[tokio::test]
    async fn compaction_stops_at_watermark_not_at_tail_boundary() {
        use cccc_core::home::RuntimeHome;
        use cccc_core::principal::Principal;
        use cccc_core::event::{EventKind, EventPartial};

        let dir = tempfile::tempdir().unwrap();
        let home = RuntimeHome::new(dir.path());
        let ledger = Ledger::open(&home, "g1", Default::default(), None).unwrap();

        let mut appended = Vec::new();
        for i in 0..6 {
            let event = ledger
                .append(EventPartial {
                    id: None,
                    kind: EventKind::ChatMessage,
                    group_id: "g1".to_string(),
                    scope_key: String::new(),
                    by: Principal::User,
                    data: serde_json::json!({"text": format!("m{i}")}),
                })
                .await
                .unwrap();
            appended.push(event);
        }

        // Actors have only read up through the 3rd event (index 2); a
        // tail_keep of 0 would previously let rposition's collapse archive
        // the whole ledger regardless.
        let watermark = Cursor::Ts(appended[2].ts);
        let meta = perform_compaction(&ledger, &home.compaction_meta_json("g1"), &home.snapshots_dir("g1"), &watermark, 0)
            .await
            .unwrap();

        assert_eq!(meta.last_compacted_event_id.as_deref(), Some(appended[1].id.as_str()));
        let remaining = ledger.tail(None, None, None).await.unwrap();
        assert_eq!(remaining.len(), 4);
        assert_eq!(remaining[0].id, appended[2].id);
    }
}
