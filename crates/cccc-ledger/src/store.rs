//! Per-group append-only event ledger (spec §4.2, C2).
//!
//! Single-writer discipline: every append acquires `inner`, one `Mutex`
//! rather than a connection pool — a group's event volume never justifies
//! more than one writer in flight.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use cccc_core::config::{LedgerConfig, MAX_EVENT_BYTES};
use cccc_core::event::{ChatMessageData, Event, EventKind, EventPartial};
use cccc_core::home::RuntimeHome;
use chrono::Utc;
use fs4::fs_std::FileExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::cursor::Cursor;
use crate::error::{LedgerError, Result};

/// Notified after every successful append, outside the writer lock (C8).
pub trait LedgerObserver: Send + Sync {
    fn on_append(&self, event: &Event);
}

struct NullObserver;
impl LedgerObserver for NullObserver {
    fn on_append(&self, _event: &Event) {}
}

pub(crate) struct WriterState {
    file: File,
    next_seq: u64,
    last_ts: chrono::DateTime<Utc>,
}

pub struct Ledger {
    group_id: String,
    ledger_path: PathBuf,
    archive_dir: PathBuf,
    config: LedgerConfig,
    blobs: BlobStore,
    inner: tokio::sync::Mutex<WriterState>,
    observer: Arc<dyn LedgerObserver>,
    /// Archive files known to exist, oldest first, populated from compaction
    /// metadata (spec §4.9) — consulted by `tail`/`search` to stitch history.
    archived_files: tokio::sync::RwLock<Vec<PathBuf>>,
}

pub struct WindowResult {
    pub events: Vec<Event>,
    pub has_more_before: bool,
    pub has_more_after: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub kinds: Option<Vec<EventKind>>,
    pub limit: Option<usize>,
}

impl Ledger {
    /// Open (creating if absent) the ledger file for `group_id`, recovering
    /// the writer's `seq`/`ts` cursor by scanning the last line (spec §4.9
    /// "recover from snapshot-plus-tail").
    #[instrument(skip(home, config, observer), fields(group_id))]
    pub fn open(
        home: &RuntimeHome,
        group_id: &str,
        config: LedgerConfig,
        observer: Option<Arc<dyn LedgerObserver>>,
    ) -> Result<Self> {
        home.ensure_group_dirs(group_id)?;
        let ledger_path = home.ledger_jsonl(group_id);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&ledger_path)?;
        // Advisory exclusive lock — the daemon process owns this group's
        // ledger for its whole lifetime (spec §5).
        FileExt::try_lock_exclusive(&file).map_err(|e| {
            LedgerError::Resource(format!("ledger {group_id} is locked by another process: {e}"))
        })?;

        let (next_seq, last_ts) = recover_cursor(&ledger_path)?;

        let archived_files = load_archive_list(&home.compaction_meta_json(group_id))?
            .into_iter()
            .map(|name| home.archive_dir(group_id).join(name))
            .collect();

        Ok(Self {
            group_id: group_id.to_string(),
            ledger_path,
            archive_dir: home.archive_dir(group_id),
            blobs: BlobStore::new(home.blobs_dir(group_id)),
            config,
            inner: tokio::sync::Mutex::new(WriterState {
                file,
                next_seq,
                last_ts,
            }),
            observer: observer.unwrap_or_else(|| Arc::new(NullObserver)),
            archived_files: tokio::sync::RwLock::new(archived_files),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Assign id/ts/seq, validate, spill oversized fields, append one line,
    /// fsync, and notify the observer (spec §4.2).
    ///
    /// Per-kind referential invariants that need cross-event state (I2 ack
    /// correctness, I3 read monotonicity, I6 foreman uniqueness) are enforced
    /// by the owning component (C3/C4) *before* calling this — by the time a
    /// partial reaches here it is assumed structurally valid for its kind.
    #[instrument(skip(self, partial), fields(group_id = %self.group_id, kind = %partial.kind))]
    pub async fn append(&self, partial: EventPartial) -> Result<Event> {
        if partial.group_id != self.group_id {
            return Err(LedgerError::Invariant(format!(
                "event group_id {} does not match ledger {}",
                partial.group_id, self.group_id
            )));
        }

        if let EventKind::ChatMessage = partial.kind {
            let data: ChatMessageData = serde_json::from_value(partial.data.clone())?;
            if !data.provenance_consistent() {
                return Err(LedgerError::Invariant(
                    "src_group_id and src_event_id must both be set or both absent (I5)".into(),
                ));
            }
        }

        let mut guard = self.inner.lock().await;

        let id = partial.id.clone().unwrap_or_else(|| Uuid::now_v7().to_string());
        let ts = std::cmp::max(Utc::now(), guard.last_ts);
        let seq = guard.next_seq;

        let mut event = Event {
            v: cccc_core::config::ENVELOPE_VERSION,
            id,
            ts,
            seq: Some(seq),
            kind: partial.kind,
            group_id: partial.group_id,
            scope_key: partial.scope_key,
            by: partial.by,
            data: partial.data,
        };

        self.spill_if_oversized(&mut event)?;

        let line = serde_json::to_string(&event)?;
        if line.len() > MAX_EVENT_BYTES {
            return Err(LedgerError::Resource(format!(
                "event {} still exceeds MAX_EVENT_BYTES after blob spill",
                event.id
            )));
        }

        guard.file.write_all(line.as_bytes())?;
        guard.file.write_all(b"\n")?;
        if self.config.fsync_per_write {
            guard.file.sync_data()?;
        }
        guard.next_seq = seq + 1;
        guard.last_ts = ts;
        drop(guard);

        debug!(event_id = %event.id, seq, "event appended");
        self.observer.on_append(&event);
        Ok(event)
    }

    /// Spill `data.text` to a blob and replace it with a canonical `blob:`
    /// reference when the serialized row would exceed `MAX_EVENT_BYTES`
    /// (invariant I7).
    fn spill_if_oversized(&self, event: &mut Event) -> Result<()> {
        let len = serde_json::to_vec(event)?.len();
        if len <= MAX_EVENT_BYTES {
            return Ok(());
        }
        let Some(text) = event.data.get("text").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let blob_ref = self.blobs.put(text.as_bytes())?;
        if let Some(obj) = event.data.as_object_mut() {
            obj.insert(
                "text".to_string(),
                serde_json::Value::String(blob_ref.to_canonical()),
            );
        }
        warn!(event_id = %event.id, bytes = len, "event text spilled to blob");
        Ok(())
    }

    /// Forward iteration from an optional cursor (spec §4.2).
    #[instrument(skip(self, since, kinds), fields(group_id = %self.group_id))]
    pub async fn tail(
        &self,
        since: Option<Cursor>,
        limit: Option<usize>,
        kinds: Option<&[EventKind]>,
    ) -> Result<Vec<Event>> {
        let files = self.readable_files().await;
        let mut out = Vec::new();
        let mut seen_cursor = since.is_none();

        for path in files {
            for event in read_complete_lines(&path)? {
                if !seen_cursor {
                    if let Some(cursor) = &since {
                        if cursor.matches_or_after(&event.id, event.ts, event.seq) {
                            seen_cursor = true;
                        }
                        continue;
                    }
                }
                if let Some(kinds) = kinds {
                    if !kinds.contains(&event.kind) {
                        continue;
                    }
                }
                out.push(event);
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Bounded bidirectional slice around `center_id` (spec §4.2, deep-link UI).
    #[instrument(skip(self), fields(group_id = %self.group_id))]
    pub async fn window(
        &self,
        center_id: &str,
        before: usize,
        after: usize,
        kinds: Option<&[EventKind]>,
    ) -> Result<WindowResult> {
        let files = self.readable_files().await;
        let mut all = Vec::new();
        for path in files {
            all.extend(read_complete_lines(&path)?);
        }
        let filtered: Vec<Event> = match kinds {
            Some(kinds) => all.into_iter().filter(|e| kinds.contains(&e.kind)).collect(),
            None => all,
        };
        let center_idx = filtered
            .iter()
            .position(|e| e.id == center_id)
            .ok_or_else(|| LedgerError::NotFound(center_id.to_string()))?;

        let start = center_idx.saturating_sub(before);
        let end = std::cmp::min(filtered.len(), center_idx + after + 1);
        Ok(WindowResult {
            has_more_before: start > 0,
            has_more_after: end < filtered.len(),
            events: filtered[start..end].to_vec(),
        })
    }

    /// Substring match on text fields, most-recent-first (spec §4.2).
    #[instrument(skip(self, query, filters), fields(group_id = %self.group_id))]
    pub async fn search(&self, query: &str, filters: SearchFilters) -> Result<Vec<Event>> {
        let files = self.readable_files().await;
        let mut out = Vec::new();
        for path in files {
            out.extend(read_complete_lines(&path)?);
        }
        out.reverse();
        let needle = query.to_lowercase();
        let mut results: Vec<Event> = out
            .into_iter()
            .filter(|e| {
                if let Some(kinds) = &filters.kinds {
                    if !kinds.contains(&e.kind) {
                        return false;
                    }
                }
                serde_json::to_string(&e.data)
                    .map(|s| s.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .collect();
        if let Some(limit) = filters.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// Current active-ledger file size in bytes (spec §4.9 compaction trigger).
    pub fn active_size_bytes(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.ledger_path)?.len())
    }

    pub fn ledger_path(&self) -> &std::path::Path {
        &self.ledger_path
    }

    pub fn archive_dir(&self) -> &std::path::Path {
        &self.archive_dir
    }

    pub(crate) async fn writer(&self) -> tokio::sync::MutexGuard<'_, WriterState> {
        self.inner.lock().await
    }

    pub async fn register_archive_file(&self, path: PathBuf) {
        self.archived_files.write().await.push(path);
    }

    async fn readable_files(&self) -> Vec<PathBuf> {
        let mut files = self.archived_files.read().await.clone();
        files.push(self.ledger_path.clone());
        files
    }
}

impl WriterState {
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

/// Scan the ledger file's final complete line to recover `(next_seq, last_ts)`
/// after a restart (spec §4.9).
fn recover_cursor(path: &std::path::Path) -> Result<(u64, chrono::DateTime<Utc>)> {
    let events = read_complete_lines(path)?;
    match events.last() {
        Some(e) => Ok((e.seq.map(|s| s + 1).unwrap_or(0), e.ts)),
        None => Ok((0, Utc::now())),
    }
}

/// Read every syntactically-complete (`\n`-terminated) line as an `Event`,
/// silently treating a dangling unterminated final line as "not yet
/// readable" (spec §4.2 failure semantics).
fn read_complete_lines(path: &std::path::Path) -> Result<Vec<Event>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata()?.len();
    let mut buf = String::new();
    file.read_to_string(&mut buf).unwrap_or(0);
    let complete = if len > 0 && buf.ends_with('\n') {
        buf.as_str()
    } else {
        match buf.rfind('\n') {
            Some(idx) => &buf[..=idx],
            None => "",
        }
    };
    let mut out = Vec::new();
    for line in complete.lines() {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(e) => out.push(e),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping malformed ledger line");
            }
        }
    }
    Ok(out)
}

fn load_archive_list(meta_path: &std::path::Path) -> Result<Vec<String>> {
    match std::fs::read(meta_path) {
        Ok(bytes) => {
            let meta: crate::compaction::CompactionMetadata = serde_json::from_slice(&bytes)?;
            Ok(meta.archived_files)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cccc_core::principal::Principal;

    fn home(dir: &std::path::Path) -> RuntimeHome {
        RuntimeHome::new(dir)
    }

    fn partial(group: &str, text: &str) -> EventPartial {
        EventPartial {
            id: None,
            kind: EventKind::ChatMessage,
            group_id: group.to_string(),
            scope_key: String::new(),
            by: Principal::User,
            data: serde_json::json!({"text": text, "to": []}),
        }
    }

    #[tokio::test]
    async fn append_assigns_monotonic_seq_and_ts() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&home(dir.path()), "g1", LedgerConfig::default(), None).unwrap();
        let e1 = ledger.append(partial("g1", "hello")).await.unwrap();
        let e2 = ledger.append(partial("g1", "world")).await.unwrap();
        assert_eq!(e1.seq, Some(0));
        assert_eq!(e2.seq, Some(1));
        assert!(e2.ts >= e1.ts);
    }

    #[tokio::test]
    async fn tail_round_trips_appended_events() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&home(dir.path()), "g1", LedgerConfig::default(), None).unwrap();
        ledger.append(partial("g1", "one")).await.unwrap();
        ledger.append(partial("g1", "two")).await.unwrap();
        let events = ledger.tail(None, None, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data["text"], "one");
    }

    #[tokio::test]
    async fn tail_since_event_id_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&home(dir.path()), "g1", LedgerConfig::default(), None).unwrap();
        let e1 = ledger.append(partial("g1", "one")).await.unwrap();
        ledger.append(partial("g1", "two")).await.unwrap();
        let events = ledger
            .tail(Some(Cursor::EventId(e1.id.clone())), None, None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["text"], "two");
    }

    #[tokio::test]
    async fn oversized_text_is_spilled_to_blob() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&home(dir.path()), "g1", LedgerConfig::default(), None).unwrap();
        let big = "x".repeat(MAX_EVENT_BYTES + 100);
        let e = ledger.append(partial("g1", &big)).await.unwrap();
        let text = e.data["text"].as_str().unwrap();
        assert!(text.starts_with("blob:"));
        assert!(e.serialized_len().unwrap() <= MAX_EVENT_BYTES);
    }

    #[tokio::test]
    async fn rejects_mismatched_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&home(dir.path()), "g1", LedgerConfig::default(), None).unwrap();
        let mut p = partial("g1", "hi");
        p.data = serde_json::json!({"text": "hi", "to": [], "src_group_id": "gA"});
        let err = ledger.append(p).await.unwrap_err();
        assert!(matches!(err, LedgerError::Invariant(_)));
    }
}
