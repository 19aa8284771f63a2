use chrono::{DateTime, Utc};

/// Opaque resume token accepted by `tail`/`search` (spec §4.2). Clients treat
/// this as opaque; the kernel accepts any of the three encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    EventId(String),
    Ts(DateTime<Utc>),
    Seq(u64),
}

impl Cursor {
    pub fn matches_or_after(&self, last_id: &str, last_ts: DateTime<Utc>, last_seq: Option<u64>) -> bool {
        match self {
            Cursor::EventId(id) => id == last_id,
            Cursor::Ts(ts) => *ts <= last_ts,
            Cursor::Seq(seq) => last_seq.map(|s| s >= *seq).unwrap_or(false),
        }
    }
}
