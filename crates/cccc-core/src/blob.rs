//! Canonical blob reference format used when a field is spilled out of the
//! ledger row (spec §3 invariant I7, §6): `blob:<path> sha256:<hex> bytes:<n>`.

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

impl BlobRef {
    pub fn new(path: impl Into<String>, content: &[u8]) -> Self {
        Self {
            path: path.into(),
            sha256: hex::encode(Sha256::digest(content)),
            bytes: content.len() as u64,
        }
    }

    pub fn to_canonical(&self) -> String {
        format!("blob:{} sha256:{} bytes:{}", self.path, self.sha256, self.bytes)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut path = None;
        let mut sha256 = None;
        let mut bytes = None;
        for part in s.split_whitespace() {
            if let Some(p) = part.strip_prefix("blob:") {
                path = Some(p.to_string());
            } else if let Some(h) = part.strip_prefix("sha256:") {
                sha256 = Some(h.to_string());
            } else if let Some(b) = part.strip_prefix("bytes:") {
                bytes = b.parse::<u64>().ok();
            }
        }
        Some(Self {
            path: path?,
            sha256: sha256?,
            bytes: bytes?,
        })
    }
}

/// Content address for a blob: the hex sha256 digest, used as the blob's
/// filename under `state/ledger/blobs/` (spec §6).
pub fn content_address(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_canonical_form() {
        let r = BlobRef::new("state/ledger/blobs/ab12.bin", b"hello world");
        let s = r.to_canonical();
        let parsed = BlobRef::parse(&s).unwrap();
        assert_eq!(parsed, r);
    }
}
