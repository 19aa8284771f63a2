//! Content-addressed blob storage for oversized event fields (spec §3, §6).

use std::path::{Path, PathBuf};

use cccc_core::blob::{content_address, BlobRef};

use crate::error::Result;

pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `content`, keyed by its sha256 digest. Idempotent: writing the
    /// same content twice is a no-op on the second call.
    pub fn put(&self, content: &[u8]) -> Result<BlobRef> {
        std::fs::create_dir_all(&self.dir)?;
        let digest = content_address(content);
        let path = self.dir.join(&digest);
        if !path.exists() {
            std::fs::write(&path, content)?;
        }
        Ok(BlobRef {
            path: relative_path(&self.dir, &path),
            sha256: digest,
            bytes: content.len() as u64,
        })
    }

    pub fn get(&self, sha256: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.dir.join(sha256))?)
    }
}

fn relative_path(dir: &Path, full: &Path) -> String {
    full.strip_prefix(dir.parent().unwrap_or(dir))
        .unwrap_or(full)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));
        let r1 = store.put(b"hello").unwrap();
        let r2 = store.put(b"hello").unwrap();
        assert_eq!(r1, r2);
        assert_eq!(store.get(&r1.sha256).unwrap(), b"hello");
    }
}
