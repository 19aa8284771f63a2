//! `addr.json` endpoint descriptor (spec §4.7, §6).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddrDescriptor {
    pub transport: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub pid: u32,
    pub version: u32,
}

impl AddrDescriptor {
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            transport: "unix".to_string(),
            path: Some(path.into()),
            host: None,
            port: None,
            pid: std::process::id(),
            version: crate::frames::ENVELOPE_VERSION,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: "tcp".to_string(),
            path: None,
            host: Some(host.into()),
            port: Some(port),
            pid: std::process::id(),
            version: crate::frames::ENVELOPE_VERSION,
        }
    }

    /// Write atomically — a reader must never observe a half-written
    /// descriptor (same temp-then-rename idiom as the actor pidfile).
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addr.json");
        let desc = AddrDescriptor::unix(dir.path().join("daemon.sock").to_string_lossy().into_owned());
        desc.write(&path).unwrap();
        let read: AddrDescriptor = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(read.transport, "unix");
        AddrDescriptor::remove(&path).unwrap();
        assert!(!path.exists());
    }
}
