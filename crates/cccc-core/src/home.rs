use std::path::{Path, PathBuf};

/// Path accessors for the `~/.cccc/` runtime home layout (spec §6).
///
/// Bootstraps the directory tree on first use rather than requiring the
/// operator to hand-create it (SPEC_FULL.md §B).
#[derive(Debug, Clone)]
pub struct RuntimeHome {
    root: PathBuf,
}

impl RuntimeHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_json(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.root.join("daemon")
    }

    pub fn addr_json(&self) -> PathBuf {
        self.daemon_dir().join("addr.json")
    }

    pub fn daemon_pid(&self) -> PathBuf {
        self.daemon_dir().join("pid")
    }

    pub fn daemon_log(&self) -> PathBuf {
        self.daemon_dir().join("log")
    }

    pub fn group_dir(&self, group_id: &str) -> PathBuf {
        self.root.join("groups").join(group_id)
    }

    pub fn group_yaml(&self, group_id: &str) -> PathBuf {
        self.group_dir(group_id).join("group.yaml")
    }

    pub fn ledger_jsonl(&self, group_id: &str) -> PathBuf {
        self.group_dir(group_id).join("ledger.jsonl")
    }

    pub fn state_dir(&self, group_id: &str) -> PathBuf {
        self.group_dir(group_id).join("state")
    }

    pub fn cursors_json(&self, group_id: &str) -> PathBuf {
        self.state_dir(group_id).join("cursors.json")
    }

    pub fn attention_json(&self, group_id: &str) -> PathBuf {
        self.state_dir(group_id).join("attention.json")
    }

    /// IM bridge subscription state (spec §4.8/§6) — not part of the
    /// ledger, so it lives alongside cursors/attention rather than as events.
    pub fn channels_json(&self, group_id: &str) -> PathBuf {
        self.state_dir(group_id).join("channels.json")
    }

    pub fn blobs_dir(&self, group_id: &str) -> PathBuf {
        self.state_dir(group_id).join("ledger").join("blobs")
    }

    pub fn snapshots_dir(&self, group_id: &str) -> PathBuf {
        self.state_dir(group_id).join("ledger").join("snapshots")
    }

    pub fn archive_dir(&self, group_id: &str) -> PathBuf {
        self.state_dir(group_id).join("ledger").join("archive")
    }

    pub fn compaction_meta_json(&self, group_id: &str) -> PathBuf {
        self.state_dir(group_id).join("ledger").join("compaction.json")
    }

    pub fn pidfiles_dir(&self, group_id: &str) -> PathBuf {
        self.state_dir(group_id).join("pidfiles")
    }

    pub fn pidfile(&self, group_id: &str, actor_id: &str) -> PathBuf {
        self.pidfiles_dir(group_id).join(actor_id)
    }

    pub fn runtime_work_dir(&self, group_id: &str) -> PathBuf {
        self.group_dir(group_id).join("work")
    }

    /// Create every directory this layout requires for `group_id`, idempotently.
    pub fn ensure_group_dirs(&self, group_id: &str) -> std::io::Result<()> {
        for dir in [
            self.group_dir(group_id),
            self.state_dir(group_id),
            self.blobs_dir(group_id),
            self.snapshots_dir(group_id),
            self.archive_dir(group_id),
            self.pidfiles_dir(group_id),
            self.runtime_work_dir(group_id),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Create the top-level tree (`daemon/`, `groups/`) — called once at
    /// daemon startup.
    pub fn ensure_root_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.daemon_dir())?;
        std::fs::create_dir_all(self.root.join("groups"))?;
        Ok(())
    }
}
