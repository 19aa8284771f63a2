use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Wire/storage constants — spec §3, §4.2, §4.9.
pub const ENVELOPE_VERSION: u32 = 1;
pub const MAX_EVENT_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_ACTIVE_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_COMPACTION_MIN_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_COMPACTION_CHECK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_COMPACTION_TAIL_KEEP: usize = 2000;
pub const IDEMPOTENCY_WINDOW_SECS: i64 = 300;
pub const DEFAULT_IPC_OP_TIMEOUT_SECS: u64 = 60;

fn default_runtime_home() -> String {
    dirs::home_dir()
        .map(|h| h.join(".cccc").to_string_lossy().into_owned())
        .unwrap_or_else(|| ".cccc".to_string())
}

fn bool_true() -> bool {
    true
}

/// Top-level daemon configuration (`~/.cccc/config.toml` + `CCCC_*` env).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcccConfig {
    #[serde(default = "default_runtime_home")]
    pub runtime_home: String,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
}

impl Default for CcccConfig {
    fn default() -> Self {
        Self {
            runtime_home: default_runtime_home(),
            ipc: IpcConfig::default(),
            ledger: LedgerConfig::default(),
            delivery: DeliveryConfig::default(),
            automation: AutomationConfig::default(),
        }
    }
}

impl CcccConfig {
    /// Load from `<runtime_home>/config.toml` layered with `CCCC_*` env
    /// overrides.
    pub fn load(runtime_home: &std::path::Path) -> Result<Self, figment::Error> {
        let path = runtime_home.join("config.toml");
        Figment::from(figment::providers::Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CCCC_").split("_"))
            .extract()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,
}

fn default_transport() -> String {
    "unix".to_string()
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8170
}
fn default_op_timeout() -> u64 {
    DEFAULT_IPC_OP_TIMEOUT_SECS
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            bind: default_bind(),
            port: default_port(),
            op_timeout_secs: default_op_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_max_active_bytes")]
    pub max_active_bytes: u64,
    #[serde(default = "default_compaction_min_interval")]
    pub min_interval_seconds: u64,
    #[serde(default = "default_compaction_check_interval")]
    pub compaction_check_interval_seconds: u64,
    #[serde(default = "default_tail_keep")]
    pub tail_keep: usize,
    /// Strict fsync per write by default; batched mode for bulk imports.
    #[serde(default = "bool_true")]
    pub fsync_per_write: bool,
}

fn default_max_active_bytes() -> u64 {
    DEFAULT_MAX_ACTIVE_BYTES
}
fn default_compaction_min_interval() -> u64 {
    DEFAULT_COMPACTION_MIN_INTERVAL_SECS
}
fn default_compaction_check_interval() -> u64 {
    DEFAULT_COMPACTION_CHECK_INTERVAL_SECS
}
fn default_tail_keep() -> usize {
    DEFAULT_COMPACTION_TAIL_KEEP
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_active_bytes: default_max_active_bytes(),
            min_interval_seconds: default_compaction_min_interval(),
            compaction_check_interval_seconds: default_compaction_check_interval(),
            tail_keep: default_tail_keep(),
            fsync_per_write: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_min_interval")]
    pub min_interval_seconds: u64,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_preamble_tail")]
    pub preamble_tail_count: usize,
    #[serde(default = "default_inject_timeout_ms")]
    pub inject_timeout_ms: u64,
}

fn default_min_interval() -> u64 {
    2
}
fn default_queue_depth() -> usize {
    32
}
fn default_preamble_tail() -> usize {
    20
}
fn default_inject_timeout_ms() -> u64 {
    500
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            min_interval_seconds: default_min_interval(),
            queue_depth: default_queue_depth(),
            preamble_tail_count: default_preamble_tail(),
            inject_timeout_ms: default_inject_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_nudge_after")]
    pub nudge_after_seconds: u64,
    #[serde(default = "default_actor_idle_timeout")]
    pub actor_idle_timeout_seconds: u64,
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_seconds: u64,
    #[serde(default = "default_self_check_every")]
    pub self_check_every_handoffs: u32,
    #[serde(default = "default_system_refresh_every")]
    pub system_refresh_every_self_checks: u32,
    #[serde(default = "default_help_nudge_min_messages")]
    pub help_nudge_min_messages: u32,
    #[serde(default = "default_keepalive_max")]
    pub keepalive_max_per_actor: u32,
    #[serde(default = "default_keepalive_delay")]
    pub keepalive_delay_seconds: u64,
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
}

fn default_nudge_after() -> u64 {
    120
}
fn default_actor_idle_timeout() -> u64 {
    300
}
fn default_silence_timeout() -> u64 {
    900
}
fn default_self_check_every() -> u32 {
    10
}
fn default_system_refresh_every() -> u32 {
    5
}
fn default_help_nudge_min_messages() -> u32 {
    5
}
fn default_keepalive_max() -> u32 {
    3
}
fn default_keepalive_delay() -> u64 {
    60
}
fn default_tick_hz() -> u32 {
    1
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            nudge_after_seconds: default_nudge_after(),
            actor_idle_timeout_seconds: default_actor_idle_timeout(),
            silence_timeout_seconds: default_silence_timeout(),
            self_check_every_handoffs: default_self_check_every(),
            system_refresh_every_self_checks: default_system_refresh_every(),
            help_nudge_min_messages: default_help_nudge_min_messages(),
            keepalive_max_per_actor: default_keepalive_max(),
            keepalive_delay_seconds: default_keepalive_delay(),
            tick_hz: default_tick_hz(),
        }
    }
}
