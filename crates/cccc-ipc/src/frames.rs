//! Wire envelope (spec §4.7): newline-delimited JSON, one frame per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENVELOPE_VERSION: u32 = 1;

/// Client → daemon request line: `{"v":1,"op":"send","args":{...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub v: u32,
    pub op: String,
    #[serde(default)]
    pub args: Value,
}

fn default_version() -> u32 {
    ENVELOPE_VERSION
}

/// Daemon → client response line: `{"v":1,"ok":true,"result":{...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub v: u32,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            v: ENVELOPE_VERSION,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(code: &str, message: impl Into<String>) -> Self {
        Self {
            v: ENVELOPE_VERSION,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
                details: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Unsolicited push frame on an upgraded `events_stream`/`term_attach`
/// connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t")]
pub enum PushFrame {
    #[serde(rename = "event")]
    Event { event: Value },
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "term_output")]
    TermOutput { actor_id: String, data_b64: String },
}
