//! Process-wide latest-value cache, guarded by a single lock.
//!
//! `TagCache` itself only holds the mapping; the handoff to the websocket
//! reactor lives in `crate::ws`, which wraps a `TagCache` together with a
//! broadcast sender (see `crate::context::GatewayContext`).

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::codec::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
    Init,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

/// One entry as broadcast to the dashboard. `value` is `None` on a read
/// failure, serialized as the literal string `"ERR"`.
#[derive(Debug, Clone, Serialize)]
pub struct TagPayload {
    pub name: String,
    #[serde(serialize_with = "serialize_value_or_err")]
    pub value: Option<Value>,
    pub time: String,
    pub dir: Direction,
    pub status: Status,
}

fn serialize_value_or_err<S>(value: &Option<Value>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        None => s.serialize_str("ERR"),
        Some(Value::Int16(v)) => s.serialize_i16(*v),
        Some(Value::Uint16(v)) => s.serialize_u16(*v),
        Some(Value::Int32(v)) => s.serialize_i32(*v),
        Some(Value::Uint32(v)) => s.serialize_u32(*v),
        Some(Value::Float(v)) => s.serialize_f32(*v),
        Some(Value::Double(v)) => s.serialize_f64(*v),
        Some(Value::Bool(v)) => s.serialize_bool(*v),
        Some(Value::String(v)) => s.serialize_str(v),
    }
}

impl TagPayload {
    pub fn now_hhmmss() -> String {
        chrono::Local::now().format("%H:%M:%S").to_string()
    }

    pub fn read_ok(name: impl Into<String>, value: Value) -> Self {
        TagPayload {
            name: name.into(),
            value: Some(value),
            time: Self::now_hhmmss(),
            dir: Direction::Read,
            status: Status::Online,
        }
    }

    pub fn read_failed(name: impl Into<String>) -> Self {
        TagPayload {
            name: name.into(),
            value: None,
            time: Self::now_hhmmss(),
            dir: Direction::Read,
            status: Status::Offline,
        }
    }

    pub fn write_ok(name: impl Into<String>, value: Value) -> Self {
        TagPayload {
            name: name.into(),
            value: Some(value),
            time: Self::now_hhmmss(),
            dir: Direction::Write,
            status: Status::Online,
        }
    }

    pub fn init(name: impl Into<String>) -> Self {
        TagPayload {
            name: name.into(),
            value: None,
            time: Self::now_hhmmss(),
            dir: Direction::Init,
            status: Status::Offline,
        }
    }
}

/// `node_id_str -> latest payload`, guarded by a single `std::sync::Mutex`.
/// All access must exclude I/O while the lock is held.
#[derive(Debug, Default)]
pub struct TagCache {
    entries: Mutex<HashMap<String, TagPayload>>,
}

impl TagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a payload, returning the payload that was
    /// previously cached for this node (if any) so callers can implement
    /// echo suppression without a second lock acquisition.
    pub fn set(&self, node_id: &str, payload: TagPayload) -> Option<TagPayload> {
        let mut guard = self.entries.lock().unwrap();
        guard.insert(node_id.to_string(), payload)
    }

    pub fn get(&self, node_id: &str) -> Option<TagPayload> {
        self.entries.lock().unwrap().get(node_id).cloned()
    }

    /// Full snapshot, sent to a websocket client immediately on connect.
    pub fn snapshot(&self) -> HashMap<String, TagPayload> {
        self.entries.lock().unwrap().clone()
    }
}
