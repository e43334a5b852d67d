//! Kodi packets: the domain view of a JSON-RPC message.
//!
//! Incoming notifications are turned into a [`KodiPacket`] by the read loop
//! and handed to the host's packet callback. Outgoing calls are built from a
//! `KodiPacket` and serialized with [`KodiPacket::to_json`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A JSON-RPC method invocation or notification with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KodiPacket {
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    time_received: DateTime<Utc>,
}

impl KodiPacket {
    /// Build an outgoing call.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            result: None,
            time_received: Utc::now(),
        }
    }

    /// Shape a decoded message into a packet.
    ///
    /// Missing fields stay empty; a message without `method` yields an
    /// empty method name.
    pub fn from_json(json: &Value, time_received: DateTime<Utc>) -> Self {
        Self {
            method: json
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            params: json.get("params").cloned(),
            result: json.get("result").cloned(),
            time_received,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn time_received(&self) -> DateTime<Utc> {
        self.time_received
    }

    /// JSON-RPC 2.0 request body without an id; the client assigns one.
    pub fn to_json(&self) -> Value {
        let mut request = json!({
            "jsonrpc": "2.0",
            "method": self.method,
        });
        if let Some(params) = &self.params {
            request["params"] = params.clone();
        }
        request
    }
}
