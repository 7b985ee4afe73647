//! Wire envelopes for RPC calls and notifications.
//!
//! Both shapes serialize to plain JSON objects. `serde_json::Map` keeps keys
//! ordered, so two peers producing the same envelope produce the same bytes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::priority::Priority;

/// Request context dictionary supplied by the caller and delivered to the
/// endpoint alongside every message.
pub type RequestContext = Map<String, Value>;

/// RPC call envelope: `{method, args, namespace?, version?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    pub method: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RpcMessage {
    pub fn new(method: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            method: method.into(),
            args,
            namespace: None,
            version: None,
        }
    }

    /// Render as the JSON object handed to a driver.
    pub fn to_wire(&self) -> Map<String, Value> {
        let mut wire = Map::new();
        wire.insert("method".to_string(), Value::String(self.method.clone()));
        wire.insert("args".to_string(), Value::Object(self.args.clone()));
        if let Some(namespace) = &self.namespace {
            wire.insert("namespace".to_string(), Value::String(namespace.clone()));
        }
        if let Some(version) = &self.version {
            wire.insert("version".to_string(), Value::String(version.clone()));
        }
        wire
    }

    /// Parse a driver-delivered JSON object.
    pub fn from_wire(wire: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(wire.clone()))
    }
}

/// Notification envelope.
///
/// `priority` stays a string: listeners must tolerate (and log) priorities
/// outside the known set instead of failing to decode the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message_id: String,
    pub publisher_id: String,
    pub event_type: String,
    pub priority: String,
    pub payload: Value,
    pub timestamp: String,
}

impl Notification {
    /// Build a fresh notification with a random message id and the current
    /// UTC time.
    pub fn new(
        publisher_id: impl Into<String>,
        event_type: impl Into<String>,
        priority: Priority,
        payload: Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            publisher_id: publisher_id.into(),
            event_type: event_type.into(),
            priority: priority.wire_name().to_string(),
            payload,
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        }
    }

    pub fn to_wire(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // A struct of strings and a Value always serializes to an object.
            _ => Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
