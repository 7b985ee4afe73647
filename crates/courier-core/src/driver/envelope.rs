//! Versioned wire envelope.
//!
//! Version 2.0 wraps the application message as a JSON string:
//!
//! ```json
//! {"oslo.version": "2.0", "oslo.message": "{\"method\": ...}"}
//! ```
//!
//! Version 1.0 is the bare message with no wrapper. The envelope version is
//! independent of any RPC API version carried inside the message.

use courier_types::version::version_is_compatible;
use serde_json::{Map, Value};
use thiserror::Error;

pub const ENVELOPE_VERSION: &str = "2.0";
pub const VERSION_KEY: &str = "oslo.version";
pub const MESSAGE_KEY: &str = "oslo.message";

/// Envelope format requested for an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeVersion {
    /// Bare message.
    #[default]
    V1,
    /// Wrapped message.
    V2,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(String),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Wrap `raw` in a 2.0 envelope.
pub fn serialize_msg(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut envelope = Map::new();
    envelope.insert(
        VERSION_KEY.to_string(),
        Value::String(ENVELOPE_VERSION.to_string()),
    );
    envelope.insert(
        MESSAGE_KEY.to_string(),
        Value::String(Value::Object(raw.clone()).to_string()),
    );
    envelope
}

/// Unwrap an envelope. Messages without a version key are 1.0 and pass
/// through unchanged.
pub fn deserialize_msg(msg: Map<String, Value>) -> Result<Map<String, Value>, EnvelopeError> {
    let Some(version) = msg.get(VERSION_KEY) else {
        return Ok(msg);
    };
    let version = version
        .as_str()
        .ok_or_else(|| EnvelopeError::Malformed(format!("{VERSION_KEY} is not a string")))?;

    match version_is_compatible(ENVELOPE_VERSION, version) {
        Ok(true) => {}
        _ => return Err(EnvelopeError::UnsupportedVersion(version.to_string())),
    }

    let body = msg
        .get(MESSAGE_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| EnvelopeError::Malformed(format!("{MESSAGE_KEY} is missing")))?;
    match serde_json::from_str(body) {
        Ok(Value::Object(raw)) => Ok(raw),
        Ok(_) => Err(EnvelopeError::Malformed("message is not an object".to_string())),
        Err(err) => Err(EnvelopeError::Malformed(err.to_string())),
    }
}
