//! Wire record for a failure raised by a remote endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transport-safe representation of a failure:
/// `{class, module, message, tb, args, kwargs}`.
///
/// Every field defaults when absent so that records from older or partial
/// peers still decode into something that can be reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub tb: Vec<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl FailureRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}
