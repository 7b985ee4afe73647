//! The fixed set of notification priorities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Notification severity level.
///
/// Endpoint handlers are keyed by the lower-case name; the wire carries the
/// upper-case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Audit,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Sample,
}

impl Priority {
    /// Every priority, in declaration order.
    pub const ALL: [Priority; 7] = [
        Priority::Audit,
        Priority::Debug,
        Priority::Info,
        Priority::Warn,
        Priority::Error,
        Priority::Critical,
        Priority::Sample,
    ];

    /// Lower-case name, used for handler lookup and topic suffixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Audit => "audit",
            Priority::Debug => "debug",
            Priority::Info => "info",
            Priority::Warn => "warn",
            Priority::Error => "error",
            Priority::Critical => "critical",
            Priority::Sample => "sample",
        }
    }

    /// Upper-case name as carried in the notification envelope.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Priority::Audit => "AUDIT",
            Priority::Debug => "DEBUG",
            Priority::Info => "INFO",
            Priority::Warn => "WARN",
            Priority::Error => "ERROR",
            Priority::Critical => "CRITICAL",
            Priority::Sample => "SAMPLE",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive parse. The error carries the rejected input.
impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("info".parse::<Priority>().unwrap(), Priority::Info);
        assert_eq!("INFO".parse::<Priority>().unwrap(), Priority::Info);
        assert_eq!("Critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!("what???".parse::<Priority>().unwrap_err(), "what???");
    }

    #[test]
    fn wire_name_is_upper_case() {
        for p in Priority::ALL {
            assert_eq!(p.wire_name(), p.as_str().to_uppercase());
        }
        assert_eq!(serde_json::to_string(&Priority::Warn).unwrap(), "\"WARN\"");
    }
}
