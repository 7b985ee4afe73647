//! Message addressing.
//!
//! A `Target` names a logical destination: the exchange (routing domain),
//! the topic (queue family), an optional server (one instance on the topic),
//! the fanout flag (every server on the topic), plus the namespace and
//! version an RPC endpoint is selected by. Targets are immutable values and
//! are used as map keys, so they only come out of `TargetBuilder::build`,
//! which rejects combinations with no defined delivery semantics.

use std::fmt;

use crate::error::TargetError;
use crate::version::ApiVersion;

/// Immutable addressing descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Target {
    exchange: Option<String>,
    topic: Option<String>,
    namespace: Option<String>,
    version: Option<String>,
    server: Option<String>,
    fanout: bool,
}

impl Target {
    /// Start building a target from scratch.
    pub fn builder() -> TargetBuilder {
        TargetBuilder::default()
    }

    /// A target addressing the shared queue of `topic`.
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::default()
        }
    }

    /// Builder seeded with this target's fields, for deriving a variant.
    pub fn to_builder(&self) -> TargetBuilder {
        TargetBuilder {
            inner: self.clone(),
        }
    }

    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn fanout(&self) -> bool {
        self.fanout
    }

    /// The topic, or `MissingTopic` naming this target.
    pub fn require_topic(&self) -> Result<&str, TargetError> {
        self.topic()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TargetError::MissingTopic(self.to_string()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attrs = Vec::new();
        let mut push = |name: &str, value: Option<&str>| {
            if let Some(v) = value {
                attrs.push(format!("{name}={v}"));
            }
        };
        push("exchange", self.exchange());
        push("topic", self.topic());
        push("namespace", self.namespace());
        push("version", self.version());
        push("server", self.server());
        if self.fanout {
            attrs.push("fanout=true".to_string());
        }
        write!(f, "<Target {}>", attrs.join(", "))
    }
}

/// Builder for `Target`.
///
/// Validation happens in `build()`: a version must parse as "major.minor"
/// and a target may not ask for server-specific and fanout delivery at once.
#[derive(Debug, Clone, Default)]
pub struct TargetBuilder {
    inner: Target,
}

impl TargetBuilder {
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.inner.exchange = Some(exchange.into());
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.inner.topic = Some(topic.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.inner.namespace = Some(namespace.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.inner.version = Some(version.into());
        self
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.inner.server = Some(server.into());
        self
    }

    /// Drop any server set on the seed target.
    pub fn any_server(mut self) -> Self {
        self.inner.server = None;
        self
    }

    pub fn fanout(mut self, fanout: bool) -> Self {
        self.inner.fanout = fanout;
        self
    }

    pub fn build(self) -> Result<Target, TargetError> {
        let target = self.inner;
        if target.fanout {
            if let Some(server) = &target.server {
                return Err(TargetError::ServerAndFanout {
                    server: server.clone(),
                });
            }
        }
        if let Some(version) = &target.version {
            version.parse::<ApiVersion>()?;
        }
        Ok(target)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn builder_sets_all_fields() {
        let target = Target::builder()
            .exchange("nova")
            .topic("compute")
            .namespace("baseapi")
            .version("2.1")
            .server("host1")
            .build()
            .unwrap();

        assert_eq!(target.exchange(), Some("nova"));
        assert_eq!(target.topic(), Some("compute"));
        assert_eq!(target.namespace(), Some("baseapi"));
        assert_eq!(target.version(), Some("2.1"));
        assert_eq!(target.server(), Some("host1"));
        assert!(!target.fanout());
    }

    #[test]
    fn server_and_fanout_is_rejected() {
        let err = Target::builder()
            .topic("t")
            .server("s")
            .fanout(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, TargetError::ServerAndFanout { ref server } if server == "s"));
    }

    #[test]
    fn invalid_version_is_rejected() {
        let err = Target::builder().topic("t").version("two").build().unwrap_err();
        assert!(matches!(err, TargetError::InvalidVersion(_)));
    }

    #[test]
    fn to_builder_derives_variant() {
        let base = Target::builder().topic("t").server("s").build().unwrap();
        let fanout = base.to_builder().any_server().fanout(true).build().unwrap();
        assert_eq!(fanout.topic(), Some("t"));
        assert_eq!(fanout.server(), None);
        assert!(fanout.fanout());
        // The seed is untouched.
        assert_eq!(base.server(), Some("s"));
    }

    #[test]
    fn targets_are_usable_as_map_keys() {
        let mut map = HashMap::new();
        map.insert(Target::for_topic("a"), 1);
        map.insert(Target::for_topic("a"), 2);
        map.insert(Target::for_topic("b"), 3);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&Target::for_topic("a")], 2);
    }

    #[test]
    fn require_topic() {
        assert_eq!(Target::for_topic("t").require_topic().unwrap(), "t");
        assert!(matches!(
            Target::default().require_topic(),
            Err(TargetError::MissingTopic(_))
        ));
        assert!(Target::for_topic("").require_topic().is_err());
    }

    #[test]
    fn display_lists_set_fields() {
        let target = Target::builder().topic("t").fanout(true).build().unwrap();
        assert_eq!(target.to_string(), "<Target topic=t, fanout=true>");
    }
}
