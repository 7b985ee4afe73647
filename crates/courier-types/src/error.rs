use thiserror::Error;

/// Errors raised while constructing or validating a `Target`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("a target cannot request both server '{server}' and fanout delivery")]
    ServerAndFanout { server: String },

    #[error("a topic is required: {0}")]
    MissingTopic(String),

    #[error("a server is required: {0}")]
    MissingServer(String),

    #[error(transparent)]
    InvalidVersion(#[from] VersionError),
}

/// Errors related to "major.minor" API version strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("invalid version '{0}': expected \"major.minor\"")]
    Invalid(String),
}

/// Errors raised while parsing a transport URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("transport URL '{0}' has no scheme")]
    MissingScheme(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_error_display() {
        let err = TargetError::ServerAndFanout {
            server: "host1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "a target cannot request both server 'host1' and fanout delivery"
        );
    }

    #[test]
    fn test_version_error_converts_into_target_error() {
        let err: TargetError = VersionError::Invalid("abc".to_string()).into();
        assert!(err.to_string().contains("abc"));
    }
}
