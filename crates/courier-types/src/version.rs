//! "major.minor" API versions and the compatibility rule used for version
//! caps and endpoint selection.

use std::fmt;
use std::str::FromStr;

use crate::error::VersionError;

/// An endpoint API version of the form `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether a caller requiring `self` can be served by an implementation
    /// (or is allowed by a cap) at `available`.
    ///
    /// Majors must match exactly; the requested minor must not exceed the
    /// available minor.
    pub fn is_compatible_with(&self, available: &ApiVersion) -> bool {
        self.major == available.major && self.minor <= available.minor
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

impl FromStr for ApiVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::Invalid(s.to_string());
        let mut parts = s.trim().splitn(2, '.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self { major, minor })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Check a requested version string against an implementation or cap
/// version string.
pub fn version_is_compatible(available: &str, requested: &str) -> Result<bool, VersionError> {
    let available: ApiVersion = available.parse()?;
    let requested: ApiVersion = requested.parse()?;
    Ok(requested.is_compatible_with(&available))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_minor() {
        let v: ApiVersion = "2.5".parse().unwrap();
        assert_eq!(v, ApiVersion::new(2, 5));
        assert_eq!(v.to_string(), "2.5");
    }

    #[test]
    fn bare_major_means_minor_zero() {
        let v: ApiVersion = "3".parse().unwrap();
        assert_eq!(v, ApiVersion::new(3, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<ApiVersion>().is_err());
        assert!("a.b".parse::<ApiVersion>().is_err());
        assert!("1.x".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn cap_compatibility() {
        assert!(version_is_compatible("2.5", "2.3").unwrap());
        assert!(version_is_compatible("2.5", "2.5").unwrap());
        assert!(!version_is_compatible("2.5", "2.6").unwrap());
        assert!(!version_is_compatible("2.5", "3.0").unwrap());
        assert!(!version_is_compatible("2.5", "1.0").unwrap());
    }
}
