//! Semantic versioning and compatibility. No `semver` crate is pulled in:
//! the grammar this gate actually needs is a fixed `MAJOR.MINOR.PATCH`
//! triple, nothing richer (pre-release tags, build metadata).

use crate::error::{AgentError, AgentResult};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Version {
    pub fn parse(s: &str) -> AgentResult<Self> {
        let mut parts = s.trim().splitn(3, '.');
        let mut next = || -> AgentResult<u32> {
            parts
                .next()
                .ok_or_else(|| AgentError::IncompatibleVersion(format!("unparseable version: {s}")))?
                .parse::<u32>()
                .map_err(|_| AgentError::IncompatibleVersion(format!("unparseable version: {s}")))
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        if parts.next().is_some() {
            return Err(AgentError::IncompatibleVersion(format!("unparseable version: {s}")));
        }
        Ok(Self { major, minor, patch })
    }
}

/// Host accepts a plugin iff major matches exactly, minor is at most the
/// host's minor, and minor is at least the declared minimum-compatible
/// minor.
pub fn is_compatible(host: Version, plugin: Version, min_compatible_minor: u32) -> bool {
    plugin.major == host.major && plugin.minor <= host.minor && plugin.minor >= min_compatible_minor
}

/// The host declines to load a plugin whose `min_host_version` exceeds
/// its own.
pub fn host_satisfies_minimum(host: Version, min_host_version: Version) -> bool {
    host >= min_host_version
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_versions_abort_load() {
        assert!(Version::parse("not-a-version").is_err());
        assert!(Version::parse("1.2").is_err());
        assert!(Version::parse("1.2.3.4").is_err());
    }

    #[test]
    fn major_mismatch_is_incompatible() {
        let host = Version::parse("1.2.0").unwrap();
        let plugin = Version::parse("2.0.0").unwrap();
        assert!(!is_compatible(host, plugin, 0));
    }

    #[test]
    fn minor_within_range_is_compatible() {
        let host = Version::parse("1.5.0").unwrap();
        let plugin = Version::parse("1.3.2").unwrap();
        assert!(is_compatible(host, plugin, 1));
    }

    #[test]
    fn minor_above_host_is_incompatible() {
        let host = Version::parse("1.2.0").unwrap();
        let plugin = Version::parse("1.3.0").unwrap();
        assert!(!is_compatible(host, plugin, 0));
    }

    #[test]
    fn minor_below_minimum_is_incompatible() {
        let host = Version::parse("1.5.0").unwrap();
        let plugin = Version::parse("1.1.0").unwrap();
        assert!(!is_compatible(host, plugin, 2));
    }

    #[test]
    fn patch_is_ignored_for_compatibility() {
        let host = Version::parse("1.2.9").unwrap();
        let plugin = Version::parse("1.2.0").unwrap();
        assert!(is_compatible(host, plugin, 0));
    }

    #[test]
    fn host_must_meet_plugin_minimum_host_version() {
        let host = Version::parse("1.2.0").unwrap();
        assert!(host_satisfies_minimum(host, Version::parse("1.0.0").unwrap()));
        assert!(!host_satisfies_minimum(host, Version::parse("1.5.0").unwrap()));
    }
}
