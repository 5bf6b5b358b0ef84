// packages/engine/src/provider/version.rs
//! Version stamp carried by an artifact
//!
//! `META-INF/versions.list` starts with a line of the form
//! `<hash> <version> [<path>...]`. Fields after the version are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const VERSIONS_RESOURCE: &str = "META-INF/versions.list";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub hash: String,
    pub version: String,
}

impl VersionInfo {
    /// Read the first two fields of the first non-blank line
    pub fn parse(text: &str) -> Option<Self> {
        let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let version = parts.next()?;
        Some(Self {
            hash: hash.to_string(),
            version: version.to_string(),
        })
    }

    pub fn short_hash(&self) -> &str {
        match self.hash.char_indices().nth(8) {
            Some((end, _)) => &self.hash[..end],
            None => &self.hash,
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.version, self.short_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let info = VersionInfo::parse("3f2a9c0d7e11b4c2 1.20.4\n").unwrap();
        assert_eq!(info.version, "1.20.4");
        assert_eq!(info.to_string(), "1.20.4-3f2a9c0d");
    }

    #[test]
    fn test_short_hash_keeps_short_values() {
        let info = VersionInfo::parse("\n  abc 2.0").unwrap();
        assert_eq!(info.to_string(), "2.0-abc");
    }

    #[test]
    fn test_malformed() {
        assert!(VersionInfo::parse("").is_none());
        assert!(VersionInfo::parse("onlyhash").is_none());
        assert!(VersionInfo::parse("   \n\t\n").is_none());
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let info = VersionInfo::parse("3f2a9c0d7e11b4c2\t1.20.4\t1.20.4/paper-1.20.4.jar\n").unwrap();
        assert_eq!(info.hash, "3f2a9c0d7e11b4c2");
        assert_eq!(info.version, "1.20.4");
    }
}
