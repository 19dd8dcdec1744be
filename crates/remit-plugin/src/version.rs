//! Semantic-version constraints on plugin dependencies.

use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};

use crate::error::PluginError;

/// A dependency version constraint.
///
/// Accepted forms:
///
/// | Input     | Meaning                     |
/// |-----------|-----------------------------|
/// | `^2.1.0`  | caret: `>=2.1.0, <3.0.0`    |
/// | `~2.1.0`  | tilde: `>=2.1.0, <2.2.0`    |
/// | `=2.1.0`  | exact                       |
/// | `2.1.0`   | exact (bare version)        |
/// | `*`       | any version                 |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    raw: String,
    req: VersionReq,
}

impl VersionConstraint {
    pub fn parse(input: &str) -> Result<Self, PluginError> {
        let raw = input.trim();
        // semver treats a bare version as caret; plugins mean exact.
        let normalized = match raw.chars().next() {
            Some(c) if c.is_ascii_digit() => format!("={raw}"),
            _ => raw.to_string(),
        };
        let req = VersionReq::parse(&normalized).map_err(|e| PluginError::InvalidConstraint {
            constraint: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            raw: raw.to_string(),
            req,
        })
    }

    /// Matches every version.
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            req: VersionReq::STAR,
        }
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.req.matches(version)
    }

    /// The constraint as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for VersionConstraint {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
