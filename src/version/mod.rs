// src/version/mod.rs

//! Version handling and constraint satisfaction for package specs
//!
//! Versions are dotted sequences of numeric and alphabetic components
//! (`1.2.13`, `3.0rc1`, `2024-01`). Constraints use the `@` spec syntax:
//!
//! - `1.2`       any version whose components start with 1.2 (1.2, 1.2.13)
//! - `=1.2`      exactly 1.2
//! - `1.2:`      1.2 or newer
//! - `:1.4`      up to and including any 1.4.x
//! - `1.2:1.4`   closed range
//! - `1.2,2.0:`  union of the above

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Version names that sort above every numbered release
const INFINITY_VERSIONS: &[&str] = &["stable", "trunk", "head", "master", "main", "develop"];

/// One component of a version
#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Number(u64),
    Text(String),
}

impl Component {
    fn rank(&self) -> (u8, usize) {
        match self {
            Component::Number(_) => (1, 0),
            Component::Text(t) => match INFINITY_VERSIONS.iter().position(|v| v == t) {
                Some(idx) => (2, idx),
                None => (0, 0),
            },
        }
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Component::Number(a), Component::Number(b)) => a.cmp(b),
            (Component::Text(a), Component::Text(b)) if self.rank() == other.rank() => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A package version such as `1.2.13`
///
/// The original text is preserved for display and hashing; comparisons
/// use the parsed components, falling back to the text so that `Ord`
/// agrees with `Eq`.
#[derive(Debug, Clone)]
pub struct Version {
    text: String,
    components: Vec<Component>,
}

impl Version {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → [1, 2, 3]
    /// - "3.0rc1" → [3, 0, rc, 1]
    /// - "develop" → [develop] (newer than any release)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::ParseError("empty version".to_string()));
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(Error::ParseError(format!(
                "invalid character '{}' in version '{}'",
                bad, s
            )));
        }

        let mut components = Vec::new();
        for segment in s.split(['.', '-', '_']) {
            if segment.is_empty() {
                return Err(Error::ParseError(format!("empty component in version '{}'", s)));
            }
            let mut current = String::new();
            let mut digits = false;
            for c in segment.chars() {
                if !current.is_empty() && c.is_ascii_digit() != digits {
                    components.push(Self::component(&current, digits, s)?);
                    current.clear();
                }
                digits = c.is_ascii_digit();
                current.push(c);
            }
            components.push(Self::component(&current, digits, s)?);
        }

        Ok(Self {
            text: s.to_string(),
            components,
        })
    }

    fn component(text: &str, digits: bool, whole: &str) -> Result<Component> {
        if digits {
            text.parse::<u64>().map(Component::Number).map_err(|e| {
                Error::ParseError(format!("invalid number in version '{}': {}", whole, e))
            })
        } else {
            Ok(Component::Text(text.to_ascii_lowercase()))
        }
    }

    /// The version as written
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True if this version's components are a leading prefix of `other`'s
    ///
    /// `1.2` is a prefix of `1.2` and `1.2.13`, but not of `1.20`.
    pub fn is_prefix_of(&self, other: &Version) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| a == b)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components
            .cmp(&other.components)
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// One alternative inside a version constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRange {
    /// `=x`: exactly this version
    Exact(Version),
    /// `lo:hi`, `lo:`, `:hi` or a bare `x` (lo == hi, prefix match)
    Range {
        lo: Option<Version>,
        hi: Option<Version>,
    },
}

impl VersionRange {
    fn contains(&self, version: &Version) -> bool {
        match self {
            VersionRange::Exact(v) => version == v,
            VersionRange::Range { lo, hi } => {
                let above = lo.as_ref().is_none_or(|lo| version >= lo || lo.is_prefix_of(version));
                let below = hi.as_ref().is_none_or(|hi| version <= hi || hi.is_prefix_of(version));
                above && below
            }
        }
    }

    fn parse(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix('=') {
            return Ok(VersionRange::Exact(Version::parse(rest)?));
        }
        match s.split_once(':') {
            Some((lo, hi)) => {
                let bound = |b: &str| -> Result<Option<Version>> {
                    if b.is_empty() { Ok(None) } else { Version::parse(b).map(Some) }
                };
                let (lo, hi) = (bound(lo)?, bound(hi)?);
                if let (Some(l), Some(h)) = (&lo, &hi)
                    && l > h
                    && !h.is_prefix_of(l)
                {
                    return Err(Error::ParseError(format!(
                        "version range '{}' has lower bound above upper bound",
                        s
                    )));
                }
                Ok(VersionRange::Range { lo, hi })
            }
            None => {
                let v = Version::parse(s)?;
                Ok(VersionRange::Range {
                    lo: Some(v.clone()),
                    hi: Some(v),
                })
            }
        }
    }

    fn is_unbounded(&self) -> bool {
        matches!(self, VersionRange::Range { lo: None, hi: None })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Exact(v) => write!(f, "={}", v),
            VersionRange::Range { lo: Some(lo), hi: Some(hi) } if lo == hi => write!(f, "{}", lo),
            VersionRange::Range { lo, hi } => {
                if let Some(lo) = lo {
                    write!(f, "{}", lo)?;
                }
                write!(f, ":")?;
                if let Some(hi) = hi {
                    write!(f, "{}", hi)?;
                }
                Ok(())
            }
        }
    }
}

/// A set of acceptable versions: a union of ranges, empty meaning "any"
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VersionConstraint {
    ranges: Vec<VersionRange>,
}

impl VersionConstraint {
    /// Constraint accepting every version
    pub fn any() -> Self {
        Self::default()
    }

    /// Constraint accepting only `version`
    pub fn exact(version: Version) -> Self {
        Self {
            ranges: vec![VersionRange::Exact(version)],
        }
    }

    /// Constraint written as a bare version, the way concrete specs print
    pub fn pinned(version: Version) -> Self {
        Self {
            ranges: vec![VersionRange::Range {
                lo: Some(version.clone()),
                hi: Some(version),
            }],
        }
    }

    /// Parse the text following `@` in a spec
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::any());
        }

        let mut ranges = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::ParseError(format!("empty item in version list '{}'", s)));
            }
            let range = VersionRange::parse(part)?;
            if range.is_unbounded() {
                return Ok(Self::any());
            }
            if !ranges.contains(&range) {
                ranges.push(range);
            }
        }
        Ok(Self { ranges })
    }

    /// True if no version is excluded
    pub fn is_any(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &Version) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|r| r.contains(version))
    }

    /// The single version this constraint pins, if it pins one
    ///
    /// Both `=1.2.13` and a bare `1.2.13` pin a version; the bare form is
    /// how concrete specs are printed.
    pub fn single_version(&self) -> Option<&Version> {
        match self.ranges.as_slice() {
            [VersionRange::Exact(v)] => Some(v),
            [VersionRange::Range { lo: Some(lo), hi: Some(hi) }] if lo == hi => Some(lo),
            _ => None,
        }
    }

    /// Narrow `candidates` to those this constraint accepts, keeping order
    pub fn filter<'a>(&self, candidates: impl IntoIterator<Item = &'a Version>) -> Vec<&'a Version> {
        candidates.into_iter().filter(|v| self.satisfies(v)).collect()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, ":");
        }
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

impl FromStr for VersionConstraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
