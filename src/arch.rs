// src/arch.rs
//! Target architecture triples: `platform-os-target`
//!
//! A concrete spec carries a full [`Architecture`] such as
//! `linux-ubuntu22.04-x86_64`. Abstract specs may pin any subset of the
//! three fields through `arch=`, `platform=`, `os=` or `target=`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A fully specified architecture
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Architecture {
    pub platform: String,
    pub os: String,
    pub target: String,
}

fn check_field(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
    {
        return Err(Error::ParseError(format!("invalid {} '{}'", kind, value)));
    }
    Ok(())
}

impl Architecture {
    /// Create an architecture from its three fields
    pub fn new(platform: &str, os: &str, target: &str) -> Result<Self> {
        check_field("platform", platform)?;
        check_field("os", os)?;
        check_field("target", target)?;
        Ok(Self {
            platform: platform.to_string(),
            os: os.to_string(),
            target: target.to_string(),
        })
    }

    /// Parse `platform-os-target`
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        match parts.as_slice() {
            [platform, os, target] => Self::new(platform, os, target),
            _ => Err(Error::ParseError(format!(
                "architecture '{}' is not of the form platform-os-target",
                s
            ))),
        }
    }

    /// Detect the architecture of the running host
    pub fn detect() -> Self {
        let platform = match std::env::consts::OS {
            "macos" => "darwin".to_string(),
            other => other.to_string(),
        };
        let os = detect_os().unwrap_or_else(|| platform.clone());
        Self {
            platform,
            os,
            target: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Read `ID` and `VERSION_ID` from /etc/os-release, e.g. `ubuntu22.04`
fn detect_os() -> Option<String> {
    let content = std::fs::read_to_string("/etc/os-release").ok()?;
    let field = |key: &str| {
        content.lines().find_map(|line| {
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|v| v.trim_matches('"').to_string())
        })
    };
    let id = field("ID")?;
    let os = format!("{}{}", id, field("VERSION_ID").unwrap_or_default());
    let os: String = os
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
        .collect();
    if os.is_empty() { None } else { Some(os) }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.platform, self.os, self.target)
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A partial architecture requirement
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ArchConstraint {
    pub platform: Option<String>,
    pub os: Option<String>,
    pub target: Option<String>,
}

impl ArchConstraint {
    /// Requirement pinning every field of `arch`
    pub fn exact(arch: &Architecture) -> Self {
        Self {
            platform: Some(arch.platform.clone()),
            os: Some(arch.os.clone()),
            target: Some(arch.target.clone()),
        }
    }

    /// True if nothing is pinned
    pub fn is_empty(&self) -> bool {
        self.platform.is_none() && self.os.is_none() && self.target.is_none()
    }

    /// The full architecture, if every field is pinned
    pub fn as_architecture(&self) -> Option<Architecture> {
        Some(Architecture {
            platform: self.platform.clone()?,
            os: self.os.clone()?,
            target: self.target.clone()?,
        })
    }

    /// Pin one field by key (`platform`, `os` or `target`)
    ///
    /// Pinning a field twice to different values is an error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        check_field(key, value)?;
        let slot = match key {
            "platform" => &mut self.platform,
            "os" => &mut self.os,
            "target" => &mut self.target,
            _ => return Err(Error::ParseError(format!("unknown architecture field '{}'", key))),
        };
        if let Some(existing) = slot.as_deref()
            && existing != value
        {
            return Err(Error::ParseError(format!(
                "{} given twice: '{}' and '{}'",
                key, existing, value
            )));
        }
        *slot = Some(value.to_string());
        Ok(())
    }

    /// Pin all three fields from an `arch=` value
    pub fn set_arch(&mut self, value: &str) -> Result<()> {
        let arch = Architecture::parse(value)?;
        self.set("platform", &arch.platform)?;
        self.set("os", &arch.os)?;
        self.set("target", &arch.target)
    }

    /// Check whether `arch` meets every pinned field
    pub fn satisfied_by(&self, arch: &Architecture) -> bool {
        self.platform.as_ref().is_none_or(|p| *p == arch.platform)
            && self.os.as_ref().is_none_or(|o| *o == arch.os)
            && self.target.as_ref().is_none_or(|t| *t == arch.target)
    }

    /// Fill the unpinned fields from `base`
    pub fn complete(&self, base: &Architecture) -> Architecture {
        Architecture {
            platform: self.platform.clone().unwrap_or_else(|| base.platform.clone()),
            os: self.os.clone().unwrap_or_else(|| base.os.clone()),
            target: self.target.clone().unwrap_or_else(|| base.target.clone()),
        }
    }

    /// Combine two requirements; `None` if they pin a field differently
    pub fn merge(&self, other: &ArchConstraint) -> Option<ArchConstraint> {
        fn pick(a: &Option<String>, b: &Option<String>) -> Option<Option<String>> {
            match (a, b) {
                (Some(x), Some(y)) if x != y => None,
                (Some(x), _) | (None, Some(x)) => Some(Some(x.clone())),
                (None, None) => Some(None),
            }
        }
        Some(ArchConstraint {
            platform: pick(&self.platform, &other.platform)?,
            os: pick(&self.os, &other.os)?,
            target: pick(&self.target, &other.target)?,
        })
    }
}

impl fmt::Display for ArchConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(arch) = self.as_architecture() {
            return write!(f, "arch={}", arch);
        }
        let mut parts = Vec::new();
        if let Some(p) = &self.platform {
            parts.push(format!("platform={}", p));
        }
        if let Some(o) = &self.os {
            parts.push(format!("os={}", o));
        }
        if let Some(t) = &self.target {
            parts.push(format!("target={}", t));
        }
        write!(f, "{}", parts.join(" "))
    }
}
