// src/compiler.rs
//! Compilers a spec is built with: `%gcc@12.2.0`

use crate::error::{Error, Result};
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn check_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::ParseError(format!("invalid compiler name '{}'", name)));
    }
    Ok(())
}

/// A specific compiler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Compiler {
    pub name: String,
    pub version: Version,
}

impl Compiler {
    /// Parse `name@version`
    pub fn parse(s: &str) -> Result<Self> {
        let (name, version) = s.trim().split_once('@').ok_or_else(|| {
            Error::ParseError(format!("compiler '{}' must be written as name@version", s))
        })?;
        check_name(name)?;
        Ok(Self {
            name: name.to_string(),
            version: Version::parse(version)?,
        })
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for Compiler {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A compiler requirement: a name plus acceptable versions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompilerConstraint {
    pub name: String,
    pub versions: VersionConstraint,
}

impl CompilerConstraint {
    /// Parse `name` or `name@versions`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, versions) = match s.split_once('@') {
            Some((name, versions)) => (name, VersionConstraint::parse(versions)?),
            None => (s, VersionConstraint::any()),
        };
        check_name(name)?;
        Ok(Self {
            name: name.to_string(),
            versions,
        })
    }

    /// Requirement pinning exactly `compiler`
    pub fn exact(compiler: &Compiler) -> Self {
        Self {
            name: compiler.name.clone(),
            versions: VersionConstraint::exact(compiler.version.clone()),
        }
    }

    /// Check whether `compiler` meets this requirement
    pub fn satisfied_by(&self, compiler: &Compiler) -> bool {
        self.name == compiler.name && self.versions.satisfies(&compiler.version)
    }

    /// The compiler this pins, if the version is pinned
    pub fn as_compiler(&self) -> Option<Compiler> {
        Some(Compiler {
            name: self.name.clone(),
            version: self.versions.single_version()?.clone(),
        })
    }
}

impl fmt::Display for CompilerConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.versions.is_any() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.versions)
        }
    }
}
