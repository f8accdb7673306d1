// src/spec/mod.rs

//! The spec model
//!
//! An abstract [`Spec`] is a partial description of a build: a package
//! name plus optional version, variant, compiler and architecture
//! constraints, and constraints on dependencies. Textual form:
//!
//! ```text
//! zlib@1.2: +shared build_type=Release %gcc@9: arch=linux-ubuntu22.04-x86_64 ^cmake@3.20:
//! ```
//!
//! A [`ConcreteSpec`] is a fully decided DAG of nodes, identified by a
//! [`SpecHash`] over its canonical form.

mod concrete;
mod hash;
mod node;
mod parse;

pub use concrete::{ConcreteSpec, Dependency, SpecInterner};
pub use hash::{HashError, SpecHash, HASH_LEN, SHORT_LEN};
pub use node::{AssembleError, DependencyRef, NodeDict, SpecAssembler, SpecFile};

use crate::arch::{ArchConstraint, Architecture};
use crate::compiler::{Compiler, CompilerConstraint};
use crate::error::Result;
use crate::variant::VariantValue;
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};

/// Why a dependency is needed
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
    Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    Build,
    Link,
    Run,
    Test,
}

impl DepType {
    fn bit(self) -> u8 {
        match self {
            DepType::Build => 1,
            DepType::Link => 2,
            DepType::Run => 4,
            DepType::Test => 8,
        }
    }
}

/// A set of dependency types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepTypes(u8);

impl DepTypes {
    /// Default for dependencies declared without a type
    pub const BUILD_LINK: DepTypes = DepTypes(1 | 2);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn of(types: &[DepType]) -> Self {
        types.iter().fold(Self::empty(), |acc, t| acc.with(*t))
    }

    pub fn with(self, t: DepType) -> Self {
        Self(self.0 | t.bit())
    }

    pub fn union(self, other: DepTypes) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(&self, t: DepType) -> bool {
        self.0 & t.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True if the dependency must be present at run time of the dependent
    pub fn is_runtime(&self) -> bool {
        self.contains(DepType::Link) || self.contains(DepType::Run)
    }

    pub fn iter(&self) -> impl Iterator<Item = DepType> + '_ {
        <DepType as strum::IntoEnumIterator>::iter().filter(|t| self.contains(*t))
    }

    /// Parse a comma separated list such as `build,link`
    pub fn parse(s: &str) -> Result<Self> {
        let mut types = Self::empty();
        for item in s.split(',') {
            let item = item.trim();
            let t = DepType::from_str(item).map_err(|_| {
                crate::Error::ParseError(format!("unknown dependency type '{}'", item))
            })?;
            types = types.with(t);
        }
        Ok(types)
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", names.join(","))
    }
}

impl Serialize for DepTypes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for DepTypes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let types = Vec::<DepType>::deserialize(deserializer)?;
        Ok(DepTypes::of(&types))
    }
}

/// A constraint on a dependency inside an abstract spec (`^name...`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    /// Empty when the edge type is left open
    pub deptypes: DepTypes,
    pub spec: Spec,
}

/// A possibly partial description of a build
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Spec {
    /// `None` for anonymous specs such as the `+shared` in a `when` clause
    pub name: Option<String>,
    pub versions: VersionConstraint,
    pub variants: BTreeMap<String, VariantValue>,
    pub compiler: Option<CompilerConstraint>,
    pub arch: ArchConstraint,
    pub dependencies: Vec<DependencySpec>,
}

/// The decided fields of a single node, without its dependencies
#[derive(Debug, Clone, Copy)]
pub struct NodeFacts<'a> {
    pub name: &'a str,
    pub version: &'a Version,
    pub variants: &'a BTreeMap<String, VariantValue>,
    pub compiler: &'a Compiler,
    pub arch: &'a Architecture,
}

impl Spec {
    /// Parse the textual form of a spec
    pub fn parse(s: &str) -> Result<Self> {
        parse::SpecParser::parse(s)
    }

    /// Parse a spec that must name a package
    pub fn parse_named(s: &str) -> Result<Self> {
        let spec = Self::parse(s)?;
        if spec.name.is_none() {
            return Err(crate::Error::ParseError(format!(
                "spec '{}' does not name a package",
                s
            )));
        }
        Ok(spec)
    }

    /// Spec constraining nothing but the name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The same spec with its `^` dependency constraints removed
    pub fn node_only(&self) -> Spec {
        Spec {
            dependencies: Vec::new(),
            ..self.clone()
        }
    }

    /// True if the spec constrains nothing about the node itself
    pub fn is_unconstrained_node(&self) -> bool {
        self.versions.is_any()
            && self.variants.is_empty()
            && self.compiler.is_none()
            && self.arch.is_empty()
    }

    /// Check the node-level constraints against decided node fields
    ///
    /// Dependency constraints are ignored; see
    /// [`ConcreteSpec::satisfies`] for the full check.
    pub fn matches_node(&self, node: &NodeFacts<'_>) -> bool {
        if let Some(name) = &self.name
            && name != node.name
        {
            return false;
        }
        if !self.versions.satisfies(node.version) {
            return false;
        }
        for (name, wanted) in &self.variants {
            match node.variants.get(name) {
                Some(value) if value.satisfies(wanted) => {}
                _ => return false,
            }
        }
        if let Some(compiler) = &self.compiler
            && !compiler.satisfied_by(node.compiler)
        {
            return false;
        }
        self.arch.satisfied_by(node.arch)
    }

    /// Every `^` constraint in this spec, flattened, with nesting removed
    pub fn flat_dependencies(&self) -> Vec<&DependencySpec> {
        let mut out = Vec::new();
        let mut stack: Vec<&DependencySpec> = self.dependencies.iter().rev().collect();
        while let Some(dep) = stack.pop() {
            out.push(dep);
            stack.extend(dep.spec.dependencies.iter().rev());
        }
        out
    }

    /// Format the node part only (no `^` dependencies)
    pub fn format_node(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut head = self.name.clone().unwrap_or_default();
        if !self.versions.is_any() {
            head.push('@');
            head.push_str(&self.versions.to_string());
        }
        if !head.is_empty() {
            parts.push(head);
        }
        for (name, value) in &self.variants {
            parts.push(value.format_as(name));
        }
        if let Some(compiler) = &self.compiler {
            parts.push(format!("%{}", compiler));
        }
        if !self.arch.is_empty() {
            parts.push(self.arch.to_string());
        }
        parts.join(" ")
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_node())?;
        for dep in &self.dependencies {
            write!(f, " ^")?;
            if !dep.deptypes.is_empty() {
                write!(f, "[deptypes={}] ", dep.deptypes)?;
            }
            if dep.spec.dependencies.is_empty() {
                write!(f, "{}", dep.spec)?;
            } else {
                write!(f, "({})", dep.spec)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Spec {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deptypes_parse_and_display() {
        let t = DepTypes::parse("link,build").unwrap();
        assert!(t.contains(DepType::Build));
        assert!(t.contains(DepType::Link));
        assert!(!t.contains(DepType::Run));
        assert_eq!(t.to_string(), "build,link");
        assert_eq!(t, DepTypes::BUILD_LINK);
        assert!(DepTypes::parse("runtime").is_err());
    }

    #[test]
    fn test_deptypes_serde() {
        let t = DepTypes::of(&[DepType::Run, DepType::Build]);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"["build","run"]"#);
        let back: DepTypes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_matches_node() {
        let version = Version::parse("1.2.13").unwrap();
        let variants = BTreeMap::from([("shared".to_string(), VariantValue::Bool(true))]);
        let compiler = Compiler::parse("gcc@12.2.0").unwrap();
        let arch = Architecture::parse("linux-ubuntu22.04-x86_64").unwrap();
        let facts = NodeFacts {
            name: "zlib",
            version: &version,
            variants: &variants,
            compiler: &compiler,
            arch: &arch,
        };

        assert!(Spec::parse("zlib@1.2 +shared %gcc").unwrap().matches_node(&facts));
        assert!(Spec::parse("+shared").unwrap().matches_node(&facts));
        assert!(!Spec::parse("~shared").unwrap().matches_node(&facts));
        assert!(!Spec::parse("zlib@1.3").unwrap().matches_node(&facts));
        assert!(!Spec::parse("zlib %clang").unwrap().matches_node(&facts));
        assert!(!Spec::parse("zlib +pic").unwrap().matches_node(&facts));
        assert!(!Spec::parse("bzip2").unwrap().matches_node(&facts));
        assert!(!Spec::parse("target=aarch64").unwrap().matches_node(&facts));
    }

    #[test]
    fn test_flat_dependencies() {
        let spec = Spec::parse("app ^(libfoo ^zlib) ^cmake").unwrap();
        let names: Vec<_> = spec
            .flat_dependencies()
            .iter()
            .map(|d| d.spec.name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["libfoo", "zlib", "cmake"]);
    }
}
