// src/repository/descriptor.rs

//! Package descriptors
//!
//! A descriptor is a versioned TOML document declaring what a package can
//! be built as: its versions, variants, conditional dependencies and
//! conflicts. Descriptors are validated when loaded so that concretization
//! never sees a malformed one.
//!
//! ```toml
//! schema = 1
//! name = "zlib"
//! build_system = "cmake"
//!
//! [[versions]]
//! version = "1.2.13"
//!
//! [variants.shared]
//! default = true
//!
//! [[dependencies]]
//! spec = "cmake@3.20:"
//! type = ["build"]
//! when = "+shared"
//!
//! [[conflicts]]
//! spec = "%gcc@:4"
//! msg = "needs C99"
//! ```

use super::build_system::BuildSystem;
use crate::error::{Error, Result};
use crate::spec::{DepType, DepTypes, NodeFacts, Spec};
use crate::variant::{AllowedValues, DEV_PATH, VariantDecl, VariantValue};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Descriptor schema this version of sprig understands
pub const DESCRIPTOR_SCHEMA: u32 = 1;

/// Spec keys that cannot be used as variant names
const RESERVED_VARIANTS: &[&str] = &[DEV_PATH, "arch", "platform", "os", "target"];

fn default_schema() -> u32 {
    DESCRIPTOR_SCHEMA
}

/// A version entry in a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    #[serde(default)]
    pub preferred: bool,
    #[serde(default)]
    pub deprecated: bool,
}

/// The default of a variant as written in TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Bool(bool),
    One(String),
    Many(Vec<String>),
}

/// A variant entry in a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantEntry {
    pub default: DefaultValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default)]
    pub multi: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A dependency entry in a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub spec: String,
    #[serde(default, rename = "type", skip_serializing_if = "Vec::is_empty")]
    pub deptypes: Vec<DepType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// A conflict entry in a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub spec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// A descriptor as written, before validation
///
/// Also serves as a builder for descriptors defined in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default = "default_schema")]
    pub schema: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub build_system: BuildSystem,
    #[serde(default)]
    pub independent_toolchain: bool,
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    #[serde(default)]
    pub variants: BTreeMap<String, VariantEntry>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
    #[serde(default)]
    pub conflicts: Vec<ConflictEntry>,
}

impl PackageManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: DESCRIPTOR_SCHEMA,
            name: name.into(),
            description: String::new(),
            build_system: BuildSystem::default(),
            independent_toolchain: false,
            versions: Vec::new(),
            variants: BTreeMap::new(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// Parse a descriptor from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid package descriptor: {}", e)))
    }

    /// Parse a descriptor file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::ParseError(msg) => Error::ParseError(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ParseError(e.to_string()))
    }

    pub fn versions<'a>(mut self, versions: impl IntoIterator<Item = &'a str>) -> Self {
        for v in versions {
            self.versions.push(VersionEntry {
                version: v.to_string(),
                preferred: false,
                deprecated: false,
            });
        }
        self
    }

    pub fn preferred_version(mut self, version: &str) -> Self {
        self.versions.push(VersionEntry {
            version: version.to_string(),
            preferred: true,
            deprecated: false,
        });
        self
    }

    pub fn deprecated_version(mut self, version: &str) -> Self {
        self.versions.push(VersionEntry {
            version: version.to_string(),
            preferred: false,
            deprecated: true,
        });
        self
    }

    pub fn bool_variant(mut self, name: &str, default: bool) -> Self {
        self.variants.insert(
            name.to_string(),
            VariantEntry {
                default: DefaultValue::Bool(default),
                values: Vec::new(),
                multi: false,
                description: String::new(),
            },
        );
        self
    }

    pub fn single_variant(mut self, name: &str, default: &str, values: &[&str]) -> Self {
        self.variants.insert(
            name.to_string(),
            VariantEntry {
                default: DefaultValue::One(default.to_string()),
                values: values.iter().map(|v| v.to_string()).collect(),
                multi: false,
                description: String::new(),
            },
        );
        self
    }

    pub fn multi_variant(mut self, name: &str, default: &[&str], values: &[&str]) -> Self {
        self.variants.insert(
            name.to_string(),
            VariantEntry {
                default: DefaultValue::Many(default.iter().map(|v| v.to_string()).collect()),
                values: values.iter().map(|v| v.to_string()).collect(),
                multi: true,
                description: String::new(),
            },
        );
        self
    }

    pub fn depends_on(mut self, spec: &str, types: &[DepType], when: Option<&str>) -> Self {
        self.dependencies.push(DependencyEntry {
            spec: spec.to_string(),
            deptypes: types.to_vec(),
            when: when.map(str::to_string),
        });
        self
    }

    pub fn conflicts(mut self, spec: &str, when: Option<&str>, msg: Option<&str>) -> Self {
        self.conflicts.push(ConflictEntry {
            spec: spec.to_string(),
            when: when.map(str::to_string),
            msg: msg.map(str::to_string),
        });
        self
    }

    pub fn build_system(mut self, build_system: BuildSystem) -> Self {
        self.build_system = build_system;
        self
    }

    pub fn independent_toolchain(mut self) -> Self {
        self.independent_toolchain = true;
        self
    }

    /// Validate and produce a descriptor
    pub fn build(self) -> Result<PackageDescriptor> {
        PackageDescriptor::from_manifest(self)
    }
}

/// A declared version with its preference flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDecl {
    pub version: Version,
    pub preferred: bool,
    pub deprecated: bool,
}

/// A validated, possibly conditional dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDecl {
    /// Named spec with node constraints only
    pub spec: Spec,
    pub deptypes: DepTypes,
    /// Anonymous spec the depending node must match
    pub when: Option<Spec>,
}

impl DependencyDecl {
    pub fn name(&self) -> &str {
        self.spec.name().unwrap_or_default()
    }

    pub fn applies_to(&self, node: &NodeFacts<'_>) -> bool {
        self.when.as_ref().is_none_or(|w| w.matches_node(node))
    }
}

/// A validated conflict rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDecl {
    /// Anonymous spec; may carry `^dep` constraints
    pub spec: Spec,
    pub when: Option<Spec>,
    pub message: Option<String>,
}

impl ConflictDecl {
    pub fn applies_to(&self, node: &NodeFacts<'_>) -> bool {
        self.when.as_ref().is_none_or(|w| w.matches_node(node))
    }
}

/// A validated package descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub name: String,
    pub description: String,
    pub build_system: BuildSystem,
    pub independent_toolchain: bool,
    /// Preference order: preferred first, then newest, deprecated last
    pub versions: Vec<VersionDecl>,
    pub variants: BTreeMap<String, VariantDecl>,
    pub dependencies: Vec<DependencyDecl>,
    pub conflicts: Vec<ConflictDecl>,
}

impl PackageDescriptor {
    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        PackageManifest::from_toml(content)?.build()
    }

    /// Validate a manifest
    pub fn from_manifest(manifest: PackageManifest) -> Result<Self> {
        let name = manifest.name.clone();
        let invalid = |reason: String| Error::InvalidDescriptor {
            package: name.clone(),
            reason,
        };

        if manifest.schema != DESCRIPTOR_SCHEMA {
            return Err(invalid(format!(
                "unsupported schema {} (expected {})",
                manifest.schema, DESCRIPTOR_SCHEMA
            )));
        }
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("package name must be alphanumeric, '-' or '_'".to_string()));
        }

        // Versions
        if manifest.versions.is_empty() {
            return Err(invalid("no versions declared".to_string()));
        }
        let mut versions = Vec::with_capacity(manifest.versions.len());
        let mut seen = HashSet::new();
        for entry in &manifest.versions {
            let version = Version::parse(&entry.version).map_err(|e| invalid(e.to_string()))?;
            if !seen.insert(version.clone()) {
                return Err(invalid(format!("version {} declared twice", version)));
            }
            versions.push(VersionDecl {
                version,
                preferred: entry.preferred,
                deprecated: entry.deprecated,
            });
        }
        versions.sort_by(|a, b| {
            b.preferred
                .cmp(&a.preferred)
                .then(a.deprecated.cmp(&b.deprecated))
                .then(b.version.cmp(&a.version))
        });

        // Variants
        let mut variants = BTreeMap::new();
        for (vname, entry) in &manifest.variants {
            if RESERVED_VARIANTS.contains(&vname.as_str()) {
                return Err(invalid(format!("variant name '{}' is reserved", vname)));
            }
            let decl = variant_decl(vname, entry);
            decl.validate().map_err(invalid)?;
            variants.insert(vname.clone(), decl);
        }
        variants.insert(DEV_PATH.to_string(), VariantDecl::dev_path());

        let check_condition = |text: &str| -> Result<Spec> {
            let when = Spec::parse(text).map_err(|e| invalid(e.to_string()))?;
            if when.name().is_some_and(|n| n != name) {
                return Err(invalid(format!("condition '{}' names another package", text)));
            }
            if !when.dependencies.is_empty() {
                return Err(invalid(format!("condition '{}' constrains dependencies", text)));
            }
            check_variants(&when, &variants).map_err(invalid)?;
            Ok(when)
        };

        // Dependencies
        let mut dependencies = Vec::with_capacity(manifest.dependencies.len());
        for entry in &manifest.dependencies {
            let spec = Spec::parse_named(&entry.spec).map_err(|e| invalid(e.to_string()))?;
            if spec.name() == Some(name.as_str()) {
                return Err(invalid("package depends on itself".to_string()));
            }
            if !spec.dependencies.is_empty() {
                return Err(invalid(format!(
                    "dependency '{}' may not constrain its own dependencies",
                    entry.spec
                )));
            }
            let deptypes = if entry.deptypes.is_empty() {
                DepTypes::BUILD_LINK
            } else {
                DepTypes::of(&entry.deptypes)
            };
            let when = entry.when.as_deref().map(check_condition).transpose()?;
            dependencies.push(DependencyDecl {
                spec,
                deptypes,
                when,
            });
        }

        // Conflicts
        let mut conflicts = Vec::with_capacity(manifest.conflicts.len());
        for entry in &manifest.conflicts {
            let spec = Spec::parse(&entry.spec).map_err(|e| invalid(e.to_string()))?;
            if spec.name().is_some_and(|n| n != name) {
                return Err(invalid(format!("conflict '{}' names another package", entry.spec)));
            }
            check_variants(&spec, &variants).map_err(invalid)?;
            let when = entry.when.as_deref().map(check_condition).transpose()?;
            conflicts.push(ConflictDecl {
                spec,
                when,
                message: entry.msg.clone(),
            });
        }

        Ok(Self {
            name: manifest.name,
            description: manifest.description,
            build_system: manifest.build_system,
            independent_toolchain: manifest.independent_toolchain,
            versions,
            variants,
            dependencies,
            conflicts,
        })
    }

    /// Versions in preference order
    pub fn version_list(&self) -> Vec<Version> {
        self.versions.iter().map(|v| v.version.clone()).collect()
    }
}

fn variant_decl(name: &str, entry: &VariantEntry) -> VariantDecl {
    let (default, allowed) = match (&entry.default, entry.multi) {
        (DefaultValue::Bool(b), _) => (Some(VariantValue::Bool(*b)), AllowedValues::Bool),
        (DefaultValue::One(v), false) => (
            Some(VariantValue::single(v.clone())),
            AllowedValues::Single(entry.values.clone()),
        ),
        (DefaultValue::One(v), true) => (
            Some(VariantValue::single(v.clone())),
            AllowedValues::Multi(entry.values.clone()),
        ),
        (DefaultValue::Many(vs), multi) => {
            let value = VariantValue::Values(vs.iter().cloned().collect());
            let allowed = if multi {
                AllowedValues::Multi(entry.values.clone())
            } else {
                AllowedValues::Single(entry.values.clone())
            };
            (Some(value), allowed)
        }
    };
    VariantDecl {
        name: name.to_string(),
        default,
        allowed,
        description: entry.description.clone(),
    }
}

/// Every variant a spec mentions must be declared and able to take the value
fn check_variants(spec: &Spec, variants: &BTreeMap<String, VariantDecl>) -> std::result::Result<(), String> {
    for (vname, value) in &spec.variants {
        match variants.get(vname) {
            Some(decl) if decl.accepts_constraint(value) => {}
            Some(_) => return Err(format!("variant {} cannot be {}", vname, value)),
            None => return Err(format!("unknown variant '{}'", vname)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;
    use crate::compiler::Compiler;

    const ZLIB_TOML: &str = r#"
schema = 1
name = "zlib"
description = "Compression library"
build_system = "cmake"

[[versions]]
version = "1.2.11"

[[versions]]
version = "1.2.13"

[[versions]]
version = "1.3.0"
deprecated = true

[variants.shared]
default = true

[variants.build_type]
default = "Release"
values = ["Debug", "Release"]

[[dependencies]]
spec = "cmake@3.20:"
type = ["build"]

[[dependencies]]
spec = "bzip2"
when = "+shared"

[[conflicts]]
spec = "%gcc@:4"
msg = "needs a C99 compiler"
"#;

    #[test]
    fn test_parse_and_validate_toml() {
        let desc = PackageDescriptor::from_toml(ZLIB_TOML).unwrap();
        assert_eq!(desc.name, "zlib");
        assert_eq!(desc.build_system, BuildSystem::CMake);
        let order: Vec<_> = desc.version_list().iter().map(|v| v.to_string()).collect();
        assert_eq!(order, vec!["1.2.13", "1.2.11", "1.3.0"]);
        assert!(desc.variants.contains_key("shared"));
        assert!(desc.variants.contains_key(DEV_PATH));
        assert_eq!(desc.dependencies.len(), 2);
        assert!(desc.dependencies[0].deptypes.contains(DepType::Build));
        assert!(!desc.dependencies[0].deptypes.contains(DepType::Link));
        assert_eq!(desc.dependencies[1].deptypes, DepTypes::BUILD_LINK);
        assert_eq!(desc.conflicts[0].message.as_deref(), Some("needs a C99 compiler"));
    }

    #[test]
    fn test_preferred_version_first() {
        let desc = PackageManifest::new("cmake")
            .versions(["3.27.0", "3.26.4"])
            .preferred_version("3.20.0")
            .build()
            .unwrap();
        assert_eq!(desc.versions[0].version.to_string(), "3.20.0");
        assert_eq!(desc.versions[1].version.to_string(), "3.27.0");
    }

    #[test]
    fn test_conditional_dependency() {
        let desc = PackageDescriptor::from_toml(ZLIB_TOML).unwrap();
        let version = Version::parse("1.2.13").unwrap();
        let compiler = Compiler::parse("gcc@12.2.0").unwrap();
        let arch = Architecture::parse("linux-ubuntu22.04-x86_64").unwrap();
        let shared = BTreeMap::from([("shared".to_string(), VariantValue::Bool(true))]);
        let static_only = BTreeMap::from([("shared".to_string(), VariantValue::Bool(false))]);

        let with_shared = NodeFacts {
            name: "zlib",
            version: &version,
            variants: &shared,
            compiler: &compiler,
            arch: &arch,
        };
        let without_shared = NodeFacts {
            variants: &static_only,
            ..with_shared
        };
        assert!(desc.dependencies[1].applies_to(&with_shared));
        assert!(!desc.dependencies[1].applies_to(&without_shared));
        assert!(desc.dependencies[0].applies_to(&without_shared));
    }

    #[test]
    fn test_rejects_bad_descriptors() {
        let cases = [
            PackageManifest::new("zlib"),
            PackageManifest::new("zlib").versions(["1.0", "1.0"]),
            PackageManifest::new("zlib").versions(["1.0"]).bool_variant("arch", true),
            PackageManifest::new("zlib").versions(["1.0"]).depends_on("zlib", &[], None),
            PackageManifest::new("zlib")
                .versions(["1.0"])
                .depends_on("cmake ^ncurses", &[], None),
            PackageManifest::new("zlib")
                .versions(["1.0"])
                .depends_on("cmake", &[], Some("+shared")),
            PackageManifest::new("zlib")
                .versions(["1.0"])
                .conflicts("bzip2", None, None),
            PackageManifest::new("zlib")
                .versions(["1.0"])
                .single_variant("bt", "Fast", &["Debug"]),
            PackageManifest::new("bad name").versions(["1.0"]),
        ];
        for manifest in cases {
            let name = manifest.name.clone();
            let err = manifest.build().unwrap_err();
            assert!(
                matches!(err, Error::InvalidDescriptor { .. }),
                "{}: {}",
                name,
                err
            );
        }
    }

    #[test]
    fn test_rejects_unknown_schema() {
        let text = ZLIB_TOML.replace("schema = 1", "schema = 2");
        assert!(matches!(
            PackageDescriptor::from_toml(&text),
            Err(Error::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let manifest = PackageManifest::from_toml(ZLIB_TOML).unwrap();
        let text = manifest.to_toml().unwrap();
        assert_eq!(PackageManifest::from_toml(&text).unwrap(), manifest);
    }
}
