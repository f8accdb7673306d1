// src/spec/node.rs

//! Canonical per-node form and the JSON spec file
//!
//! A [`NodeDict`] is one node of a concrete DAG with its dependencies
//! replaced by `(name, hash, deptypes)` references. The canonical JSON
//! of a node dict (sorted keys, no whitespace) is what gets hashed, so
//! two nodes are equal exactly when their canonical forms are equal.
//!
//! A spec file lists every node of a DAG, root first:
//!
//! ```json
//! {"spec": {"_meta": {"version": 1}, "nodes": [{"name": "zlib", ..., "hash": "..."}]}}
//! ```

use super::concrete::{ConcreteSpec, Dependency};
use super::{DepTypes, SpecHash};
use crate::arch::Architecture;
use crate::compiler::Compiler;
use crate::error::{Error, Result};
use crate::variant::VariantValue;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Current spec file format version
pub const SPEC_FORMAT_VERSION: u32 = 1;

/// Reference from a node to one of its dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub name: String,
    pub hash: SpecHash,
    pub deptypes: DepTypes,
}

/// One node of a concrete DAG, dependencies by hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDict {
    pub name: String,
    pub version: Version,
    pub arch: Architecture,
    pub compiler: Compiler,
    #[serde(default)]
    pub variants: BTreeMap<String, VariantValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyRef>,
}

impl NodeDict {
    /// Canonical serialization: sorted keys, compact, dependencies by name
    pub fn canonical(&self) -> String {
        let mut deps: Vec<&DependencyRef> = self.dependencies.iter().collect();
        deps.sort_by(|a, b| a.name.cmp(&b.name));
        let deps: Vec<serde_json::Value> = deps
            .into_iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "hash": d.hash.as_str(),
                    "deptypes": d.deptypes.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({
            "name": self.name,
            "version": self.version.as_str(),
            "arch": {
                "platform": self.arch.platform,
                "os": self.arch.os,
                "target": self.arch.target,
            },
            "compiler": {
                "name": self.compiler.name,
                "version": self.compiler.version.as_str(),
            },
            "variants": self.variants,
            "dependencies": deps,
        })
        .to_string()
    }

    /// Hash of the canonical form
    pub fn hash(&self) -> SpecHash {
        SpecHash::of(self.canonical().as_bytes())
    }
}

/// Reasons a set of node dicts cannot be turned into a DAG
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    /// A referenced hash has no node
    Missing {
        hash: SpecHash,
        referenced_by: Option<SpecHash>,
    },
    /// A node's content does not hash to the hash it is stored under
    HashMismatch { stored: SpecHash, computed: SpecHash },
    /// A dependency reference names a different package than the node it points to
    NameMismatch {
        hash: SpecHash,
        expected: String,
        found: String,
    },
    /// Dependency references loop back
    Cycle(SpecHash),
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing {
                hash,
                referenced_by: Some(parent),
            } => write!(f, "{} references missing node {}", parent, hash),
            Self::Missing {
                hash,
                referenced_by: None,
            } => write!(f, "no node with hash {}", hash),
            Self::HashMismatch { stored, computed } => write!(
                f,
                "node stored as {} hashes to {}",
                stored, computed
            ),
            Self::NameMismatch {
                hash,
                expected,
                found,
            } => write!(
                f,
                "reference to {} expects package {} but node is {}",
                hash, expected, found
            ),
            Self::Cycle(hash) => write!(f, "dependency cycle through {}", hash),
        }
    }
}

impl std::error::Error for AssembleError {}

impl From<AssembleError> for Error {
    fn from(err: AssembleError) -> Self {
        Error::ParseError(err.to_string())
    }
}

/// Rebuilds shared [`ConcreteSpec`] DAGs from node dicts looked up by hash
///
/// Every hash is verified against the node content. Nodes reachable from
/// several roots are built once and shared.
pub struct SpecAssembler<F>
where
    F: FnMut(&SpecHash) -> Option<NodeDict>,
{
    lookup: F,
    built: HashMap<SpecHash, Arc<ConcreteSpec>>,
}

impl<F> SpecAssembler<F>
where
    F: FnMut(&SpecHash) -> Option<NodeDict>,
{
    pub fn new(lookup: F) -> Self {
        Self {
            lookup,
            built: HashMap::new(),
        }
    }

    /// Build the DAG rooted at `hash`
    pub fn assemble(&mut self, hash: &SpecHash) -> std::result::Result<Arc<ConcreteSpec>, AssembleError> {
        let mut visiting = HashSet::new();
        self.assemble_node(hash, None, &mut visiting)
    }

    fn assemble_node(
        &mut self,
        hash: &SpecHash,
        parent: Option<&SpecHash>,
        visiting: &mut HashSet<SpecHash>,
    ) -> std::result::Result<Arc<ConcreteSpec>, AssembleError> {
        if let Some(spec) = self.built.get(hash) {
            return Ok(spec.clone());
        }
        if !visiting.insert(hash.clone()) {
            return Err(AssembleError::Cycle(hash.clone()));
        }

        let node = (self.lookup)(hash).ok_or_else(|| AssembleError::Missing {
            hash: hash.clone(),
            referenced_by: parent.cloned(),
        })?;
        let computed = node.hash();
        if computed != *hash {
            return Err(AssembleError::HashMismatch {
                stored: hash.clone(),
                computed,
            });
        }

        let mut dependencies = Vec::with_capacity(node.dependencies.len());
        for dep in &node.dependencies {
            let child = self.assemble_node(&dep.hash, Some(hash), visiting)?;
            if child.name() != dep.name {
                return Err(AssembleError::NameMismatch {
                    hash: dep.hash.clone(),
                    expected: dep.name.clone(),
                    found: child.name().to_string(),
                });
            }
            dependencies.push(Dependency {
                deptypes: dep.deptypes,
                spec: child,
            });
        }

        let spec = ConcreteSpec::from_parts(
            node.name,
            node.version,
            node.variants,
            node.compiler,
            node.arch,
            dependencies,
        );
        visiting.remove(hash);
        self.built.insert(hash.clone(), spec.clone());
        Ok(spec)
    }
}

/// A node dict together with its hash, as stored in a spec file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashedNode {
    #[serde(flatten)]
    pub node: NodeDict,
    pub hash: SpecHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecFileMeta {
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecFileNodes {
    #[serde(rename = "_meta")]
    pub meta: SpecFileMeta,
    pub nodes: Vec<HashedNode>,
}

/// The on-disk JSON form of a concrete spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecFile {
    pub spec: SpecFileNodes,
}

impl SpecFile {
    /// Describe a DAG, root first, then the rest in post-order
    pub fn from_spec(root: &Arc<ConcreteSpec>) -> Self {
        let mut nodes: Vec<HashedNode> = root
            .traverse()
            .into_iter()
            .rev()
            .map(|spec| HashedNode {
                node: spec.node_dict(),
                hash: spec.hash().clone(),
            })
            .collect();
        // traverse() ends with the root; reversed it comes first
        nodes.dedup_by(|a, b| a.hash == b.hash);
        Self {
            spec: SpecFileNodes {
                meta: SpecFileMeta {
                    version: SPEC_FORMAT_VERSION,
                },
                nodes,
            },
        }
    }

    /// Rebuild the root spec, verifying every hash
    pub fn to_spec(&self) -> Result<Arc<ConcreteSpec>> {
        if self.spec.meta.version != SPEC_FORMAT_VERSION {
            return Err(Error::ParseError(format!(
                "unsupported spec file version {}",
                self.spec.meta.version
            )));
        }
        let root = self
            .spec
            .nodes
            .first()
            .ok_or_else(|| Error::ParseError("spec file has no nodes".to_string()))?;
        let by_hash: HashMap<&SpecHash, &NodeDict> =
            self.spec.nodes.iter().map(|n| (&n.hash, &n.node)).collect();
        let mut assembler = SpecAssembler::new(|h: &SpecHash| by_hash.get(h).map(|n| (*n).clone()));
        Ok(assembler.assemble(&root.hash)?)
    }
}

impl ConcreteSpec {
    /// Serialize the whole DAG as a spec file
    pub fn to_json(self: &Arc<Self>) -> Result<String> {
        Ok(serde_json::to_string_pretty(&SpecFile::from_spec(self))?)
    }

    /// Parse a spec file produced by [`ConcreteSpec::to_json`]
    pub fn from_json(text: &str) -> Result<Arc<Self>> {
        let file: SpecFile = serde_json::from_str(text)?;
        file.to_spec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Spec;

    fn concrete(text: &str) -> Arc<ConcreteSpec> {
        ConcreteSpec::from_spec(&Spec::parse(text).unwrap()).unwrap()
    }

    const ZLIB: &str = "zlib@1.2.13 +shared %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64";

    #[test]
    fn test_canonical_is_compact_and_sorted() {
        let spec = concrete(ZLIB);
        let canonical = spec.node_dict().canonical();
        assert!(!canonical.contains(' '));
        let arch = canonical.find("\"arch\"").unwrap();
        let name = canonical.find("\"name\"").unwrap();
        let version = canonical.find("\"version\":\"1.2.13\"").unwrap();
        assert!(arch < name && name < version);
    }

    #[test]
    fn test_json_round_trip_preserves_hash() {
        let app = concrete(&format!(
            "app@2.0 %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64 ^[deptypes=build,link] ({})",
            ZLIB
        ));
        let json = app.to_json().unwrap();
        let back = ConcreteSpec::from_json(&json).unwrap();
        assert_eq!(back.hash(), app.hash());
        assert_eq!(*back, *app);
        assert!(json.contains("\"_meta\""));
    }

    #[test]
    fn test_tampered_node_is_rejected() {
        let spec = concrete(ZLIB);
        let json = spec.to_json().unwrap().replace("1.2.13", "1.2.11");
        let err = ConcreteSpec::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("hashes to"));
    }

    #[test]
    fn test_assembler_reports_missing() {
        let spec = concrete(ZLIB);
        let mut assembler = SpecAssembler::new(|_: &SpecHash| None);
        assert!(matches!(
            assembler.assemble(spec.hash()),
            Err(AssembleError::Missing { .. })
        ));
    }
}
