// src/spec/concrete.rs

//! Concrete specs: fully decided, hashed, shared DAG nodes
//!
//! Nodes are immutable and reference-counted. A dependency that appears
//! under several parents is one shared [`Arc`], never a copy.

use super::node::{DependencyRef, NodeDict};
use super::{DepTypes, DependencySpec, NodeFacts, Spec, SpecHash};
use crate::arch::{ArchConstraint, Architecture};
use crate::compiler::{Compiler, CompilerConstraint};
use crate::error::{Error, Result};
use crate::variant::{DEV_PATH, VariantValue};
use crate::version::{Version, VersionConstraint};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// An edge to a dependency
#[derive(Debug, Clone)]
pub struct Dependency {
    pub deptypes: DepTypes,
    pub spec: Arc<ConcreteSpec>,
}

/// A fully decided node and, through its dependencies, a whole DAG
#[derive(Debug)]
pub struct ConcreteSpec {
    name: String,
    version: Version,
    variants: BTreeMap<String, VariantValue>,
    compiler: Compiler,
    arch: Architecture,
    dependencies: Vec<Dependency>,
    canonical: String,
    hash: SpecHash,
}

impl ConcreteSpec {
    /// Assemble a node from decided fields and already-built dependencies
    pub fn from_parts(
        name: String,
        version: Version,
        variants: BTreeMap<String, VariantValue>,
        compiler: Compiler,
        arch: Architecture,
        mut dependencies: Vec<Dependency>,
    ) -> Arc<Self> {
        dependencies.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        let node = NodeDict {
            name,
            version,
            arch,
            compiler,
            variants,
            dependencies: dependencies
                .iter()
                .map(|d| DependencyRef {
                    name: d.spec.name.clone(),
                    hash: d.spec.hash.clone(),
                    deptypes: d.deptypes,
                })
                .collect(),
        };
        let canonical = node.canonical();
        let hash = SpecHash::of(canonical.as_bytes());
        Arc::new(Self {
            name: node.name,
            version: node.version,
            variants: node.variants,
            compiler: node.compiler,
            arch: node.arch,
            dependencies,
            canonical,
            hash,
        })
    }

    /// Build from an abstract spec that pins every field of every node
    ///
    /// This is the inverse of `Display`: printing a concrete spec and
    /// converting the parsed text back yields an equal spec.
    pub fn from_spec(spec: &Spec) -> Result<Arc<Self>> {
        let mut interner = SpecInterner::default();
        Self::from_spec_with(spec, &mut interner)
    }

    fn from_spec_with(spec: &Spec, interner: &mut SpecInterner) -> Result<Arc<Self>> {
        let name = spec
            .name
            .clone()
            .ok_or_else(|| Error::NotConcrete(format!("'{}' names no package", spec)))?;
        let version = spec
            .versions
            .single_version()
            .cloned()
            .ok_or_else(|| Error::NotConcrete(format!("{} has no single version", name)))?;
        let compiler = spec
            .compiler
            .as_ref()
            .and_then(CompilerConstraint::as_compiler)
            .ok_or_else(|| Error::NotConcrete(format!("{} has no pinned compiler", name)))?;
        let arch = spec
            .arch
            .as_architecture()
            .ok_or_else(|| Error::NotConcrete(format!("{} has no full architecture", name)))?;

        let mut seen = HashSet::new();
        let mut dependencies = Vec::with_capacity(spec.dependencies.len());
        for dep in &spec.dependencies {
            if dep.deptypes.is_empty() {
                return Err(Error::NotConcrete(format!(
                    "edge from {} to {} has no dependency types",
                    name,
                    dep.spec.name().unwrap_or("?")
                )));
            }
            let child = Self::from_spec_with(&dep.spec, interner)?;
            if !seen.insert(child.name.clone()) {
                return Err(Error::NotConcrete(format!(
                    "{} depends on {} twice",
                    name, child.name
                )));
            }
            dependencies.push(Dependency {
                deptypes: dep.deptypes,
                spec: child,
            });
        }

        Ok(interner.intern(Self::from_parts(
            name,
            version,
            spec.variants.clone(),
            compiler,
            arch,
            dependencies,
        )))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn variants(&self) -> &BTreeMap<String, VariantValue> {
        &self.variants
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn arch(&self) -> &Architecture {
        &self.arch
    }

    /// Direct dependencies, sorted by name
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn hash(&self) -> &SpecHash {
        &self.hash
    }

    /// The canonical serialized form the hash is computed over
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Direct dependency by name
    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.spec.name == name)
    }

    /// Local source checkout this node is built from, if any
    pub fn dev_path(&self) -> Option<&str> {
        self.variants.get(DEV_PATH).and_then(VariantValue::as_single)
    }

    pub fn facts(&self) -> NodeFacts<'_> {
        NodeFacts {
            name: &self.name,
            version: &self.version,
            variants: &self.variants,
            compiler: &self.compiler,
            arch: &self.arch,
        }
    }

    /// The node with dependency references instead of edges
    pub fn node_dict(&self) -> NodeDict {
        NodeDict {
            name: self.name.clone(),
            version: self.version.clone(),
            arch: self.arch.clone(),
            compiler: self.compiler.clone(),
            variants: self.variants.clone(),
            dependencies: self
                .dependencies
                .iter()
                .map(|d| DependencyRef {
                    name: d.spec.name.clone(),
                    hash: d.spec.hash.clone(),
                    deptypes: d.deptypes,
                })
                .collect(),
        }
    }

    /// Every node of the DAG once, dependencies before dependents
    ///
    /// The root is always last.
    pub fn traverse(self: &Arc<Self>) -> Vec<Arc<ConcreteSpec>> {
        fn visit(node: &Arc<ConcreteSpec>, seen: &mut HashSet<SpecHash>, out: &mut Vec<Arc<ConcreteSpec>>) {
            if !seen.insert(node.hash.clone()) {
                return;
            }
            for dep in &node.dependencies {
                visit(&dep.spec, seen, out);
            }
            out.push(node.clone());
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        visit(self, &mut seen, &mut out);
        out
    }

    /// Find a node by package name anywhere in the DAG, including the root
    pub fn find(self: &Arc<Self>, name: &str) -> Option<Arc<ConcreteSpec>> {
        self.traverse().into_iter().find(|n| n.name == name)
    }

    /// Check this DAG against an abstract spec
    ///
    /// Node constraints apply to the root; each `^dep` constraint must be
    /// met by some node below the root.
    pub fn satisfies(self: &Arc<Self>, spec: &Spec) -> bool {
        if !spec.matches_node(&self.facts()) {
            return false;
        }
        spec.dependencies.iter().all(|dep| self.satisfies_dependency(dep))
    }

    fn satisfies_dependency(self: &Arc<Self>, dep: &DependencySpec) -> bool {
        let Some(name) = dep.spec.name() else {
            return false;
        };
        if !dep.deptypes.is_empty() {
            return self.dependency(name).is_some_and(|edge| {
                dep.deptypes.iter().all(|t| edge.deptypes.contains(t))
                    && edge.spec.satisfies(&dep.spec)
            });
        }
        self.traverse()
            .iter()
            .any(|n| n.hash != self.hash && n.name == name && n.satisfies(&dep.spec))
    }

    /// An abstract spec pinning every field of every node
    pub fn to_abstract(&self) -> Spec {
        Spec {
            name: Some(self.name.clone()),
            versions: VersionConstraint::pinned(self.version.clone()),
            variants: self.variants.clone(),
            compiler: Some(CompilerConstraint {
                name: self.compiler.name.clone(),
                versions: VersionConstraint::pinned(self.compiler.version.clone()),
            }),
            arch: ArchConstraint::exact(&self.arch),
            dependencies: self
                .dependencies
                .iter()
                .map(|d| DependencySpec {
                    deptypes: d.deptypes,
                    spec: d.spec.to_abstract(),
                })
                .collect(),
        }
    }

    /// The node alone, e.g. `zlib@1.2.13 +shared %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64`
    pub fn format_node(&self) -> String {
        let mut parts = vec![format!("{}@{}", self.name, self.version)];
        for (name, value) in &self.variants {
            parts.push(value.format_as(name));
        }
        parts.push(format!("%{}", self.compiler));
        parts.push(format!("arch={}", self.arch));
        parts.join(" ")
    }

    /// Indented listing of the DAG with abbreviated hashes, each node once
    pub fn tree(self: &Arc<Self>) -> String {
        fn walk(node: &Arc<ConcreteSpec>, depth: usize, seen: &mut HashSet<SpecHash>, out: &mut String) {
            let marker = if depth == 0 { "" } else { "^" };
            out.push_str(&format!(
                "{}  {}{}{}\n",
                node.hash.short(),
                "    ".repeat(depth),
                marker,
                node.format_node()
            ));
            if !seen.insert(node.hash.clone()) {
                return;
            }
            for dep in &node.dependencies {
                if seen.contains(&dep.spec.hash) {
                    continue;
                }
                walk(&dep.spec, depth + 1, seen, out);
            }
        }
        let mut out = String::new();
        let mut seen = HashSet::new();
        walk(self, 0, &mut seen, &mut out);
        out
    }
}

impl PartialEq for ConcreteSpec {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ConcreteSpec {}

impl std::hash::Hash for ConcreteSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for ConcreteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_abstract())
    }
}

/// Keeps one shared instance per spec hash
#[derive(Debug, Default)]
pub struct SpecInterner {
    by_hash: HashMap<SpecHash, Arc<ConcreteSpec>>,
}

impl SpecInterner {
    /// Return the shared instance equal to `spec`, registering it if new
    pub fn intern(&mut self, spec: Arc<ConcreteSpec>) -> Arc<ConcreteSpec> {
        self.by_hash
            .entry(spec.hash.clone())
            .or_insert(spec)
            .clone()
    }

    pub fn get(&self, hash: &SpecHash) -> Option<&Arc<ConcreteSpec>> {
        self.by_hash.get(hash)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}
