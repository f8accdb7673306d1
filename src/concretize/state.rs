// src/concretize/state.rs

//! Partial assignments explored by the concretizer
//!
//! A [`State`] holds one node per package name. Each node collects the
//! constraints imposed on it and the values decided so far. States are
//! cheap to clone; the search snapshots one at every choice point and
//! restores it on backtrack.

use super::conflict::Requirement;
use crate::arch::Architecture;
use crate::compiler::Compiler;
use crate::spec::{DepTypes, NodeFacts, Spec};
use crate::variant::VariantValue;
use crate::version::Version;
use std::collections::{BTreeMap, HashMap};

/// A node-level constraint and where it came from
#[derive(Debug, Clone)]
pub(crate) struct Imposed {
    pub spec: Spec,
    pub origin: String,
}

impl Imposed {
    pub fn new(spec: Spec, origin: impl Into<String>) -> Self {
        Self {
            spec: spec.node_only(),
            origin: origin.into(),
        }
    }

    pub fn requirement(&self) -> Requirement {
        Requirement {
            constraint: self.spec.format_node(),
            origin: self.origin.clone(),
        }
    }
}

/// A field of a node that needs a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Field {
    Version,
    Variant(String),
    Compiler,
    Arch,
}

impl Field {
    pub fn label(&self) -> String {
        match self {
            Field::Version => "version".to_string(),
            Field::Variant(name) => format!("value of variant '{}'", name),
            Field::Compiler => "compiler".to_string(),
            Field::Arch => "architecture".to_string(),
        }
    }
}

/// A candidate value for a field
#[derive(Debug, Clone)]
pub(crate) enum Choice {
    Version(Version),
    /// Value for the named variant; `None` leaves a variant without a
    /// default unset
    Variant(String, Option<VariantValue>),
    Compiler(Compiler),
    Arch(Architecture),
}

#[derive(Debug, Clone)]
pub(crate) struct NodeState {
    pub name: String,
    pub imposed: Vec<Imposed>,
    pub version: Option<Version>,
    /// Decided variants; a `None` value means decided as unset
    pub variants: BTreeMap<String, Option<VariantValue>>,
    pub compiler: Option<Compiler>,
    pub arch: Option<Architecture>,
    pub expanded: bool,
    /// Child package name to edge types
    pub edges: BTreeMap<String, DepTypes>,
}

impl NodeState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            imposed: Vec::new(),
            version: None,
            variants: BTreeMap::new(),
            compiler: None,
            arch: None,
            expanded: false,
            edges: BTreeMap::new(),
        }
    }

    /// Variants that hold a value
    pub fn set_variants(&self) -> BTreeMap<String, VariantValue> {
        self.variants
            .iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect()
    }

    /// Owned copy of the decided fields, if version, compiler and arch are set
    pub fn decided(&self) -> Option<Decided> {
        Some(Decided {
            name: self.name.clone(),
            version: self.version.clone()?,
            variants: self.set_variants(),
            compiler: self.compiler.clone()?,
            arch: self.arch.clone()?,
        })
    }

    /// Human-readable form of what has been decided
    pub fn describe(&self) -> String {
        match &self.version {
            Some(v) => format!("{}@{}", self.name, v),
            None => self.name.clone(),
        }
    }

    pub fn assign(&mut self, choice: Choice) {
        match choice {
            Choice::Version(v) => self.version = Some(v),
            Choice::Variant(name, v) => {
                self.variants.insert(name, v);
            }
            Choice::Compiler(c) => self.compiler = Some(c),
            Choice::Arch(a) => self.arch = Some(a),
        }
    }
}

/// Decided node fields, owned so they outlive borrows of the state
#[derive(Debug, Clone)]
pub(crate) struct Decided {
    pub name: String,
    pub version: Version,
    pub variants: BTreeMap<String, VariantValue>,
    pub compiler: Compiler,
    pub arch: Architecture,
}

impl Decided {
    pub fn facts(&self) -> NodeFacts<'_> {
        NodeFacts {
            name: &self.name,
            version: &self.version,
            variants: &self.variants,
            compiler: &self.compiler,
            arch: &self.arch,
        }
    }
}

/// Every node reached so far, in discovery order
#[derive(Debug, Clone, Default)]
pub(crate) struct State {
    pub nodes: Vec<NodeState>,
    index: HashMap<String, usize>,
}

impl State {
    pub fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Index of the node for `name`, and whether it was just created
    pub fn node(&mut self, name: &str) -> (usize, bool) {
        if let Some(idx) = self.get(name) {
            return (idx, false);
        }
        let idx = self.nodes.len();
        self.nodes.push(NodeState::new(name));
        self.index.insert(name.to_string(), idx);
        (idx, true)
    }

    /// Add edge types from `parent` to `child`
    pub fn link(&mut self, parent: usize, child: &str, deptypes: DepTypes) {
        let edge = self.nodes[parent]
            .edges
            .entry(child.to_string())
            .or_insert_with(DepTypes::empty);
        *edge = edge.union(deptypes);
    }

    /// First cycle found in the edge graph, as a closed path of names
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(state: &State, idx: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<String>> {
            marks[idx] = Mark::Active;
            path.push(idx);
            for child in state.nodes[idx].edges.keys() {
                let Some(c) = state.get(child) else { continue };
                match marks[c] {
                    Mark::Active => {
                        let start = path.iter().position(|&p| p == c).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..]
                            .iter()
                            .map(|&p| state.nodes[p].name.clone())
                            .collect();
                        cycle.push(state.nodes[c].name.clone());
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(state, c, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            path.pop();
            marks[idx] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        for idx in 0..self.nodes.len() {
            if marks[idx] == Mark::New {
                let mut path = Vec::new();
                if let Some(cycle) = visit(self, idx, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

/// A decision with untried alternatives
#[derive(Debug)]
pub(crate) struct ChoicePoint {
    pub snapshot: State,
    pub node: usize,
    pub field: Field,
    pub alternatives: std::collections::VecDeque<Choice>,
}
