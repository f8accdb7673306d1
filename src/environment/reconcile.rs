// src/environment/reconcile.rs

//! Working out what an environment needs rebuilt
//!
//! The reconciler compares the manifest with the lockfile, the install
//! database and the current state of every development checkout. It reads
//! and never writes.

use super::{ChangeDetector, Environment, LockedRoot};
use crate::db::Database;
use crate::error::Result;
use crate::spec::{ConcreteSpec, SpecHash};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Why a spec needs work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// Root text is not in the lockfile, so it must be concretized again
    NotConcretized,
    /// A develop entry was added, removed or moved for this package
    DevelopChanged { package: String },
    /// The checkout changed since the last install
    SourceChanged { path: PathBuf },
    /// A dependency is being rebuilt
    DependencyStale { dependency: String },
    NotInstalled,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::NotConcretized => write!(f, "not concretized"),
            StaleReason::DevelopChanged { package } => {
                write!(f, "develop entry for {} changed", package)
            }
            StaleReason::SourceChanged { path } => {
                write!(f, "sources in {} changed", path.display())
            }
            StaleReason::DependencyStale { dependency } => {
                write!(f, "dependency {} is stale", dependency)
            }
            StaleReason::NotInstalled => write!(f, "not installed"),
        }
    }
}

impl StaleReason {
    /// Whether installed dependents must be rebuilt too
    fn forces_rebuild(&self) -> bool {
        matches!(
            self,
            StaleReason::SourceChanged { .. } | StaleReason::DependencyStale { .. }
        )
    }
}

/// One root/hash pair and what, if anything, is wrong with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecStatus {
    /// Root as written in the manifest, normalized
    pub root: String,
    pub name: String,
    /// Locked hash; `None` for roots never concretized
    pub hash: Option<SpecHash>,
    pub reasons: Vec<StaleReason>,
}

impl SpecStatus {
    pub fn is_stale(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Result of a reconcile pass
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Pairs needing concretization, a build or a rebuild
    pub stale: Vec<SpecStatus>,
    pub valid: Vec<SpecStatus>,
    /// Locked roots no longer in the manifest
    pub removed: Vec<LockedRoot>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.stale.is_empty() && self.removed.is_empty()
    }

    /// Stale entries that name a locked hash
    pub fn stale_hashes(&self) -> HashSet<&SpecHash> {
        self.stale.iter().filter_map(|s| s.hash.as_ref()).collect()
    }

    fn push(&mut self, status: SpecStatus) {
        if status.is_stale() {
            self.stale.push(status);
        } else {
            self.valid.push(status);
        }
    }
}

/// Compares an environment against the database and its checkouts
pub struct Reconciler<'a> {
    db: &'a Database,
    detector: &'a dyn ChangeDetector,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a Database, detector: &'a dyn ChangeDetector) -> Self {
        Self { db, detector }
    }

    pub fn reconcile(&self, env: &Environment) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let roots = env.roots()?;
        let locked = env.concrete_roots()?;
        let develop = env.develop_paths();
        let states = env.lockfile().map(|l| &l.develop_states);

        let wanted: HashSet<&str> = roots.iter().map(|(text, _)| text.as_str()).collect();
        report.removed = locked
            .iter()
            .filter(|(root, _)| !wanted.contains(root.abstract_spec.as_str()))
            .map(|(root, _)| root.clone())
            .collect();

        // Per-hash verdicts, shared between roots
        let mut verdicts: HashMap<SpecHash, Vec<StaleReason>> = HashMap::new();

        for (text, spec) in &roots {
            let Some((root, concrete)) = locked.iter().find(|(r, _)| &r.abstract_spec == text) else {
                report.push(SpecStatus {
                    root: text.clone(),
                    name: spec.name().unwrap_or_default().to_string(),
                    hash: None,
                    reasons: vec![StaleReason::NotConcretized],
                });
                continue;
            };

            if let Some(package) = develop_mismatch(concrete, &develop) {
                debug!("{}: develop entry for {} changed", text, package);
                report.push(SpecStatus {
                    root: text.clone(),
                    name: concrete.name().to_string(),
                    hash: Some(root.hash.clone()),
                    reasons: vec![StaleReason::DevelopChanged { package }],
                });
                continue;
            }

            for node in concrete.traverse() {
                if !verdicts.contains_key(node.hash()) {
                    let reasons = self.check_node(&node, &verdicts, states)?;
                    verdicts.insert(node.hash().clone(), reasons);
                }
                report.push(SpecStatus {
                    root: text.clone(),
                    name: node.name().to_string(),
                    hash: Some(node.hash().clone()),
                    reasons: verdicts[node.hash()].clone(),
                });
            }
        }
        Ok(report)
    }

    /// Reasons for one node; dependencies are already decided
    fn check_node(
        &self,
        node: &Arc<ConcreteSpec>,
        verdicts: &HashMap<SpecHash, Vec<StaleReason>>,
        states: Option<&BTreeMap<SpecHash, String>>,
    ) -> Result<Vec<StaleReason>> {
        let mut reasons = Vec::new();

        if let Some(source) = node.dev_path() {
            let recorded = states.and_then(|s| s.get(node.hash()));
            let changed = match (recorded, self.detector.current_state(Path::new(source))) {
                (Some(old), Ok(new)) => self.detector.has_changed(old, &new),
                (None, _) => true,
                (Some(_), Err(e)) => {
                    debug!("cannot read state of {}: {}", source, e);
                    true
                }
            };
            if changed {
                reasons.push(StaleReason::SourceChanged {
                    path: PathBuf::from(source),
                });
            }
        }

        for dep in node.dependencies() {
            let rebuilt = verdicts
                .get(dep.spec.hash())
                .is_some_and(|r| r.iter().any(StaleReason::forces_rebuild));
            if rebuilt {
                reasons.push(StaleReason::DependencyStale {
                    dependency: dep.spec.name().to_string(),
                });
            }
        }

        if self.db.locate(node.hash())?.is_none() {
            reasons.push(StaleReason::NotInstalled);
        }
        Ok(reasons)
    }
}

/// A package whose `dev_path` in the locked DAG disagrees with the manifest
fn develop_mismatch(
    spec: &Arc<ConcreteSpec>,
    develop: &BTreeMap<String, String>,
) -> Option<String> {
    spec.traverse()
        .into_iter()
        .find(|node| node.dev_path() != develop.get(node.name()).map(String::as_str))
        .map(|node| node.name().to_string())
}
