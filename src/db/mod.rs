// src/db/mod.rs

//! Installation database
//!
//! A JSON index of installed specs under `<root>/.sprig-db/index.json`,
//! guarded by a readers-writer [`LockFile`]. Every transaction re-reads
//! the index under the lock; writes replace it atomically through a
//! temporary file in the same directory.
//!
//! A database may chain to upstream databases. Upstreams are read without
//! any lock and never written: hashes they hold satisfy dependency checks
//! here, but removing or modifying them fails.

pub mod paths;
mod record;

pub use record::{DB_VERSION, Index, IndexFile, InstallRecord};

use crate::error::{Error, Result};
use crate::layout::DirectoryLayout;
use crate::lock::{LockFile, PrefixLock};
use crate::spec::{ConcreteSpec, NodeDict, Spec, SpecAssembler, SpecHash};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeouts used by a database and its prefix locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub lock_timeout: Duration,
    pub package_lock_timeout: Duration,
    /// Age after which a prefix lock from another host counts as stale
    pub stale_after: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(120),
            package_lock_timeout: Duration::from_secs(600),
            stale_after: Duration::from_secs(3600),
        }
    }
}

/// Where an installed hash lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub prefix: PathBuf,
    /// True if the record comes from an upstream database
    pub upstream: bool,
}

/// A ref count that disagrees with the stored edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCountMismatch {
    pub hash: SpecHash,
    pub recorded: u32,
    pub expected: u32,
}

/// Result of [`Database::check_integrity`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub ref_counts: Vec<RefCountMismatch>,
    /// `(record, dependency)` pairs where the dependency is nowhere in the chain
    pub dangling: Vec<(SpecHash, SpecHash)>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.ref_counts.is_empty() && self.dangling.is_empty()
    }
}

/// Handle on one install root's database
#[derive(Debug, Clone)]
pub struct Database {
    root: PathBuf,
    options: DatabaseOptions,
    lock: LockFile,
    read_only: bool,
    upstreams: Vec<Database>,
    layout: Option<DirectoryLayout>,
}

impl Database {
    /// Open (creating if needed) the writable database of an install root
    pub fn open(root: impl Into<PathBuf>, options: DatabaseOptions) -> Result<Self> {
        let root = root.into();
        let dir = paths::db_dir(&root);
        fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
        debug!("Opened install database at {:?}", dir);
        Ok(Self {
            lock: LockFile::new(paths::lock_path(&root), options.lock_timeout),
            root,
            options,
            read_only: false,
            upstreams: Vec::new(),
            layout: None,
        })
    }

    /// Open a database read-only, as an upstream
    pub fn open_upstream(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            lock: LockFile::new(paths::lock_path(&root), Duration::ZERO),
            root,
            options: DatabaseOptions::default(),
            read_only: true,
            upstreams: Vec::new(),
            layout: None,
        }
    }

    /// Chain an upstream; it is always treated as read-only
    pub fn with_upstream(mut self, upstream: Database) -> Self {
        self.upstreams.push(upstream.into_upstream());
        self
    }

    /// The same database, read without locks and never written
    pub fn into_upstream(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Layout whose prefixes are deleted along with their records
    pub fn with_layout(mut self, layout: DirectoryLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn upstreams(&self) -> &[Database] {
        &self.upstreams
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Exclusive install lock for one hash
    pub fn prefix_lock(&self, hash: &SpecHash) -> PrefixLock {
        PrefixLock::new(
            paths::prefix_lock_path(&self.root, hash),
            self.options.package_lock_timeout,
            self.options.stale_after,
        )
    }

    fn load(&self) -> Result<Index> {
        let path = paths::index_path(&self.root);
        match fs::read_to_string(&path) {
            Ok(text) => Index::parse(&text, &path),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Index::default()),
            Err(e) => Err(Error::io_at(&path, e)),
        }
    }

    fn save(&self, index: &Index) -> Result<()> {
        let path = paths::index_path(&self.root);
        let dir = paths::db_dir(&self.root);
        let json = index.to_json()?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| Error::io_at(&dir, e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::io_at(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| Error::io_at(&path, e.error))?;
        Ok(())
    }

    /// Run `f` on a fresh copy of the index under a shared lock
    ///
    /// Upstreams are read without locking.
    pub fn read<T>(&self, f: impl FnOnce(&Index) -> Result<T>) -> Result<T> {
        if self.read_only {
            return f(&self.load()?);
        }
        let _guard = self.lock.read()?;
        f(&self.load()?)
    }

    /// Read-modify-write the index under the exclusive lock
    ///
    /// Nothing is written if `f` fails.
    fn write<T>(&self, f: impl FnOnce(&mut Index) -> Result<T>) -> Result<T> {
        self.write_index(false, f)
    }

    fn write_index<T>(&self, discard_unreadable: bool, f: impl FnOnce(&mut Index) -> Result<T>) -> Result<T> {
        if self.read_only {
            return Err(Error::ReadOnlyDatabase {
                root: self.root.clone(),
            });
        }
        let _guard = self.lock.write()?;
        let mut index = match self.load() {
            Ok(index) => index,
            Err(e) if discard_unreadable => {
                warn!("Discarding unreadable index at {:?}: {}", self.root, e);
                Index::default()
            }
            Err(e) => return Err(e),
        };
        let out = f(&mut index)?;
        self.save(&index)?;
        Ok(out)
    }

    /// Local record for a hash
    pub fn query_local(&self, hash: &SpecHash) -> Result<Option<InstallRecord>> {
        self.read(|index| Ok(index.get(hash).cloned()))
    }

    /// Record from the first upstream that has one
    pub fn query_upstream(&self, hash: &SpecHash) -> Result<Option<InstallRecord>> {
        for upstream in &self.upstreams {
            if let Some(record) = upstream.query(hash)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Record for a hash, locally or in the upstream chain
    pub fn query(&self, hash: &SpecHash) -> Result<Option<InstallRecord>> {
        match self.query_local(hash)? {
            Some(record) => Ok(Some(record)),
            None => self.query_upstream(hash),
        }
    }

    /// Prefix of an installed hash
    pub fn locate(&self, hash: &SpecHash) -> Result<Option<Location>> {
        if let Some(record) = self.query_local(hash)?
            && record.installed
        {
            return Ok(Some(Location {
                prefix: record.path,
                upstream: false,
            }));
        }
        Ok(self
            .query_upstream(hash)?
            .filter(|r| r.installed)
            .map(|r| Location {
                prefix: r.path,
                upstream: true,
            }))
    }

    /// Known to the local database but its prefix is gone
    pub fn missing(&self, hash: &SpecHash) -> Result<bool> {
        Ok(self.query_local(hash)?.is_some_and(|r| !r.installed))
    }

    /// Every local record, keyed by hash
    pub fn records(&self) -> Result<BTreeMap<SpecHash, InstallRecord>> {
        self.read(|index| Ok(index.installs.clone()))
    }

    /// Node dicts of this database and its upstreams; local wins
    fn all_nodes(&self) -> Result<HashMap<SpecHash, NodeDict>> {
        let mut nodes = HashMap::new();
        for upstream in self.upstreams.iter().rev() {
            nodes.extend(upstream.all_nodes()?);
        }
        let local = self.records()?;
        nodes.extend(local.into_iter().map(|(h, r)| (h, r.spec)));
        Ok(nodes)
    }

    /// Rebuild the full concrete DAG of a recorded hash
    pub fn get_spec(&self, hash: &SpecHash) -> Result<Arc<ConcreteSpec>> {
        let nodes = self.all_nodes()?;
        if !nodes.contains_key(hash) {
            return Err(Error::NotInstalled(hash.clone()));
        }
        let mut assembler = SpecAssembler::new(|h: &SpecHash| nodes.get(h).cloned());
        assembler.assemble(hash).map_err(|e| Error::CorruptDatabase {
            path: paths::index_path(&self.root),
            reason: e.to_string(),
        })
    }

    /// Installed local specs satisfying `query`, sorted by name then hash
    pub fn find(&self, query: &Spec) -> Result<Vec<Arc<ConcreteSpec>>> {
        let records = self.records()?;
        let nodes = self.all_nodes()?;
        let mut assembler = SpecAssembler::new(|h: &SpecHash| nodes.get(h).cloned());
        let mut found = Vec::new();
        for (hash, record) in &records {
            if !record.installed {
                continue;
            }
            let spec = assembler.assemble(hash).map_err(|e| Error::CorruptDatabase {
                path: paths::index_path(&self.root),
                reason: e.to_string(),
            })?;
            if spec.satisfies(query) {
                found.push(spec);
            }
        }
        found.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.hash().cmp(b.hash())));
        Ok(found)
    }

    /// Record `spec` as installed at `prefix`
    ///
    /// Dependencies must already be recorded here or in an upstream; each
    /// local one gains a reference.
    pub fn add(&self, spec: &Arc<ConcreteSpec>, prefix: &Path, explicit: bool) -> Result<InstallRecord> {
        let hash = spec.hash().clone();
        if let Some(record) = self.query_upstream(&hash)?
            && record.installed
        {
            return Err(Error::AlreadyInstalled {
                hash,
                prefix: record.path,
                upstream: true,
            });
        }

        // Resolve upstream dependencies before taking the write lock
        let mut in_upstream = BTreeSet::new();
        for dep in spec.dependencies() {
            if self.query_upstream(dep.spec.hash())?.is_some() {
                in_upstream.insert(dep.spec.hash().clone());
            }
        }

        let record = self.write(|index| {
            let previous = index.get(&hash).cloned();
            if let Some(prev) = &previous
                && prev.installed
            {
                return Err(Error::AlreadyInstalled {
                    hash: hash.clone(),
                    prefix: prev.path.clone(),
                    upstream: false,
                });
            }

            let mut local_deps = Vec::new();
            for dep in spec.dependencies() {
                let dep_hash = dep.spec.hash();
                if index.installs.contains_key(dep_hash) {
                    local_deps.push(dep_hash.clone());
                } else if !in_upstream.contains(dep_hash) {
                    return Err(Error::DanglingDependency {
                        hash: hash.clone(),
                        dependency: dep_hash.clone(),
                    });
                }
            }

            let mut record = InstallRecord::new(spec, prefix, explicit);
            match previous {
                // Known but missing: its edges were counted when first recorded
                Some(prev) => {
                    record.ref_count = prev.ref_count;
                    record.explicit = prev.explicit || explicit;
                }
                None => {
                    for dep_hash in &local_deps {
                        if let Some(dep) = index.installs.get_mut(dep_hash) {
                            dep.ref_count += 1;
                        }
                    }
                }
            }
            index.installs.insert(hash.clone(), record.clone());
            Ok(record)
        })?;

        info!("Recorded {} {} at {:?}", spec.name(), hash.short(), prefix);
        Ok(record)
    }

    /// Drop the record for `hash` and, with a layout, its prefix
    pub fn remove(&self, hash: &SpecHash) -> Result<InstallRecord> {
        if self.read_only {
            return Err(Error::ReadOnlyDatabase {
                root: self.root.clone(),
            });
        }
        if self.query_local(hash)?.is_none() {
            return match self.upstreams.iter().find(|u| matches!(u.query(hash), Ok(Some(_)))) {
                Some(upstream) => Err(Error::ReadOnlyDatabase {
                    root: upstream.root.clone(),
                }),
                None => Err(Error::NotInstalled(hash.clone())),
            };
        }

        let record = self.write(|index| {
            let Some(record) = index.get(hash).cloned() else {
                return Err(Error::NotInstalled(hash.clone()));
            };
            if record.ref_count > 0 {
                return Err(Error::StillReferenced {
                    hash: hash.clone(),
                    ref_count: record.ref_count,
                });
            }
            index.installs.remove(hash);
            for dep_hash in record.dependency_hashes() {
                if let Some(dep) = index.installs.get_mut(dep_hash) {
                    dep.ref_count = dep.ref_count.saturating_sub(1);
                }
            }
            Ok(record)
        })?;

        if let Some(layout) = &self.layout
            && record.path.starts_with(layout.root())
        {
            layout.remove(&record.path)?;
        }
        info!("Removed {} {}", record.name(), hash.short());
        Ok(record)
    }

    /// Set or clear the explicit flag
    pub fn mark_explicit(&self, hash: &SpecHash, explicit: bool) -> Result<()> {
        self.write(|index| match index.installs.get_mut(hash) {
            Some(record) => {
                record.explicit = explicit;
                Ok(())
            }
            None => Err(Error::NotInstalled(hash.clone())),
        })
    }

    /// Installed local records that depend directly on `hash`
    pub fn installed_dependents(&self, hash: &SpecHash) -> Result<Vec<SpecHash>> {
        self.read(|index| Ok(index.dependents(hash)))
    }

    /// Implicit installs not reachable from any explicit one
    ///
    /// Dependents come before their dependencies, so removing in order
    /// never hits a nonzero ref count.
    pub fn unused_specs(&self) -> Result<Vec<SpecHash>> {
        self.read(|index| {
            let mut reachable = BTreeSet::new();
            let mut stack: Vec<&SpecHash> = index
                .installs
                .iter()
                .filter(|(_, r)| r.explicit)
                .map(|(h, _)| h)
                .collect();
            while let Some(hash) = stack.pop() {
                if !reachable.insert(hash.clone()) {
                    continue;
                }
                if let Some(record) = index.get(hash) {
                    stack.extend(record.dependency_hashes());
                }
            }

            let unused: BTreeSet<&SpecHash> = index
                .installs
                .keys()
                .filter(|h| !reachable.contains(*h))
                .collect();

            // Post-order over dependencies, then reversed
            let mut order = Vec::new();
            let mut done = BTreeSet::new();
            fn visit<'i>(
                hash: &'i SpecHash,
                index: &'i Index,
                unused: &BTreeSet<&'i SpecHash>,
                done: &mut BTreeSet<&'i SpecHash>,
                order: &mut Vec<SpecHash>,
            ) {
                if !done.insert(hash) {
                    return;
                }
                if let Some(record) = index.get(hash) {
                    for dep in record.dependency_hashes() {
                        if unused.contains(dep) {
                            visit(dep, index, unused, done, order);
                        }
                    }
                }
                order.push(hash.clone());
            }
            for &hash in &unused {
                visit(hash, index, &unused, &mut done, &mut order);
            }
            order.reverse();
            Ok(order)
        })
    }

    /// Compare stored ref counts and edges against the records
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let index = self.read(|index| Ok(index.clone()))?;
        let mut report = IntegrityReport::default();
        for (hash, expected) in index.expected_ref_counts() {
            let recorded = index.installs[&hash].ref_count;
            if recorded != expected {
                report.ref_counts.push(RefCountMismatch {
                    hash,
                    recorded,
                    expected,
                });
            }
        }
        for (hash, record) in &index.installs {
            for dep in record.dependency_hashes() {
                if !index.installs.contains_key(dep) && self.query_upstream(dep)?.is_none() {
                    report.dangling.push((hash.clone(), dep.clone()));
                }
            }
        }
        if !report.is_ok() {
            warn!(
                "Database at {:?}: {} ref count mismatch(es), {} dangling edge(s)",
                self.root,
                report.ref_counts.len(),
                report.dangling.len()
            );
        }
        Ok(report)
    }

    /// Rebuild the index from the `spec.json` files under `layout`
    ///
    /// Explicit flags and install times are kept from the old index when it
    /// can still be read. Dependencies found in no prefix and no upstream are
    /// recorded as missing. Returns the number of installed records.
    pub fn reindex(&self, layout: &DirectoryLayout) -> Result<usize> {
        let found = layout.all_specs()?;
        let mut upstream_hashes = BTreeSet::new();
        for (_, root) in &found {
            for node in root.traverse() {
                if self.query_upstream(node.hash())?.is_some() {
                    upstream_hashes.insert(node.hash().clone());
                }
            }
        }

        self.write_index(true, |index| {
            let old = std::mem::take(&mut index.installs);
            let installed: BTreeMap<SpecHash, &PathBuf> =
                found.iter().map(|(p, s)| (s.hash().clone(), p)).collect();

            let mut fresh: BTreeMap<SpecHash, InstallRecord> = BTreeMap::new();
            let mut depended_on = BTreeSet::new();
            for (_, root) in &found {
                for node in root.traverse() {
                    let hash = node.hash();
                    for dep in node.dependencies() {
                        if installed.contains_key(dep.spec.hash()) {
                            depended_on.insert(dep.spec.hash().clone());
                        }
                    }
                    if fresh.contains_key(hash) || upstream_hashes.contains(hash) {
                        continue;
                    }
                    let (path, is_installed) = match installed.get(hash) {
                        Some(p) => ((*p).clone(), true),
                        None => (layout.local_path(&node), false),
                    };
                    let mut record = InstallRecord::new(&node, &path, false);
                    record.installed = is_installed;
                    if let Some(prev) = old.get(hash) {
                        record.explicit = prev.explicit;
                        record.installation_time = prev.installation_time;
                    } else {
                        record.installation_time = Utc::now();
                    }
                    fresh.insert(hash.clone(), record);
                }
            }
            for (hash, record) in fresh.iter_mut() {
                if !old.contains_key(hash) {
                    record.explicit = record.installed && !depended_on.contains(hash);
                }
            }

            index.installs = fresh;
            let counts = index.expected_ref_counts();
            for (hash, record) in index.installs.iter_mut() {
                record.ref_count = counts.get(hash).copied().unwrap_or(0);
            }
            let count = index.installs.values().filter(|r| r.installed).count();
            info!("Reindexed {:?}: {} installed spec(s)", self.root, count);
            Ok(count)
        })
    }
}
