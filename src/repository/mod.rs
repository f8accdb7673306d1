// src/repository/mod.rs

//! Package repositories
//!
//! The concretizer only talks to [`PackageRepository`]: which versions and
//! variants a package declares, and which dependencies and conflicts are
//! active for a given set of decided node fields. Descriptors come from
//! code ([`Repository::add`]) or from a directory of TOML files laid out as
//! `<repo>/packages/<name>.toml`.

mod build_system;
mod descriptor;

pub use build_system::{BuildSystem, Phase, PhaseStep};
pub use descriptor::{
    ConflictDecl, DependencyDecl, DESCRIPTOR_SCHEMA, PackageDescriptor, PackageManifest,
    VersionDecl,
};

use crate::error::{Error, Result};
use crate::spec::{DepType, DepTypes, NodeFacts, Spec};
use crate::variant::VariantDecl;
use crate::version::Version;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Subdirectory of a repository holding descriptor files
pub const PACKAGES_DIR: &str = "packages";

/// Read-only source of package descriptors
pub trait PackageRepository: Send + Sync {
    /// Descriptor for a package, if known
    fn get(&self, name: &str) -> Option<&PackageDescriptor>;

    /// All known package names, sorted
    fn package_names(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Declared versions in preference order
    fn versions(&self, name: &str) -> Vec<Version> {
        self.get(name).map(|d| d.version_list()).unwrap_or_default()
    }

    /// Declared variants, including the implicit `dev_path`
    fn variants(&self, name: &str) -> BTreeMap<String, VariantDecl> {
        self.get(name).map(|d| d.variants.clone()).unwrap_or_default()
    }

    /// Dependencies active for a node with the given decided fields
    ///
    /// Tools required by the package's build system are added as build
    /// dependencies when the repository knows them and the package does
    /// not declare them itself.
    fn dependencies(&self, name: &str, node: &NodeFacts<'_>) -> Vec<DependencyDecl> {
        let Some(desc) = self.get(name) else {
            return Vec::new();
        };
        let mut active: Vec<DependencyDecl> = desc
            .dependencies
            .iter()
            .filter(|d| d.applies_to(node))
            .cloned()
            .collect();
        for tool in desc.build_system.build_tools() {
            if self.contains(tool)
                && !desc.dependencies.iter().any(|d| d.name() == *tool)
            {
                active.push(DependencyDecl {
                    spec: Spec::named(*tool),
                    deptypes: DepTypes::of(&[DepType::Build]),
                    when: None,
                });
            }
        }
        active
    }

    /// Conflict rules whose condition holds for a node
    fn conflicts(&self, name: &str, node: &NodeFacts<'_>) -> Vec<ConflictDecl> {
        self.get(name)
            .map(|d| {
                d.conflicts
                    .iter()
                    .filter(|c| c.applies_to(node))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn build_system(&self, name: &str) -> BuildSystem {
        self.get(name).map(|d| d.build_system).unwrap_or_default()
    }

    /// True if the package does not inherit its parent's compiler and architecture
    fn independent_toolchain(&self, name: &str) -> bool {
        self.get(name).is_some_and(|d| d.independent_toolchain)
    }
}

/// An in-memory set of validated descriptors
#[derive(Debug, Clone, Default)]
pub struct Repository {
    packages: BTreeMap<String, PackageDescriptor>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor; names must be unique
    pub fn add(&mut self, descriptor: PackageDescriptor) -> Result<()> {
        if self.packages.contains_key(&descriptor.name) {
            return Err(Error::InvalidDescriptor {
                package: descriptor.name.clone(),
                reason: "package defined twice".to_string(),
            });
        }
        debug!("Registered package {}", descriptor.name);
        self.packages.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Validate and register a manifest
    pub fn add_manifest(&mut self, manifest: PackageManifest) -> Result<()> {
        self.add(manifest.build()?)
    }

    /// Load every `packages/*.toml` under `root`
    pub fn from_dir(root: &Path) -> Result<Self> {
        let dir = root.join(PACKAGES_DIR);
        let mut repo = Self::new();
        let mut files: Vec<_> = std::fs::read_dir(&dir)
            .map_err(|e| Error::io_at(&dir, e))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| Error::io_at(&dir, e))?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        files.sort();

        for path in files {
            let manifest = PackageManifest::from_file(&path)?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem != manifest.name {
                return Err(Error::InvalidDescriptor {
                    package: manifest.name.clone(),
                    reason: format!("defined in {} but named {}", path.display(), manifest.name),
                });
            }
            repo.add_manifest(manifest)?;
        }

        info!("Loaded {} package(s) from {}", repo.len(), root.display());
        Ok(repo)
    }

    /// Write descriptor files under `root/packages`
    pub fn write_manifests(root: &Path, manifests: &[PackageManifest]) -> Result<()> {
        let dir = root.join(PACKAGES_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
        for manifest in manifests {
            let path = dir.join(format!("{}.toml", manifest.name));
            std::fs::write(&path, manifest.to_toml()?).map_err(|e| Error::io_at(&path, e))?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl PackageRepository for Repository {
    fn get(&self, name: &str) -> Option<&PackageDescriptor> {
        self.packages.get(name)
    }

    fn package_names(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }
}

/// Several repositories searched in order; the first definition wins
#[derive(Debug, Clone, Default)]
pub struct RepoPath {
    repos: Vec<Repository>,
}

impl RepoPath {
    pub fn new(repos: Vec<Repository>) -> Self {
        Self { repos }
    }

    /// Load each directory as a repository, highest priority first
    pub fn from_dirs(dirs: &[impl AsRef<Path>]) -> Result<Self> {
        let repos = dirs
            .iter()
            .map(|d| Repository::from_dir(d.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(repos))
    }
}

impl PackageRepository for RepoPath {
    fn get(&self, name: &str) -> Option<&PackageDescriptor> {
        self.repos.iter().find_map(|r| r.get(name))
    }

    fn package_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repos.iter().flat_map(|r| r.package_names()).collect();
        names.sort();
        names.dedup();
        names
    }
}
