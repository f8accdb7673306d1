// src/environment/mod.rs

//! Environments
//!
//! An environment is a directory holding a manifest (`sprig.env.toml`)
//! that lists root specs and development checkouts, and a lockfile
//! (`sprig.lock`) recording what those roots last concretized to.
//!
//! ```toml
//! specs = ["libpng", "zlib@1.2: +shared"]
//! unify = true
//!
//! [[develop]]
//! name = "zlib"
//! path = "src/zlib"
//! ```

mod detector;
mod lockfile;
mod reconcile;

pub use detector::{ChangeDetector, DetectorKind, GitHeadDetector, MtimeDetector};
pub use lockfile::{LOCKFILE_VERSION, LockedRoot, Lockfile, LockfileMeta};
pub use reconcile::{ReconcileReport, Reconciler, SpecStatus, StaleReason};

use crate::concretize::Concretizer;
use crate::error::{Error, Result};
use crate::spec::{ConcreteSpec, Spec};
use crate::variant::{DEV_PATH, VariantValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const MANIFEST_FILE: &str = "sprig.env.toml";
pub const LOCKFILE_FILE: &str = "sprig.lock";

/// A package built from a local checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevelopEntry {
    pub name: String,
    /// Relative paths are taken from the environment directory
    pub path: PathBuf,
}

/// Contents of `sprig.env.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvManifest {
    #[serde(default)]
    pub specs: Vec<String>,
    #[serde(default)]
    pub develop: Vec<DevelopEntry>,
    /// Overrides the configured unify mode when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unify: Option<bool>,
}

impl EnvManifest {
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: EnvManifest =
            toml::from_str(content).map_err(|e| Error::EnvironmentError(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::EnvironmentError(e.to_string()))
    }

    /// Every spec must parse and name a package; develop names are unique
    pub fn validate(&self) -> Result<()> {
        for text in &self.specs {
            let spec = Spec::parse(text)?;
            if spec.name().is_none() {
                return Err(Error::EnvironmentError(format!(
                    "root spec '{}' has no package name",
                    text
                )));
            }
        }
        let mut seen = HashSet::new();
        for entry in &self.develop {
            if !seen.insert(entry.name.as_str()) {
                return Err(Error::EnvironmentError(format!(
                    "package '{}' is listed under develop twice",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}

/// An environment directory with its manifest and, once concretized, its lockfile
#[derive(Debug, Clone)]
pub struct Environment {
    dir: PathBuf,
    manifest: EnvManifest,
    lockfile: Option<Lockfile>,
}

impl Environment {
    /// Write a new manifest into `dir`
    pub fn create(dir: impl Into<PathBuf>, manifest: EnvManifest) -> Result<Self> {
        let dir = dir.into();
        let path = dir.join(MANIFEST_FILE);
        if path.exists() {
            return Err(Error::EnvironmentError(format!(
                "{} already exists",
                path.display()
            )));
        }
        manifest.validate()?;
        fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
        fs::write(&path, manifest.to_toml()?).map_err(|e| Error::io_at(&path, e))?;
        info!("Created environment in {}", dir.display());
        Ok(Self {
            dir,
            manifest,
            lockfile: None,
        })
    }

    /// Load the manifest and, if present, the lockfile
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(Error::EnvironmentError(format!(
                "no {} in {}",
                MANIFEST_FILE,
                dir.display()
            )));
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::io_at(&path, e))?;
        let manifest = EnvManifest::parse(&content)?;

        let lock_path = dir.join(LOCKFILE_FILE);
        let lockfile = if lock_path.is_file() {
            Some(Lockfile::load(&lock_path)?)
        } else {
            None
        };
        Ok(Self {
            dir,
            manifest,
            lockfile,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &EnvManifest {
        &self.manifest
    }

    pub fn lockfile(&self) -> Option<&Lockfile> {
        self.lockfile.as_ref()
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.dir.join(LOCKFILE_FILE)
    }

    /// Root specs with their normalized text, in manifest order
    pub fn roots(&self) -> Result<Vec<(String, Spec)>> {
        self.manifest
            .specs
            .iter()
            .map(|text| {
                let spec = Spec::parse(text)?;
                Ok((spec.to_string(), spec))
            })
            .collect()
    }

    /// Absolute source path per develop entry, as stored in `dev_path`
    pub fn develop_paths(&self) -> BTreeMap<String, String> {
        self.manifest
            .develop
            .iter()
            .map(|entry| {
                let path = if entry.path.is_absolute() {
                    entry.path.clone()
                } else {
                    self.dir.join(&entry.path)
                };
                (entry.name.clone(), path.display().to_string())
            })
            .collect()
    }

    /// `name dev_path=<path>` for every develop entry
    pub fn develop_constraints(&self) -> Vec<Spec> {
        self.develop_paths()
            .into_iter()
            .map(|(name, path)| {
                let mut spec = Spec::named(name);
                spec.variants
                    .insert(DEV_PATH.to_string(), VariantValue::single(path));
                spec
            })
            .collect()
    }

    /// Concretize every root and write the lockfile
    ///
    /// Source states recorded for hashes that survive are kept.
    pub fn concretize(&mut self, concretizer: Concretizer<'_>) -> Result<Vec<(String, Arc<ConcreteSpec>)>> {
        let mut options = concretizer.options().clone();
        if let Some(unify) = self.manifest.unify {
            options.unify = unify;
        }
        let mut constraints = concretizer.constraints().to_vec();
        constraints.extend(self.develop_constraints());
        let concretizer = concretizer.with_options(options).with_constraints(constraints);

        let (texts, specs): (Vec<String>, Vec<Spec>) = self.roots()?.into_iter().unzip();
        let concrete = concretizer.concretize_all(&specs)?;
        let roots: Vec<(String, Arc<ConcreteSpec>)> = texts.into_iter().zip(concrete).collect();

        let mut lockfile = Lockfile::new(&roots);
        if let Some(old) = &self.lockfile {
            lockfile.develop_states = old.develop_states.clone();
            lockfile.prune_develop_states();
        }
        lockfile.save(&self.lockfile_path())?;
        info!(
            "Concretized {} root(s) in {}",
            roots.len(),
            self.dir.display()
        );
        self.lockfile = Some(lockfile);
        Ok(roots)
    }

    /// Locked roots rebuilt from the lockfile
    pub fn concrete_roots(&self) -> Result<Vec<(LockedRoot, Arc<ConcreteSpec>)>> {
        match &self.lockfile {
            Some(lock) => lock.concrete_roots(),
            None => Ok(Vec::new()),
        }
    }

    /// Remember the source state of every dev spec in an installed DAG
    pub fn record_install(&mut self, spec: &Arc<ConcreteSpec>, detector: &dyn ChangeDetector) -> Result<()> {
        let path = self.lockfile_path();
        let lockfile = self.lockfile.as_mut().ok_or_else(|| {
            Error::EnvironmentError("environment has not been concretized".to_string())
        })?;
        let mut recorded = 0;
        for node in spec.traverse() {
            if let Some(source) = node.dev_path() {
                let token = detector.current_state(Path::new(source))?;
                lockfile.develop_states.insert(node.hash().clone(), token);
                recorded += 1;
            }
        }
        if recorded > 0 {
            lockfile.save(&path)?;
        }
        Ok(())
    }
}
