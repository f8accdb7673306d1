// src/layout.rs

//! Directory layout: where each concrete spec is installed
//!
//! Every prefix ends in `<name>-<version>-<full hash>`, so two different
//! hashes never map to the same prefix under one scheme. Each prefix holds
//! a `.sprig/` metadata directory:
//!
//! - `layout.json` written when the prefix is created, naming the scheme
//!   and the hash that owns the prefix
//! - `spec.json` written once the install is complete
//!
//! Old local installs stay resolvable after the default scheme changes
//! because local lookups try every scheme. Upstream prefixes are never
//! derived: they come from the upstream database's records.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::spec::{ConcreteSpec, SpecHash};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Metadata directory inside every prefix
pub const METADATA_DIR: &str = ".sprig";
pub const SPEC_FILE: &str = "spec.json";
pub const LAYOUT_FILE: &str = "layout.json";

/// Versioned mapping from a spec to a relative prefix
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PathScheme {
    /// `<platform>-<os>-<target>/<compiler>-<compiler version>/<name>-<version>-<hash>`
    V1,
    /// `<platform>-<target>/<name>-<version>-<hash>`
    #[default]
    V2,
}

impl PathScheme {
    pub fn relative_path(&self, spec: &ConcreteSpec) -> PathBuf {
        let leaf = format!("{}-{}-{}", spec.name(), spec.version(), spec.hash());
        let arch = spec.arch();
        match self {
            Self::V1 => PathBuf::from(arch.to_string())
                .join(format!("{}-{}", spec.compiler().name, spec.compiler().version))
                .join(leaf),
            Self::V2 => PathBuf::from(format!("{}-{}", arch.platform, arch.target)).join(leaf),
        }
    }
}

/// Contents of `layout.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixMarker {
    pub scheme: PathScheme,
    pub hash: SpecHash,
}

/// Maps concrete specs to prefixes under one root
#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    root: PathBuf,
    scheme: PathScheme,
    /// Read-only databases whose recorded prefixes are reused
    upstreams: Vec<Database>,
}

impl DirectoryLayout {
    pub fn new(root: impl Into<PathBuf>, scheme: PathScheme) -> Self {
        Self {
            root: root.into(),
            scheme,
            upstreams: Vec::new(),
        }
    }

    /// Chain an upstream install tree through its database
    pub fn with_upstream(mut self, upstream: Database) -> Self {
        self.upstreams.push(upstream.into_upstream());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scheme(&self) -> PathScheme {
        self.scheme
    }

    /// Where `spec` goes under this root with the configured scheme
    pub fn local_path(&self, spec: &ConcreteSpec) -> PathBuf {
        self.root.join(self.scheme.relative_path(spec))
    }

    /// Prefix for `spec`: an upstream's existing install, else the local path
    pub fn path_for(&self, spec: &ConcreteSpec) -> Result<PathBuf> {
        Ok(match self.upstream_prefix(spec)? {
            Some(prefix) => prefix,
            None => self.local_path(spec),
        })
    }

    /// Prefix recorded for `spec` by the first upstream that installed it
    pub fn upstream_prefix(&self, spec: &ConcreteSpec) -> Result<Option<PathBuf>> {
        for upstream in &self.upstreams {
            if let Some(location) = upstream.locate(spec.hash())? {
                return Ok(Some(location.prefix));
            }
        }
        Ok(None)
    }

    /// Create the local prefix and claim it for `spec`
    ///
    /// An existing directory is reused only if it was claimed by the same
    /// hash; anything else there is a [`Error::PathCollision`].
    pub fn create(&self, spec: &ConcreteSpec) -> Result<PathBuf> {
        if let Some(prefix) = self.upstream_prefix(spec)? {
            return Err(Error::AlreadyInstalled {
                hash: spec.hash().clone(),
                prefix,
                upstream: true,
            });
        }

        let prefix = self.local_path(spec);
        if !is_empty_dir(&prefix)? {
            return match Self::hash_at(&prefix) {
                Some(existing) if &existing == spec.hash() => {
                    debug!("Reusing prefix {:?}", prefix);
                    Ok(prefix)
                }
                existing => Err(Error::PathCollision {
                    path: prefix,
                    existing: existing
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "unrecognized files".to_string()),
                    requested: spec.hash().clone(),
                }),
            };
        }

        let meta = prefix.join(METADATA_DIR);
        fs::create_dir_all(&meta).map_err(|e| Error::io_at(&meta, e))?;
        let marker = PrefixMarker {
            scheme: self.scheme,
            hash: spec.hash().clone(),
        };
        let path = meta.join(LAYOUT_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&marker)?).map_err(|e| Error::io_at(&path, e))?;
        debug!("Created prefix {:?} for {}", prefix, spec.hash());
        Ok(prefix)
    }

    /// Record a completed install by writing `spec.json`
    pub fn write_spec(&self, spec: &Arc<ConcreteSpec>, prefix: &Path) -> Result<()> {
        let path = prefix.join(METADATA_DIR).join(SPEC_FILE);
        fs::write(&path, spec.to_json()?).map_err(|e| Error::io_at(&path, e))
    }

    /// Read the spec stored in a prefix
    pub fn read_spec(prefix: &Path) -> Result<Arc<ConcreteSpec>> {
        let path = prefix.join(METADATA_DIR).join(SPEC_FILE);
        let text = fs::read_to_string(&path).map_err(|e| Error::io_at(&path, e))?;
        ConcreteSpec::from_json(&text)
    }

    /// Hash that owns a prefix, from its metadata
    pub fn hash_at(prefix: &Path) -> Option<SpecHash> {
        let meta = prefix.join(METADATA_DIR);
        if let Ok(spec) = Self::read_spec(prefix) {
            return Some(spec.hash().clone());
        }
        let text = fs::read_to_string(meta.join(LAYOUT_FILE)).ok()?;
        serde_json::from_str::<PrefixMarker>(&text).ok().map(|m| m.hash)
    }

    /// Completed local install of `spec` under any scheme, or in an upstream
    pub fn find_installed(&self, spec: &ConcreteSpec) -> Result<Option<PathBuf>> {
        let local = PathScheme::iter()
            .map(|scheme| self.root.join(scheme.relative_path(spec)))
            .find(|prefix| {
                prefix.join(METADATA_DIR).join(SPEC_FILE).is_file()
                    && Self::hash_at(prefix).as_ref() == Some(spec.hash())
            });
        match local {
            Some(prefix) => Ok(Some(prefix)),
            None => self.upstream_prefix(spec),
        }
    }

    /// Delete a local prefix and any parent directories left empty
    pub fn remove(&self, prefix: &Path) -> Result<()> {
        if !prefix.starts_with(&self.root) || prefix == self.root {
            return Err(Error::IoError(format!(
                "refusing to remove {}: not a prefix under {}",
                prefix.display(),
                self.root.display()
            )));
        }
        match fs::remove_dir_all(prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_at(prefix, e)),
        }
        info!("Removed prefix {:?}", prefix);

        let mut dir = prefix.parent();
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
        Ok(())
    }

    /// Every completed install under the local root, sorted by prefix
    pub fn all_specs(&self) -> Result<Vec<(PathBuf, Arc<ConcreteSpec>)>> {
        let mut found = Vec::new();
        if !self.root.is_dir() {
            return Ok(found);
        }
        let mut walker = WalkDir::new(&self.root).min_depth(1).sort_by_file_name().into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                walker.skip_current_dir();
                continue;
            }
            let spec_file = entry.path().join(METADATA_DIR).join(SPEC_FILE);
            if spec_file.is_file() {
                match Self::read_spec(entry.path()) {
                    Ok(spec) => found.push((entry.path().to_path_buf(), spec)),
                    Err(e) => warn!("Skipping unreadable install at {:?}: {}", entry.path(), e),
                }
                walker.skip_current_dir();
            }
        }
        Ok(found)
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(Error::io_at(path, e)),
    }
}
