// src/environment/lockfile.rs

//! The `sprig.lock` file
//!
//! Records, for each root the environment was concretized from, the
//! abstract text and the concrete hash it resolved to. Every node of
//! every root DAG is stored once under `concrete_specs`, so the lockfile
//! alone is enough to rebuild the concrete specs.

use crate::error::{Error, Result};
use crate::spec::{ConcreteSpec, NodeDict, SpecAssembler, SpecHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Lockfile format version
pub const LOCKFILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockfileMeta {
    pub version: u32,
}

/// One concretized root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedRoot {
    /// Abstract spec as written in the manifest, normalized
    #[serde(rename = "abstract")]
    pub abstract_spec: String,
    pub hash: SpecHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    #[serde(rename = "_meta")]
    pub meta: LockfileMeta,
    pub roots: Vec<LockedRoot>,
    pub concrete_specs: BTreeMap<SpecHash, NodeDict>,
    /// Change-detector token of each dev spec's source at its last install
    #[serde(default)]
    pub develop_states: BTreeMap<SpecHash, String>,
}

impl Lockfile {
    /// Lock a set of concretized roots
    pub fn new(roots: &[(String, Arc<ConcreteSpec>)]) -> Self {
        let mut concrete_specs = BTreeMap::new();
        for (_, root) in roots {
            for node in root.traverse() {
                concrete_specs
                    .entry(node.hash().clone())
                    .or_insert_with(|| node.node_dict());
            }
        }
        Self {
            meta: LockfileMeta {
                version: LOCKFILE_VERSION,
            },
            roots: roots
                .iter()
                .map(|(text, spec)| LockedRoot {
                    abstract_spec: text.clone(),
                    hash: spec.hash().clone(),
                })
                .collect(),
            concrete_specs,
            develop_states: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        let lock: Lockfile = serde_json::from_str(&text)
            .map_err(|e| Error::EnvironmentError(format!("{}: {}", path.display(), e)))?;
        if lock.meta.version != LOCKFILE_VERSION {
            return Err(Error::EnvironmentError(format!(
                "{}: unsupported lockfile version {}",
                path.display(),
                lock.meta.version
            )));
        }
        Ok(lock)
    }

    /// Write through a temporary file so readers never see half a lockfile
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io_at(dir, e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::io_at(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| Error::io_at(path, e.error))?;
        Ok(())
    }

    pub fn root(&self, abstract_spec: &str) -> Option<&LockedRoot> {
        self.roots.iter().find(|r| r.abstract_spec == abstract_spec)
    }

    /// Rebuild every locked root, sharing nodes between them
    pub fn concrete_roots(&self) -> Result<Vec<(LockedRoot, Arc<ConcreteSpec>)>> {
        let mut assembler = SpecAssembler::new(|h: &SpecHash| self.concrete_specs.get(h).cloned());
        let mut out = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            let spec = assembler.assemble(&root.hash)?;
            out.push((root.clone(), spec));
        }
        Ok(out)
    }

    /// Drop develop states for hashes no longer in the lock
    pub(crate) fn prune_develop_states(&mut self) {
        let specs = &self.concrete_specs;
        self.develop_states.retain(|hash, _| specs.contains_key(hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Spec;
    use tempfile::TempDir;

    fn concrete(text: &str) -> Arc<ConcreteSpec> {
        ConcreteSpec::from_spec(&Spec::parse(text).unwrap()).unwrap()
    }

    fn roots() -> Vec<(String, Arc<ConcreteSpec>)> {
        let png = concrete(
            "libpng@1.6.39 %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64 \
             ^zlib@1.2.13 +shared %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64",
        );
        let zlib = png.find("zlib").unwrap();
        vec![("libpng".to_string(), png), ("zlib+shared".to_string(), zlib)]
    }

    #[test]
    fn test_shared_nodes_stored_once() {
        let lock = Lockfile::new(&roots());
        assert_eq!(lock.roots.len(), 2);
        assert_eq!(lock.concrete_specs.len(), 2);

        let rebuilt = lock.concrete_roots().unwrap();
        let zlib_via_png = rebuilt[0].1.find("zlib").unwrap();
        assert!(Arc::ptr_eq(&zlib_via_png, &rebuilt[1].1));
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sprig.lock");
        let original = roots();
        let mut lock = Lockfile::new(&original);
        lock.develop_states
            .insert(original[1].1.hash().clone(), "mtime:12".to_string());
        lock.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["roots"][0]["abstract"], "libpng");

        let back = Lockfile::load(&path).unwrap();
        assert_eq!(back.root("zlib+shared").unwrap().hash, *original[1].1.hash());
        assert_eq!(back.concrete_roots().unwrap()[0].1, original[0].1);
        assert_eq!(back.develop_states.len(), 1);
    }

    #[test]
    fn test_save_replaces_in_place() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sprig.lock");
        let original = roots();
        Lockfile::new(&original).save(&path).unwrap();
        Lockfile::new(&original[1..]).save(&path).unwrap();

        // Only the lockfile itself is left; no temporary files linger
        let entries: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("sprig.lock")]);
        let back = Lockfile::load(&path).unwrap();
        assert_eq!(back.roots.len(), 1);
        assert_eq!(back.root("zlib+shared").unwrap().hash, *original[1].1.hash());
    }

    #[test]
    fn test_rejects_future_version() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sprig.lock");
        fs::write(
            &path,
            r#"{"_meta": {"version": 9}, "roots": [], "concrete_specs": {}}"#,
        )
        .unwrap();
        assert!(matches!(
            Lockfile::load(&path),
            Err(Error::EnvironmentError(_))
        ));
    }

    #[test]
    fn test_prune_develop_states() {
        let mut lock = Lockfile::new(&roots());
        lock.develop_states
            .insert(SpecHash::of(b"gone"), "mtime:1".to_string());
        lock.prune_develop_states();
        assert!(lock.develop_states.is_empty());
    }
}
