// src/db/record.rs

//! Install records and the on-disk index format

use crate::error::{Error, Result};
use crate::spec::{ConcreteSpec, NodeDict, SpecHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Index format version written by this build
pub const DB_VERSION: u32 = 1;

/// One installed (or known but missing) spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRecord {
    /// The node, with dependency edges by hash
    pub spec: NodeDict,
    pub path: PathBuf,
    /// False when the prefix is known to be gone
    pub installed: bool,
    /// Requested by a user rather than pulled in as a dependency
    pub explicit: bool,
    /// Number of local records depending on this one
    pub ref_count: u32,
    pub installation_time: DateTime<Utc>,
}

impl InstallRecord {
    pub fn new(spec: &ConcreteSpec, path: &Path, explicit: bool) -> Self {
        Self {
            spec: spec.node_dict(),
            path: path.to_path_buf(),
            installed: true,
            explicit,
            ref_count: 0,
            installation_time: Utc::now(),
        }
    }

    /// Hash recomputed from the stored node
    pub fn hash(&self) -> SpecHash {
        self.spec.hash()
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Hashes of direct dependencies
    pub fn dependency_hashes(&self) -> impl Iterator<Item = &SpecHash> {
        self.spec.dependencies.iter().map(|d| &d.hash)
    }

    pub fn depends_on(&self, hash: &SpecHash) -> bool {
        self.dependency_hashes().any(|h| h == hash)
    }
}

/// `{"database": {...}}` wrapper as stored in `index.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub database: Index,
}

/// The set of records, keyed by hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub version: String,
    #[serde(default)]
    pub installs: BTreeMap<SpecHash, InstallRecord>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            version: DB_VERSION.to_string(),
            installs: BTreeMap::new(),
        }
    }
}

impl Index {
    /// Parse index text, checking version and that every key matches its record
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let file: IndexFile = serde_json::from_str(text).map_err(|e| Error::CorruptDatabase {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let index = file.database;
        if index.version != DB_VERSION.to_string() {
            return Err(Error::InvalidDatabaseVersion {
                expected: DB_VERSION,
                found: index.version,
            });
        }
        for (hash, record) in &index.installs {
            let computed = record.hash();
            if &computed != hash {
                return Err(Error::CorruptDatabase {
                    path: path.to_path_buf(),
                    reason: format!("record {} hashes to {}", hash, computed),
                });
            }
        }
        Ok(index)
    }

    pub fn to_json(&self) -> Result<String> {
        let file = IndexFile {
            database: self.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn get(&self, hash: &SpecHash) -> Option<&InstallRecord> {
        self.installs.get(hash)
    }

    /// Installed local records depending directly on `hash`
    pub fn dependents(&self, hash: &SpecHash) -> Vec<SpecHash> {
        self.installs
            .iter()
            .filter(|(_, r)| r.installed && r.depends_on(hash))
            .map(|(h, _)| h.clone())
            .collect()
    }

    /// Reference counts implied by the stored edges
    pub fn expected_ref_counts(&self) -> BTreeMap<SpecHash, u32> {
        let mut counts: BTreeMap<SpecHash, u32> =
            self.installs.keys().map(|h| (h.clone(), 0)).collect();
        for record in self.installs.values() {
            for dep in record.dependency_hashes() {
                if let Some(count) = counts.get_mut(dep) {
                    *count += 1;
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Spec;

    fn record(text: &str) -> InstallRecord {
        let spec = ConcreteSpec::from_spec(&Spec::parse(text).unwrap()).unwrap();
        InstallRecord::new(&spec, Path::new("/opt/x"), true)
    }

    #[test]
    fn test_round_trip_and_shape() {
        let rec = record("zlib@1.2.13 +shared %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64");
        let mut index = Index::default();
        index.installs.insert(rec.hash(), rec.clone());

        let json = index.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["database"]["version"], "1");
        assert!(value["database"]["installs"][rec.hash().as_str()]["ref_count"].is_number());

        let back = Index::parse(&json, Path::new("index.json")).unwrap();
        assert_eq!(back.get(&rec.hash()), Some(&rec));
    }

    #[test]
    fn test_rejects_wrong_key() {
        let rec = record("zlib@1.2.13 +shared %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64");
        let mut index = Index::default();
        index.installs.insert(SpecHash::of(b"other"), rec);
        let json = index.to_json().unwrap();
        assert!(matches!(
            Index::parse(&json, Path::new("index.json")),
            Err(Error::CorruptDatabase { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let json = r#"{"database": {"version": "7", "installs": {}}}"#;
        assert!(matches!(
            Index::parse(json, Path::new("index.json")),
            Err(Error::InvalidDatabaseVersion { expected: 1, .. })
        ));
        assert!(matches!(
            Index::parse("{not json", Path::new("index.json")),
            Err(Error::CorruptDatabase { .. })
        ));
    }
}
