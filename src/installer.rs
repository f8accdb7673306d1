// src/installer.rs

//! Installing concrete DAGs
//!
//! Nodes are installed dependencies first. Each node is built under its
//! per-hash [`PrefixLock`](crate::lock::PrefixLock): a second process
//! asking for the same hash waits, then finds the finished record and
//! builds nothing. The database is only written after the build and the
//! prefix metadata are complete.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::layout::{DirectoryLayout, METADATA_DIR};
use crate::repository::PackageRepository;
use crate::spec::{ConcreteSpec, SpecHash};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, info, warn};

/// Build log written by [`PhaseLogBuilder`]
pub const BUILD_LOG: &str = "build.log";

/// Produces the contents of a prefix
pub trait Builder: Send + Sync {
    /// Build `spec` into `prefix`, which exists and is claimed for it
    fn build(&self, spec: &ConcreteSpec, prefix: &Path) -> Result<()>;
}

/// Builder that records each phase of the package's build system
///
/// Writes `.sprig/build.log` with one line per phase and the command it
/// would run. Running the commands is left to real builders.
pub struct PhaseLogBuilder<'a> {
    repo: &'a dyn PackageRepository,
}

impl<'a> PhaseLogBuilder<'a> {
    pub fn new(repo: &'a dyn PackageRepository) -> Self {
        Self { repo }
    }
}

impl Builder for PhaseLogBuilder<'_> {
    fn build(&self, spec: &ConcreteSpec, prefix: &Path) -> Result<()> {
        let system = self.repo.build_system(spec.name());
        let mut log = format!("# {} ({})\n", spec.format_node(), system);
        for step in system.plan(spec, prefix) {
            let _ = writeln!(log, "{}: {}", step.phase, step.command.join(" "));
        }
        let path = prefix.join(METADATA_DIR).join(BUILD_LOG);
        fs::write(&path, log).map_err(|e| Error::io_at(&path, e))?;
        debug!("Wrote build log for {} to {:?}", spec.name(), path);
        Ok(())
    }
}

/// What happened to one node of an install request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum InstallOutcome {
    Built,
    AlreadyInstalled,
    /// Provided by an upstream install tree
    Upstream,
}

/// One node's result
#[derive(Debug, Clone)]
pub struct InstalledNode {
    pub spec: Arc<ConcreteSpec>,
    pub outcome: InstallOutcome,
    pub prefix: PathBuf,
}

/// Per-node results, dependencies before dependents
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    pub nodes: Vec<InstalledNode>,
}

impl InstallReport {
    pub fn outcome(&self, hash: &SpecHash) -> Option<InstallOutcome> {
        self.nodes
            .iter()
            .find(|n| n.spec.hash() == hash)
            .map(|n| n.outcome)
    }

    /// Number of nodes actually built
    pub fn built(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.outcome == InstallOutcome::Built)
            .count()
    }

    /// Prefix of the requested root
    pub fn root_prefix(&self) -> Option<&Path> {
        self.nodes.last().map(|n| n.prefix.as_path())
    }
}

/// Installs into one database and layout
pub struct Installer<'a> {
    db: &'a Database,
    layout: &'a DirectoryLayout,
}

impl<'a> Installer<'a> {
    pub fn new(db: &'a Database, layout: &'a DirectoryLayout) -> Self {
        Self { db, layout }
    }

    /// Install `spec` and everything it depends on
    ///
    /// Only the root is recorded as explicit (when `explicit` is set).
    /// Already-installed nodes are reported, not treated as errors.
    pub fn install(
        &self,
        spec: &Arc<ConcreteSpec>,
        explicit: bool,
        builder: &dyn Builder,
    ) -> Result<InstallReport> {
        let mut report = InstallReport::default();
        for node in spec.traverse() {
            let root = node.hash() == spec.hash();
            let installed = self.install_node(&node, explicit && root, builder)?;
            report.nodes.push(installed);
        }
        info!(
            "Installed {} ({} built, {} already present)",
            spec.format_node(),
            report.built(),
            report.nodes.len() - report.built()
        );
        Ok(report)
    }

    fn existing(&self, spec: &Arc<ConcreteSpec>, explicit: bool) -> Result<Option<InstalledNode>> {
        let Some(location) = self.db.locate(spec.hash())? else {
            return Ok(None);
        };
        let outcome = if location.upstream {
            InstallOutcome::Upstream
        } else {
            if explicit
                && let Some(record) = self.db.query_local(spec.hash())?
                && !record.explicit
            {
                self.db.mark_explicit(spec.hash(), true)?;
            }
            InstallOutcome::AlreadyInstalled
        };
        Ok(Some(InstalledNode {
            spec: spec.clone(),
            outcome,
            prefix: location.prefix,
        }))
    }

    fn install_node(
        &self,
        spec: &Arc<ConcreteSpec>,
        explicit: bool,
        builder: &dyn Builder,
    ) -> Result<InstalledNode> {
        if let Some(done) = self.existing(spec, explicit)? {
            return Ok(done);
        }

        let _lock = self.db.prefix_lock(spec.hash()).acquire()?;
        // Someone may have finished it while we waited
        if let Some(done) = self.existing(spec, explicit)? {
            debug!("{} was installed while waiting for its lock", spec.hash().short());
            return Ok(done);
        }

        let prefix = match self.layout.create(spec) {
            Ok(prefix) => prefix,
            Err(Error::AlreadyInstalled {
                prefix,
                upstream: true,
                ..
            }) => {
                return Ok(InstalledNode {
                    spec: spec.clone(),
                    outcome: InstallOutcome::Upstream,
                    prefix,
                });
            }
            Err(e) => return Err(e),
        };

        info!("Building {} in {:?}", spec.format_node(), prefix);
        if let Err(e) = builder.build(spec, &prefix) {
            warn!("Build of {} failed, removing {:?}", spec.name(), prefix);
            if let Err(cleanup) = self.layout.remove(&prefix) {
                warn!("Could not remove {:?}: {}", prefix, cleanup);
            }
            return Err(match e {
                Error::BuildError { .. } => e,
                other => Error::BuildError {
                    spec: spec.format_node(),
                    reason: other.to_string(),
                },
            });
        }
        self.layout.write_spec(spec, &prefix)?;
        self.db.add(spec, &prefix, explicit)?;

        Ok(InstalledNode {
            spec: spec.clone(),
            outcome: InstallOutcome::Built,
            prefix,
        })
    }

    /// Remove an installed hash and its prefix
    ///
    /// Fails with [`Error::StillReferenced`] while other installs need it.
    pub fn uninstall(&self, hash: &SpecHash) -> Result<()> {
        let _lock = self.db.prefix_lock(hash).acquire()?;
        let record = self.db.remove(hash)?;
        if record.path.starts_with(self.layout.root()) && record.path.exists() {
            self.layout.remove(&record.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseOptions;
    use crate::layout::PathScheme;
    use crate::repository::{BuildSystem, PackageManifest, Repository};
    use crate::spec::Spec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingBuilder {
        builds: AtomicUsize,
        fail_on: Option<String>,
    }

    impl CountingBuilder {
        fn new() -> Self {
            Self {
                builds: AtomicUsize::new(0),
                fail_on: None,
            }
        }
    }

    impl Builder for CountingBuilder {
        fn build(&self, spec: &ConcreteSpec, prefix: &Path) -> Result<()> {
            if self.fail_on.as_deref() == Some(spec.name()) {
                return Err(Error::IoError("compiler exploded".to_string()));
            }
            self.builds.fetch_add(1, Ordering::SeqCst);
            fs::create_dir_all(prefix.join("lib")).map_err(Error::from)?;
            Ok(())
        }
    }

    fn app() -> Arc<ConcreteSpec> {
        ConcreteSpec::from_spec(
            &Spec::parse(
                "app@1.0 %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64 \
                 ^(libpng@1.6.39 %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64 \
                 ^zlib@1.2.13 +shared %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64)",
            )
            .unwrap(),
        )
        .unwrap()
    }

    fn setup(tmp: &TempDir) -> (Database, DirectoryLayout) {
        let layout = DirectoryLayout::new(tmp.path(), PathScheme::V2);
        let db = Database::open(tmp.path(), DatabaseOptions::default()).unwrap();
        (db, layout)
    }

    #[test]
    fn test_install_builds_dependencies_first() {
        let tmp = TempDir::new().unwrap();
        let (db, layout) = setup(&tmp);
        let builder = CountingBuilder::new();
        let spec = app();

        let report = Installer::new(&db, &layout).install(&spec, true, &builder).unwrap();
        let names: Vec<_> = report.nodes.iter().map(|n| n.spec.name()).collect();
        assert_eq!(names, vec!["zlib", "libpng", "app"]);
        assert_eq!(report.built(), 3);
        assert!(db.query(spec.hash()).unwrap().unwrap().explicit);
        let zlib = spec.find("zlib").unwrap();
        assert!(!db.query(zlib.hash()).unwrap().unwrap().explicit);
        assert_eq!(
            DirectoryLayout::read_spec(report.root_prefix().unwrap()).unwrap(),
            spec
        );
    }

    #[test]
    fn test_reinstall_builds_nothing() {
        let tmp = TempDir::new().unwrap();
        let (db, layout) = setup(&tmp);
        let builder = CountingBuilder::new();
        let spec = app();
        let installer = Installer::new(&db, &layout);

        installer.install(&spec, true, &builder).unwrap();
        let again = installer.install(&spec, true, &builder).unwrap();
        assert_eq!(again.built(), 0);
        assert_eq!(again.outcome(spec.hash()), Some(InstallOutcome::AlreadyInstalled));
        assert_eq!(builder.builds.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failed_build_leaves_no_trace() {
        let tmp = TempDir::new().unwrap();
        let (db, layout) = setup(&tmp);
        let builder = CountingBuilder {
            fail_on: Some("libpng".to_string()),
            ..CountingBuilder::new()
        };
        let spec = app();

        let err = Installer::new(&db, &layout)
            .install(&spec, true, &builder)
            .unwrap_err();
        assert!(matches!(err, Error::BuildError { .. }));
        let png = spec.find("libpng").unwrap();
        assert!(db.query(png.hash()).unwrap().is_none());
        assert!(!layout.local_path(&png).exists());
        // zlib finished before the failure and stays installed
        assert!(db.query(spec.find("zlib").unwrap().hash()).unwrap().is_some());
    }

    #[test]
    fn test_uninstall_respects_references() {
        let tmp = TempDir::new().unwrap();
        let (db, layout) = setup(&tmp);
        let spec = app();
        let installer = Installer::new(&db, &layout);
        let report = installer.install(&spec, true, &CountingBuilder::new()).unwrap();

        let png = spec.find("libpng").unwrap();
        assert!(matches!(
            installer.uninstall(png.hash()),
            Err(Error::StillReferenced { .. })
        ));
        installer.uninstall(spec.hash()).unwrap();
        assert!(!report.root_prefix().unwrap().exists());
        installer.uninstall(png.hash()).unwrap();
    }

    #[test]
    fn test_upstream_nodes_are_not_rebuilt() {
        let tmp = TempDir::new().unwrap();
        let spec = app();
        let zlib = spec.find("zlib").unwrap();

        let site_root = tmp.path().join("site");
        let site_layout = DirectoryLayout::new(&site_root, PathScheme::V1);
        let site_db = Database::open(&site_root, DatabaseOptions::default()).unwrap();
        Installer::new(&site_db, &site_layout)
            .install(&zlib, true, &CountingBuilder::new())
            .unwrap();

        let user_root = tmp.path().join("user");
        let layout = DirectoryLayout::new(&user_root, PathScheme::V2)
            .with_upstream(Database::open_upstream(&site_root));
        let db = Database::open(&user_root, DatabaseOptions::default())
            .unwrap()
            .with_upstream(Database::open_upstream(&site_root));
        let builder = CountingBuilder::new();
        let report = Installer::new(&db, &layout).install(&spec, true, &builder).unwrap();
        assert_eq!(report.outcome(zlib.hash()), Some(InstallOutcome::Upstream));
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_phase_log_builder() {
        let tmp = TempDir::new().unwrap();
        let (db, layout) = setup(&tmp);
        let mut repo = Repository::new();
        repo.add_manifest(
            PackageManifest::new("zlib")
                .versions(["1.2.13"])
                .bool_variant("shared", true)
                .build_system(BuildSystem::CMake),
        )
        .unwrap();
        let zlib = app().find("zlib").unwrap();

        let report = Installer::new(&db, &layout)
            .install(&zlib, true, &PhaseLogBuilder::new(&repo))
            .unwrap();
        let log = fs::read_to_string(
            report.root_prefix().unwrap().join(METADATA_DIR).join(BUILD_LOG),
        )
        .unwrap();
        assert!(log.starts_with("# zlib@1.2.13"));
        assert!(log.contains("cmake: cmake -S ."));
        assert!(log.contains("-DBUILD_SHARED_LIBS=ON"));
        assert_eq!(log.lines().count(), 4);
    }
}
