// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use sprig::arch::Architecture;
use sprig::compiler::Compiler;
use sprig::db::DatabaseOptions;
use sprig::installer::Builder;
use sprig::repository::{BuildSystem, PackageManifest, Repository};
use sprig::spec::{ConcreteSpec, DepType, Spec};
use sprig::{Concretizer, Database, DirectoryLayout, PathScheme};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const HOST: &str = "linux-ubuntu22.04-x86_64";

pub fn host() -> Architecture {
    Architecture::parse(HOST).unwrap()
}

pub fn compilers() -> Vec<Compiler> {
    vec![
        Compiler::parse("gcc@12.2.0").unwrap(),
        Compiler::parse("clang@15.0.0").unwrap(),
    ]
}

/// A small repository:
///
/// - `zlib` 1.2.11 / 1.2.13, `+shared` by default
/// - `libpng` -> zlib
/// - `cmake` 3.20.0 / 3.27.0
/// - `libtiff` (CMake build) -> zlib, libpng
/// - `app` -> libpng, libtiff (zlib reached along several paths)
pub fn fixture_repo() -> Repository {
    let mut repo = Repository::new();
    let link = &[DepType::Build, DepType::Link][..];
    for manifest in [
        PackageManifest::new("zlib")
            .versions(["1.2.11", "1.2.13"])
            .bool_variant("shared", true),
        PackageManifest::new("libpng")
            .versions(["1.6.37", "1.6.39"])
            .depends_on("zlib@1.2:", link, None),
        PackageManifest::new("cmake").versions(["3.20.0", "3.27.0"]),
        PackageManifest::new("libtiff")
            .versions(["4.5.0"])
            .single_variant("build_type", "Release", &["Debug", "Release"])
            .depends_on("zlib", link, None)
            .depends_on("libpng", link, None)
            .build_system(BuildSystem::CMake),
        PackageManifest::new("app")
            .versions(["1.0"])
            .depends_on("libpng", link, None)
            .depends_on("libtiff", link, None),
    ] {
        repo.add_manifest(manifest).unwrap();
    }
    repo
}

pub fn concretizer(repo: &Repository) -> Concretizer<'_> {
    Concretizer::new(repo, compilers(), host())
}

pub fn concretize(repo: &Repository, text: &str) -> Arc<ConcreteSpec> {
    concretizer(repo).concretize(&Spec::parse(text).unwrap()).unwrap()
}

/// A concrete spec written out in full, no repository involved
pub fn concrete(text: &str) -> Arc<ConcreteSpec> {
    ConcreteSpec::from_spec(&Spec::parse(text).unwrap()).unwrap()
}

/// `a -> b -> c`, every node concrete
pub fn chain_abc() -> Arc<ConcreteSpec> {
    concrete(&format!(
        "a@1.0 %gcc@12.2.0 arch={HOST} ^[deptypes=build,link] (b@1.0 %gcc@12.2.0 arch={HOST} ^[deptypes=build,link] c@1.0 %gcc@12.2.0 arch={HOST})"
    ))
}

/// Database options with short timeouts so failures show up quickly
pub fn fast_options() -> DatabaseOptions {
    DatabaseOptions {
        lock_timeout: Duration::from_secs(10),
        package_lock_timeout: Duration::from_secs(30),
        ..Default::default()
    }
}

/// A temporary install root with its layout and database
pub struct Store {
    pub dir: TempDir,
    pub root: PathBuf,
    pub layout: DirectoryLayout,
    pub db: Database,
}

impl Store {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let layout = DirectoryLayout::new(&root, PathScheme::V2);
        let db = Database::open(&root, fast_options()).unwrap();
        Self {
            dir,
            root,
            layout,
            db,
        }
    }

    /// Another handle on the same root, as a second process would have
    pub fn reopen(&self) -> (DirectoryLayout, Database) {
        (
            DirectoryLayout::new(&self.root, PathScheme::V2),
            Database::open(&self.root, fast_options()).unwrap(),
        )
    }
}

/// Builder that counts builds and can be slowed down to widen races
#[derive(Default)]
pub struct CountingBuilder {
    pub builds: AtomicUsize,
    pub delay: Duration,
}

impl CountingBuilder {
    pub fn slow(delay: Duration) -> Self {
        Self {
            builds: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl Builder for CountingBuilder {
    fn build(&self, _spec: &ConcreteSpec, prefix: &Path) -> sprig::Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        std::fs::create_dir_all(prefix.join("lib"))?;
        Ok(())
    }
}
