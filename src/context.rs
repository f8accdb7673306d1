// src/context.rs

//! Explicit session state
//!
//! A [`Context`] bundles the install root, its configuration, the
//! directory layout and database (with their upstream chains) and the
//! package repositories. It is built once per command and passed to
//! whatever needs it.

use crate::arch::Architecture;
use crate::compiler::Compiler;
use crate::concretize::Concretizer;
use crate::config::{self, Config};
use crate::db::Database;
use crate::environment::{ChangeDetector, Reconciler};
use crate::error::Result;
use crate::installer::Installer;
use crate::layout::DirectoryLayout;
use crate::repository::RepoPath;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct Context {
    root: PathBuf,
    config: Config,
    layout: DirectoryLayout,
    db: Database,
    repo: RepoPath,
    compilers: Vec<Compiler>,
    host: Architecture,
}

impl Context {
    /// Open `root` (or the default root) with its `sprig.toml`
    pub fn open(root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => config::default_root()?,
        };
        let config = Config::load(&root)?;
        let repo_dirs: Vec<PathBuf> = config
            .repo_dirs(&root)
            .into_iter()
            .filter(|d| d.is_dir())
            .collect();
        let repo = RepoPath::from_dirs(&repo_dirs)?;
        Self::from_config(root, config, repo)
    }

    /// Build a context from an already-loaded configuration
    pub fn from_config(root: impl Into<PathBuf>, config: Config, repo: RepoPath) -> Result<Self> {
        let root = root.into();
        config.validate()?;

        let mut layout = DirectoryLayout::new(&root, config.layout.scheme);
        let mut db = Database::open(&root, config.database_options())?;
        for upstream in &config.upstreams {
            debug!("Chaining upstream install tree {:?}", upstream);
            layout = layout.with_upstream(Database::open_upstream(upstream));
            db = db.with_upstream(Database::open_upstream(upstream));
        }

        let compilers = config.compilers()?;
        let host = config.host()?;
        Ok(Self {
            root,
            config,
            layout,
            db,
            repo,
            compilers,
            host,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn repo(&self) -> &RepoPath {
        &self.repo
    }

    pub fn host(&self) -> &Architecture {
        &self.host
    }

    /// Concretizer over the configured repositories, compilers and host
    pub fn concretizer(&self) -> Concretizer<'_> {
        Concretizer::new(&self.repo, self.compilers.clone(), self.host.clone())
            .with_options(self.config.concretizer_options())
    }

    pub fn installer(&self) -> Installer<'_> {
        Installer::new(&self.db, &self.layout)
    }

    pub fn reconciler<'a>(&'a self, detector: &'a dyn ChangeDetector) -> Reconciler<'a> {
        Reconciler::new(&self.db, detector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use crate::installer::InstallOutcome;
    use crate::layout::PathScheme;
    use crate::repository::{PackageManifest, Repository};
    use crate::spec::Spec;
    use std::fs;
    use tempfile::TempDir;

    fn zlib_repo(root: &Path) {
        Repository::write_manifests(
            &root.join(config::DEFAULT_REPO_DIR),
            &[PackageManifest::new("zlib")
                .versions(["1.2.11", "1.2.13"])
                .bool_variant("shared", true)],
        )
        .unwrap();
    }

    #[test]
    fn test_open_reads_config_and_repo() {
        let tmp = TempDir::new().unwrap();
        zlib_repo(tmp.path());
        fs::write(
            tmp.path().join(CONFIG_FILE),
            "[layout]\nscheme = \"v1\"\n[concretizer]\nhost = \"linux-ubuntu22.04-x86_64\"\n",
        )
        .unwrap();

        let ctx = Context::open(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(ctx.layout().scheme(), PathScheme::V1);
        assert_eq!(ctx.host().to_string(), "linux-ubuntu22.04-x86_64");

        let spec = ctx
            .concretizer()
            .concretize(&Spec::parse("zlib@1.2: +shared").unwrap())
            .unwrap();
        assert_eq!(
            spec.to_string(),
            "zlib@1.2.13 +shared %gcc@12.2.0 arch=linux-ubuntu22.04-x86_64"
        );
    }

    #[test]
    fn test_missing_repo_dir_is_empty_repo() {
        let tmp = TempDir::new().unwrap();
        let ctx = Context::open(Some(tmp.path().to_path_buf())).unwrap();
        assert!(ctx.concretizer().concretize(&Spec::parse("zlib").unwrap()).is_err());
    }

    #[test]
    fn test_upstream_chain_from_config() {
        let tmp = TempDir::new().unwrap();
        let site = tmp.path().join("site");
        let user = tmp.path().join("user");
        zlib_repo(&site);
        zlib_repo(&user);
        fs::write(
            site.join(CONFIG_FILE),
            "[concretizer]\nhost = \"linux-ubuntu22.04-x86_64\"\n",
        )
        .unwrap();
        fs::write(
            user.join(CONFIG_FILE),
            format!(
                "upstreams = [\"{}\"]\n[concretizer]\nhost = \"linux-ubuntu22.04-x86_64\"\n",
                site.display()
            ),
        )
        .unwrap();

        let site_ctx = Context::open(Some(site.clone())).unwrap();
        let zlib = site_ctx
            .concretizer()
            .concretize(&Spec::parse("zlib").unwrap())
            .unwrap();
        site_ctx
            .installer()
            .install(&zlib, true, &crate::installer::PhaseLogBuilder::new(site_ctx.repo()))
            .unwrap();

        let user_ctx = Context::open(Some(user)).unwrap();
        assert!(!user_ctx.db().is_read_only());
        let report = user_ctx
            .installer()
            .install(&zlib, true, &crate::installer::PhaseLogBuilder::new(user_ctx.repo()))
            .unwrap();
        assert_eq!(report.outcome(zlib.hash()), Some(InstallOutcome::Upstream));
        assert!(report.root_prefix().unwrap().starts_with(&site));
    }
}
