// src/config.rs

//! Configuration
//!
//! Settings live in `<root>/sprig.toml`. The root itself comes from the
//! `SPRIG_ROOT` environment variable, falling back to `~/.sprig`. Every
//! setting has a default, so a missing file is the same as an empty one.
//!
//! ```toml
//! upstreams = ["/opt/site/sprig"]
//! repos = ["/opt/site/packages"]
//!
//! [layout]
//! scheme = "v2"
//!
//! [locks]
//! db_timeout_secs = 120
//!
//! [concretizer]
//! unify = true
//! compilers = ["gcc@12.2.0", "clang@15.0.0"]
//! host = "linux-ubuntu22.04-x86_64"
//! ```

use crate::arch::Architecture;
use crate::compiler::Compiler;
use crate::concretize::{ConcretizerOptions, DEFAULT_MAX_STEPS};
use crate::db::DatabaseOptions;
use crate::environment::DetectorKind;
use crate::error::{Error, Result};
use crate::layout::PathScheme;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE: &str = "sprig.toml";
/// Environment variable naming the install root
pub const ROOT_ENV: &str = "SPRIG_ROOT";
/// Package repository looked up under the root when none are configured
pub const DEFAULT_REPO_DIR: &str = "repo";

/// Install root from `SPRIG_ROOT`, else `~/.sprig`
pub fn default_root() -> Result<PathBuf> {
    if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    dirs::home_dir()
        .map(|home| home.join(".sprig"))
        .ok_or_else(|| {
            Error::ConfigError(format!(
                "cannot find a home directory; set {} to choose an install root",
                ROOT_ENV
            ))
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub scheme: PathScheme,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub db_timeout_secs: u64,
    pub package_timeout_secs: u64,
    /// Age after which a lock held from another host is considered abandoned
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        let defaults = DatabaseOptions::default();
        Self {
            db_timeout_secs: defaults.lock_timeout.as_secs(),
            package_timeout_secs: defaults.package_lock_timeout.as_secs(),
            stale_after_secs: defaults.stale_after.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcretizerConfig {
    pub unify: bool,
    /// Available compilers, most preferred first
    pub compilers: Vec<String>,
    /// Overrides the detected `platform-os-target`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub max_steps: usize,
}

impl Default for ConcretizerConfig {
    fn default() -> Self {
        Self {
            unify: true,
            compilers: vec!["gcc@12.2.0".to_string()],
            host: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub detector: DetectorKind,
}

/// Contents of `sprig.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Read-only install trees consulted before building, nearest first
    pub upstreams: Vec<PathBuf>,
    /// Package repositories, highest priority first
    pub repos: Vec<PathBuf>,
    pub layout: LayoutConfig,
    pub locks: LockConfig,
    pub concretizer: ConcretizerConfig,
    pub environment: EnvironmentConfig,
}

impl Config {
    /// Read `<root>/sprig.toml`, or defaults when it does not exist
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::io_at(&path, e))?;
        Self::parse(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.concretizer.compilers.is_empty() {
            return Err(Error::ConfigError(
                "concretizer.compilers must list at least one compiler".to_string(),
            ));
        }
        self.compilers()?;
        self.host()?;
        if self.locks.db_timeout_secs == 0 || self.locks.package_timeout_secs == 0 {
            return Err(Error::ConfigError("lock timeouts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn compilers(&self) -> Result<Vec<Compiler>> {
        self.concretizer
            .compilers
            .iter()
            .map(|c| Compiler::parse(c))
            .collect()
    }

    /// Configured host, or the machine we are running on
    pub fn host(&self) -> Result<Architecture> {
        match &self.concretizer.host {
            Some(text) => Architecture::parse(text),
            None => Ok(Architecture::detect()),
        }
    }

    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            lock_timeout: Duration::from_secs(self.locks.db_timeout_secs),
            package_lock_timeout: Duration::from_secs(self.locks.package_timeout_secs),
            stale_after: Duration::from_secs(self.locks.stale_after_secs),
        }
    }

    pub fn concretizer_options(&self) -> ConcretizerOptions {
        ConcretizerOptions {
            unify: self.concretizer.unify,
            max_steps: self.concretizer.max_steps,
            ..Default::default()
        }
    }

    /// Repository directories, defaulting to `<root>/repo`
    pub fn repo_dirs(&self, root: &Path) -> Vec<PathBuf> {
        if self.repos.is_empty() {
            vec![root.join(DEFAULT_REPO_DIR)]
        } else {
            self.repos.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.layout.scheme, PathScheme::V2);
        assert_eq!(config.locks.db_timeout_secs, 120);
        assert_eq!(config.locks.package_timeout_secs, 600);
        assert_eq!(config.locks.stale_after_secs, 3600);
        assert!(config.concretizer.unify);
        assert_eq!(config.compilers().unwrap()[0].to_string(), "gcc@12.2.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
            upstreams = ["/opt/site/sprig"]

            [layout]
            scheme = "v1"

            [concretizer]
            unify = false
            compilers = ["clang@15.0.0", "gcc@12.2.0"]
            host = "linux-rhel8-zen2"
            "#,
        )
        .unwrap();
        assert_eq!(config.upstreams, vec![PathBuf::from("/opt/site/sprig")]);
        assert_eq!(config.layout.scheme, PathScheme::V1);
        assert!(!config.concretizer_options().unify);
        assert_eq!(config.compilers().unwrap().len(), 2);
        assert_eq!(config.host().unwrap().to_string(), "linux-rhel8-zen2");
        // untouched sections keep their defaults
        assert_eq!(config.locks, LockConfig::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Config::parse("[concretizer]\ncompilers = []"),
            Err(Error::ConfigError(_))
        ));
        assert!(Config::parse("[concretizer]\nhost = \"linux\"").is_err());
        assert!(Config::parse("[locks]\ndb_timeout_secs = 0").is_err());
        assert!(Config::parse("[layout]\nscheme = \"v9\"").is_err());
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(Config::load(tmp.path()).unwrap(), Config::default());
    }

    #[test]
    fn test_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.locks.stale_after_secs = 60;
        config.environment.detector = DetectorKind::Git;
        fs::write(tmp.path().join(CONFIG_FILE), config.to_toml().unwrap()).unwrap();
        assert_eq!(Config::load(tmp.path()).unwrap(), config);
        assert_eq!(
            config.database_options().stale_after,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_repo_dirs_default_under_root() {
        let config = Config::default();
        assert_eq!(
            config.repo_dirs(Path::new("/opt/sprig")),
            vec![PathBuf::from("/opt/sprig/repo")]
        );
    }
}
