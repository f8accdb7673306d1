// src/error.rs

//! Error types for sprig
//!
//! Every fallible operation in the library returns [`Result`], whose error
//! side is the crate-wide [`Error`] enum. The CLI wraps these in `anyhow`.

use crate::concretize::ConcretizationError;
use crate::lock::LockKind;
use crate::spec::SpecHash;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while concretizing, installing or tracking specs
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed textual spec, version or variant
    #[error("parse error: {0}")]
    ParseError(String),

    /// No assignment satisfies the requested specs
    #[error(transparent)]
    Concretization(#[from] ConcretizationError),

    /// Record already present and installed (locally or in an upstream)
    #[error("{hash} is already installed at {}", .prefix.display())]
    AlreadyInstalled {
        hash: SpecHash,
        prefix: PathBuf,
        upstream: bool,
    },

    /// Adding a record whose dependency has no record anywhere in the chain
    #[error("cannot record {hash}: dependency {dependency} is not in the database or its upstreams")]
    DanglingDependency {
        hash: SpecHash,
        dependency: SpecHash,
    },

    /// Removing a record that installed specs still depend on
    #[error("cannot remove {hash}: still required by {ref_count} installed spec(s)")]
    StillReferenced { hash: SpecHash, ref_count: u32 },

    /// No local record for the hash
    #[error("{0} is not installed")]
    NotInstalled(SpecHash),

    /// Install prefix already occupied by something else
    #[error("install prefix {} already holds {existing}, refusing to reuse it for {requested}", .path.display())]
    PathCollision {
        path: PathBuf,
        existing: String,
        requested: SpecHash,
    },

    /// Lock could not be acquired within its timeout
    #[error(
        "timed out after {waited:.1?} waiting for {kind} lock on {} ({attempts} attempts){}",
        .path.display(),
        holder_suffix(.holder)
    )]
    LockTimeout {
        kind: LockKind,
        path: PathBuf,
        waited: Duration,
        attempts: u32,
        holder: Option<String>,
    },

    /// Index could not be parsed or violates its own invariants
    #[error("install database {} is corrupt: {reason}", .path.display())]
    CorruptDatabase { path: PathBuf, reason: String },

    /// Mutation requested on a database opened as an upstream
    #[error("install database at {} is read-only", .root.display())]
    ReadOnlyDatabase { root: PathBuf },

    /// Index written by an incompatible version
    #[error("install database version mismatch: expected {expected}, found {found}")]
    InvalidDatabaseVersion { expected: u32, found: String },

    /// Package descriptor failed validation
    #[error("invalid package descriptor for {package}: {reason}")]
    InvalidDescriptor { package: String, reason: String },

    /// Package name not known to any repository
    #[error("unknown package: {0}")]
    UnknownPackage(String),

    /// Operation needs a concrete spec but got an abstract one
    #[error("spec is not concrete: {0}")]
    NotConcrete(String),

    /// Invalid configuration file or value
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Environment manifest or lockfile problem
    #[error("environment error: {0}")]
    EnvironmentError(String),

    /// Builder reported a failure for a spec
    #[error("build of {spec} failed: {reason}")]
    BuildError { spec: String, reason: String },

    /// IO error with context
    #[error("IO error: {0}")]
    IoError(String),

    /// IO error without extra context
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn holder_suffix(holder: &Option<String>) -> String {
    match holder {
        Some(h) => format!(", held by {}", h),
        None => String::new(),
    }
}

impl Error {
    /// True for the "someone else already installed this" outcome
    pub fn is_already_installed(&self) -> bool {
        matches!(self, Error::AlreadyInstalled { .. })
    }

    /// True for failures worth retrying later, such as lock timeouts
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }

    /// Wrap an IO error with the path it happened on
    pub fn io_at(path: &std::path::Path, err: std::io::Error) -> Self {
        Error::IoError(format!("{}: {}", path.display(), err))
    }
}
