// src/lib.rs

//! sprig: spec concretization and installation tracking
//!
//! Resolves abstract package specs into fully decided dependency DAGs and
//! keeps track of what is installed where.
//!
//! # Architecture
//!
//! - Specs: abstract constraints parse into [`spec::Spec`]; concretization
//!   yields shared [`spec::ConcreteSpec`] DAGs identified by content hash
//! - Concretizer: explicit choice-point search with snapshot/restore over
//!   a [`repository::PackageRepository`]
//! - Layout: hash to install prefix through versioned path schemes
//! - Database: JSON index with reference counts, guarded by file locks and
//!   chained to read-only upstream databases
//! - Environments: manifest, lockfile and change detection for development
//!   checkouts

pub mod arch;
pub mod compiler;
pub mod concretize;
pub mod config;
pub mod context;
pub mod db;
pub mod environment;
mod error;
pub mod installer;
pub mod layout;
pub mod lock;
pub mod repository;
pub mod spec;
pub mod variant;
pub mod version;

pub use concretize::{ConcretizationError, Concretizer, ConcretizerOptions};
pub use context::Context;
pub use db::Database;
pub use error::{Error, Result};
pub use layout::{DirectoryLayout, PathScheme};
pub use spec::{ConcreteSpec, Spec, SpecHash};
