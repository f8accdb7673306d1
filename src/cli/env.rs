// src/cli/env.rs
//! Environment commands

use clap::Subcommand;
use sprig::environment::DetectorKind;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum EnvCommands {
    /// Create an environment manifest
    Create {
        /// Environment directory
        dir: PathBuf,

        /// Root specs, one per argument (quote specs containing spaces)
        specs: Vec<String>,
    },

    /// Concretize the environment and write its lockfile
    Concretize {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Install every locked root
    Install {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Show which specs need concretizing, building or rebuilding
    Status {
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// How development checkouts are compared (default: from config)
        #[arg(long)]
        detector: Option<DetectorKind>,
    },
}
