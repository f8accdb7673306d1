// src/cli/mod.rs
//! CLI definitions for sprig
//!
//! This module contains the command-line interface definitions using clap.
//! The implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

mod env;

pub use env::EnvCommands;

#[derive(Parser)]
#[command(name = "sprig")]
#[command(author = "Sprig Contributors")]
#[command(version)]
#[command(about = "Concretize, install and track source-built packages", long_about = None)]
pub struct Cli {
    /// Install root (default: $SPRIG_ROOT, then ~/.sprig)
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Concretize a spec and show the result
    Spec {
        /// Abstract spec, e.g. `zlib@1.2: +shared`
        #[arg(required = true)]
        spec: Vec<String>,

        /// Print the spec file JSON instead of a tree
        #[arg(long)]
        json: bool,
    },

    /// Concretize and install a spec with its dependencies
    Install {
        #[arg(required = true)]
        spec: Vec<String>,

        /// Show what would be built without building
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove an installed spec by hash (a unique prefix is enough)
    Uninstall {
        hash: String,
    },

    /// List installed specs, optionally matching a spec
    Find {
        spec: Vec<String>,

        /// Show hashes and prefixes
        #[arg(short, long)]
        long: bool,

        /// Only specs installed on request
        #[arg(long)]
        explicit: bool,
    },

    /// Remove implicit installs nothing explicit needs
    Gc {
        #[arg(long)]
        dry_run: bool,
    },

    /// Rebuild the install database from prefix metadata
    Reindex,

    /// Check reference counts and dependency records
    Verify,

    /// Environment management
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::collections::BTreeSet;

    /// Every string literal following `marker` in `text`
    fn literals_after(text: &str, marker: &str) -> BTreeSet<String> {
        text.split(marker)
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .map(str::to_string)
            .collect()
    }

    fn collect(cmd: &clap::Command, names: &mut BTreeSet<String>, longs: &mut BTreeSet<String>) {
        names.insert(cmd.get_name().to_string());
        for arg in cmd.get_arguments() {
            if let Some(long) = arg.get_long()
                && long != "help"
                && long != "version"
            {
                longs.insert(long.to_string());
            }
        }
        for sub in cmd.get_subcommands() {
            collect(sub, names, longs);
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_man_page_tree_matches_cli() {
        let build_rs = include_str!("../../build.rs");
        let mut names = BTreeSet::new();
        let mut longs = BTreeSet::new();
        collect(&Cli::command(), &mut names, &mut longs);

        assert_eq!(literals_after(build_rs, "Command::new(\""), names);
        assert_eq!(literals_after(build_rs, ".long(\""), longs);
    }
}
