// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser};
use sprig::context::Context;

mod cli;
mod commands;

use cli::{Cli, Commands, EnvCommands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Commands that need no install root
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "sprig", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Env {
            command: EnvCommands::Create { dir, specs },
        } => return commands::cmd_env_create(dir, specs),
        _ => {}
    }

    let ctx = Context::open(cli.root.clone())?;
    match cli.command {
        Commands::Spec { spec, json } => commands::cmd_spec(&ctx, &spec, json),
        Commands::Install { spec, dry_run } => commands::cmd_install(&ctx, &spec, dry_run),
        Commands::Uninstall { hash } => commands::cmd_uninstall(&ctx, &hash),
        Commands::Find {
            spec,
            long,
            explicit,
        } => commands::cmd_find(&ctx, &spec, long, explicit),
        Commands::Gc { dry_run } => commands::cmd_gc(&ctx, dry_run),
        Commands::Reindex => commands::cmd_reindex(&ctx),
        Commands::Verify => commands::cmd_verify(&ctx),
        Commands::Env { command } => match command {
            EnvCommands::Concretize { dir } => commands::cmd_env_concretize(&ctx, &dir),
            EnvCommands::Install { dir } => commands::cmd_env_install(&ctx, &dir),
            EnvCommands::Status { dir, detector } => commands::cmd_env_status(&ctx, &dir, detector),
            EnvCommands::Create { dir, specs } => commands::cmd_env_create(&dir, &specs),
        },
        Commands::Completions { .. } => Ok(()),
    }
}
