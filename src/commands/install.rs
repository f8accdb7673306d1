// src/commands/install.rs
//! Install, uninstall and garbage collection

use super::{parse_spec, resolve_hash};
use anyhow::{Context as _, Result};
use sprig::context::Context;
use sprig::installer::{InstallOutcome, PhaseLogBuilder};
use tracing::info;

pub fn cmd_install(ctx: &Context, words: &[String], dry_run: bool) -> Result<()> {
    let spec = parse_spec(words)?;
    let concrete = ctx.concretizer().concretize(&spec)?;

    if dry_run {
        println!("Would install {}:", concrete.format_node());
        for node in concrete.traverse() {
            let state = match ctx.db().locate(node.hash())? {
                Some(loc) if loc.upstream => "upstream",
                Some(_) => "installed",
                None => "build",
            };
            println!("  [{:>9}] {} /{}", state, node.name(), node.hash().short());
        }
        return Ok(());
    }

    let builder = PhaseLogBuilder::new(ctx.repo());
    let report = ctx
        .installer()
        .install(&concrete, true, &builder)
        .with_context(|| format!("Failed to install {}", concrete.format_node()))?;

    for node in &report.nodes {
        let verb = match node.outcome {
            InstallOutcome::Built => "Installed",
            InstallOutcome::AlreadyInstalled => "Already installed",
            InstallOutcome::Upstream => "From upstream",
        };
        println!("{}: {} /{}", verb, node.spec.name(), node.spec.hash().short());
        println!("    {}", node.prefix.display());
    }
    println!(
        "\n{} built, {} already present",
        report.built(),
        report.nodes.len() - report.built()
    );
    Ok(())
}

pub fn cmd_uninstall(ctx: &Context, hash: &str) -> Result<()> {
    let hash = resolve_hash(ctx, hash)?;
    let record = ctx
        .db()
        .query_local(&hash)?
        .with_context(|| format!("{} is not installed locally", hash))?;
    ctx.installer().uninstall(&hash)?;
    println!("Removed {} /{}", record.name(), hash.short());
    Ok(())
}

pub fn cmd_gc(ctx: &Context, dry_run: bool) -> Result<()> {
    let unused = ctx.db().unused_specs()?;
    if unused.is_empty() {
        println!("Nothing to remove.");
        return Ok(());
    }

    for hash in &unused {
        let name = ctx
            .db()
            .query_local(hash)?
            .map(|r| r.name().to_string())
            .unwrap_or_default();
        if dry_run {
            println!("Would remove {} /{}", name, hash.short());
            continue;
        }
        ctx.installer().uninstall(hash)?;
        println!("Removed {} /{}", name, hash.short());
    }
    info!("Garbage collection finished: {} spec(s)", unused.len());
    Ok(())
}
