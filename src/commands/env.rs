// src/commands/env.rs
//! Environment commands

use anyhow::{Context as _, Result};
use sprig::context::Context;
use sprig::environment::{DetectorKind, EnvManifest, Environment};
use sprig::installer::PhaseLogBuilder;
use std::path::Path;

pub fn cmd_env_create(dir: &Path, specs: &[String]) -> Result<()> {
    let manifest = EnvManifest {
        specs: specs.to_vec(),
        ..Default::default()
    };
    Environment::create(dir, manifest)?;
    println!("Created environment in {}", dir.display());
    Ok(())
}

pub fn cmd_env_concretize(ctx: &Context, dir: &Path) -> Result<()> {
    let mut env = Environment::open(dir)?;
    let roots = env
        .concretize(ctx.concretizer())
        .with_context(|| format!("Failed to concretize environment {}", dir.display()))?;
    for (text, spec) in &roots {
        println!("==> {}", text);
        print!("{}", spec.tree());
    }
    println!("\nWrote {}", env.lockfile_path().display());
    Ok(())
}

pub fn cmd_env_install(ctx: &Context, dir: &Path) -> Result<()> {
    let mut env = Environment::open(dir)?;
    if env.lockfile().is_none() {
        env.concretize(ctx.concretizer())?;
    }
    let detector = ctx.config().environment.detector.detector();
    let builder = PhaseLogBuilder::new(ctx.repo());
    for (root, spec) in env.concrete_roots()? {
        let report = ctx.installer().install(&spec, true, &builder)?;
        env.record_install(&spec, detector.as_ref())?;
        println!(
            "{}: {} built, {} already present",
            root.abstract_spec,
            report.built(),
            report.nodes.len() - report.built()
        );
    }
    Ok(())
}

pub fn cmd_env_status(ctx: &Context, dir: &Path, detector: Option<DetectorKind>) -> Result<()> {
    let env = Environment::open(dir)?;
    let kind = detector.unwrap_or(ctx.config().environment.detector);
    let detector = kind.detector();
    let report = ctx.reconciler(detector.as_ref()).reconcile(&env)?;

    if report.is_clean() {
        println!("Environment is up to date ({} spec(s)).", report.valid.len());
        return Ok(());
    }
    for status in &report.stale {
        let hash = status
            .hash
            .as_ref()
            .map(|h| format!("/{}", h.short()))
            .unwrap_or_else(|| "/-".to_string());
        let reasons: Vec<String> = status.reasons.iter().map(|r| r.to_string()).collect();
        println!("  {} {} ({}): {}", status.name, hash, status.root, reasons.join(", "));
    }
    for root in &report.removed {
        println!("  {} /{}: no longer in the manifest", root.abstract_spec, root.hash.short());
    }
    println!(
        "\n{} stale, {} up to date",
        report.stale.len(),
        report.valid.len()
    );
    Ok(())
}
