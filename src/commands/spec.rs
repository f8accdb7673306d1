// src/commands/spec.rs
//! Showing concretized specs

use super::parse_spec;
use anyhow::Result;
use sprig::context::Context;
use std::collections::HashSet;

pub fn cmd_spec(ctx: &Context, words: &[String], json: bool) -> Result<()> {
    let spec = parse_spec(words)?;
    let concrete = ctx.concretizer().concretize(&spec)?;

    if json {
        println!("{}", concrete.to_json()?);
        return Ok(());
    }

    println!("Input spec");
    println!("--------------------------------");
    println!("{}", spec);
    println!();
    println!("Concretized");
    println!("--------------------------------");
    let mut installed = HashSet::new();
    for node in concrete.traverse() {
        if ctx.db().locate(node.hash())?.is_some() {
            installed.insert(node.hash().short().to_string());
        }
    }
    for line in concrete.tree().lines() {
        let hash = line.split_whitespace().next().unwrap_or_default();
        let installed = installed.contains(hash);
        let marker = if installed { "[+]" } else { " - " };
        println!("{} {}", marker, line);
    }
    Ok(())
}
