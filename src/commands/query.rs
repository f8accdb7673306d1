// src/commands/query.rs
//! Database queries and maintenance

use super::parse_spec;
use anyhow::Result;
use sprig::context::Context;
use sprig::spec::Spec;

pub fn cmd_find(ctx: &Context, words: &[String], long: bool, explicit_only: bool) -> Result<()> {
    let query = if words.is_empty() {
        Spec::default()
    } else {
        parse_spec(words)?
    };
    let mut found = ctx.db().find(&query)?;
    if explicit_only {
        let mut kept = Vec::with_capacity(found.len());
        for spec in found {
            if ctx.db().query(spec.hash())?.is_some_and(|r| r.explicit) {
                kept.push(spec);
            }
        }
        found = kept;
    }

    if found.is_empty() {
        println!("No installed specs found.");
        return Ok(());
    }
    found.sort_by(|a, b| a.name().cmp(b.name()).then(b.version().cmp(a.version())));

    for spec in &found {
        if long {
            let prefix = ctx
                .db()
                .locate(spec.hash())?
                .map(|l| l.prefix.display().to_string())
                .unwrap_or_default();
            println!("{}  {}  {}", spec.hash().short(), spec.format_node(), prefix);
        } else {
            println!("{}@{}", spec.name(), spec.version());
        }
    }
    println!("\nTotal: {} spec(s)", found.len());
    Ok(())
}

pub fn cmd_reindex(ctx: &Context) -> Result<()> {
    let count = ctx.db().reindex(ctx.layout())?;
    println!("Reindexed {} installed spec(s) under {}", count, ctx.root().display());
    Ok(())
}

pub fn cmd_verify(ctx: &Context) -> Result<()> {
    let report = ctx.db().check_integrity()?;
    if report.is_ok() {
        println!("Database is consistent.");
        return Ok(());
    }
    for mismatch in &report.ref_counts {
        println!(
            "ref count of {} is {}, expected {}",
            mismatch.hash, mismatch.recorded, mismatch.expected
        );
    }
    for (hash, dep) in &report.dangling {
        println!("{} depends on unknown {}", hash, dep);
    }
    anyhow::bail!(
        "{} problem(s) found; `sprig reindex` rebuilds the database from disk",
        report.ref_counts.len() + report.dangling.len()
    )
}
