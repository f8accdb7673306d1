// src/commands/mod.rs
//! Command handlers for the sprig CLI

mod env;
mod install;
mod query;
mod spec;

pub use env::{cmd_env_concretize, cmd_env_create, cmd_env_install, cmd_env_status};
pub use install::{cmd_gc, cmd_install, cmd_uninstall};
pub use query::{cmd_find, cmd_reindex, cmd_verify};
pub use spec::cmd_spec;

use anyhow::{Result, bail};
use sprig::context::Context;
use sprig::spec::{Spec, SpecHash};

/// Join command-line words into one spec
pub(crate) fn parse_spec(words: &[String]) -> Result<Spec> {
    Ok(Spec::parse(&words.join(" "))?)
}

/// Resolve a full hash or unique hash prefix among local installs
pub(crate) fn resolve_hash(ctx: &Context, prefix: &str) -> Result<SpecHash> {
    let prefix = prefix.trim_start_matches('/');
    let matches: Vec<SpecHash> = ctx
        .db()
        .records()?
        .into_keys()
        .filter(|h| h.starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [hash] => Ok(hash.clone()),
        [] => bail!("No installed spec matches hash '{}'", prefix),
        _ => bail!(
            "Hash '{}' is ambiguous: matches {} installed specs",
            prefix,
            matches.len()
        ),
    }
}
