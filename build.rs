// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Words making up a spec, e.g. `zlib@1.2: +shared`
fn spec_arg(required: bool) -> Arg {
    Arg::new("spec")
        .num_args(1..)
        .required(required)
        .help("Abstract spec")
}

/// Environment directory, defaulting to the current one
fn env_dir_arg() -> Arg {
    Arg::new("dir").default_value(".").help("Environment directory")
}

/// Mirror of the derive definitions in `src/cli/`; a test there checks
/// that subcommand names and long flags stay in step
fn build_cli() -> Command {
    Command::new("sprig")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Sprig Contributors")
        .about("Concretize, install and track source-built packages")
        .subcommand_required(true)
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .global(true)
                .help("Install root (default: $SPRIG_ROOT, then ~/.sprig)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .subcommand(
            Command::new("spec")
                .about("Concretize a spec and show the result")
                .arg(spec_arg(true))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the spec file JSON instead of a tree"),
                ),
        )
        .subcommand(
            Command::new("install")
                .about("Concretize and install a spec with its dependencies")
                .arg(spec_arg(true))
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Show what would be built without building"),
                ),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Remove an installed spec by hash (a unique prefix is enough)")
                .arg(Arg::new("hash").required(true)),
        )
        .subcommand(
            Command::new("find")
                .about("List installed specs, optionally matching a spec")
                .arg(spec_arg(false))
                .arg(
                    Arg::new("long")
                        .short('l')
                        .long("long")
                        .action(ArgAction::SetTrue)
                        .help("Show hashes and prefixes"),
                )
                .arg(
                    Arg::new("explicit")
                        .long("explicit")
                        .action(ArgAction::SetTrue)
                        .help("Only specs installed on request"),
                ),
        )
        .subcommand(
            Command::new("gc")
                .about("Remove implicit installs nothing explicit needs")
                .arg(Arg::new("dry_run").long("dry-run").action(ArgAction::SetTrue)),
        )
        .subcommand(Command::new("reindex").about("Rebuild the install database from prefix metadata"))
        .subcommand(Command::new("verify").about("Check reference counts and dependency records"))
        .subcommand(
            Command::new("env")
                .about("Environment management")
                .subcommand_required(true)
                .subcommand(
                    Command::new("create")
                        .about("Create an environment manifest")
                        .arg(Arg::new("dir").required(true))
                        .arg(Arg::new("specs").num_args(0..)),
                )
                .subcommand(
                    Command::new("concretize")
                        .about("Concretize the environment and write its lockfile")
                        .arg(env_dir_arg()),
                )
                .subcommand(
                    Command::new("install")
                        .about("Install every locked root")
                        .arg(env_dir_arg()),
                )
                .subcommand(
                    Command::new("status")
                        .about("Show which specs need concretizing, building or rebuilding")
                        .arg(env_dir_arg())
                        .arg(
                            Arg::new("detector")
                                .long("detector")
                                .value_parser(["mtime", "git"])
                                .help("How development checkouts are compared"),
                        ),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true)),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("sprig.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
