// tests/environment.rs

//! Environment workflow on an on-disk install root: manifest, lockfile,
//! install and change detection for develop checkouts.

mod common;

use common::HOST;
use sprig::config::{CONFIG_FILE, DEFAULT_REPO_DIR};
use sprig::context::Context;
use sprig::environment::{
    Environment, MtimeDetector, StaleReason, LOCKFILE_FILE, MANIFEST_FILE,
};
use sprig::installer::{InstallOutcome, PhaseLogBuilder};
use sprig::repository::{PackageManifest, Repository};
use sprig::spec::DepType;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

struct Workspace {
    _tmp: TempDir,
    ctx: Context,
    env_dir: std::path::PathBuf,
    source: std::path::PathBuf,
}

fn workspace() -> Workspace {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("root");
    let link = &[DepType::Build, DepType::Link][..];
    Repository::write_manifests(
        &root.join(DEFAULT_REPO_DIR),
        &[
            PackageManifest::new("zlib")
                .versions(["1.2.11", "1.2.13"])
                .bool_variant("shared", true),
            PackageManifest::new("libpng")
                .versions(["1.6.39"])
                .depends_on("zlib", link, None),
            PackageManifest::new("app")
                .versions(["1.0"])
                .depends_on("libpng", link, None),
        ],
    )
    .unwrap();
    fs::write(
        root.join(CONFIG_FILE),
        format!("[concretizer]\nhost = \"{HOST}\"\n"),
    )
    .unwrap();

    let source = tmp.path().join("src").join("zlib");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("zlib.c"), "int deflate(void);\n").unwrap();

    let env_dir = tmp.path().join("env");
    fs::create_dir_all(&env_dir).unwrap();
    fs::write(
        env_dir.join(MANIFEST_FILE),
        "specs = [\"app\", \"zlib@1.2:\"]\n\n[[develop]]\nname = \"zlib\"\npath = \"../src/zlib\"\n",
    )
    .unwrap();

    let ctx = Context::open(Some(root)).unwrap();
    Workspace {
        _tmp: tmp,
        ctx,
        env_dir,
        source,
    }
}

fn install_all(ws: &Workspace, env: &mut Environment) -> usize {
    let builder = PhaseLogBuilder::new(ws.ctx.repo());
    let mut built = 0;
    for (_, spec) in env.concrete_roots().unwrap() {
        built += ws.ctx.installer().install(&spec, true, &builder).unwrap().built();
        env.record_install(&spec, &MtimeDetector).unwrap();
    }
    built
}

fn reasons_for<'r>(report: &'r sprig::environment::ReconcileReport, name: &str) -> Vec<&'r StaleReason> {
    report
        .stale
        .iter()
        .filter(|s| s.name == name)
        .flat_map(|s| s.reasons.iter())
        .collect()
}

#[test]
fn test_concretize_writes_shared_lockfile() {
    let ws = workspace();
    let mut env = Environment::open(&ws.env_dir).unwrap();
    let roots = env.concretize(ws.ctx.concretizer()).unwrap();
    assert!(ws.env_dir.join(LOCKFILE_FILE).is_file());

    // Unified: app's zlib is the zlib root, and it carries the checkout path
    let app = &roots[0].1;
    let zlib = &roots[1].1;
    assert_eq!(app.find("zlib").unwrap().hash(), zlib.hash());
    let expected = fs::canonicalize(&ws.source).unwrap();
    assert_eq!(
        fs::canonicalize(Path::new(zlib.dev_path().unwrap())).unwrap(),
        expected
    );

    // Reopening rebuilds the same DAGs from the lockfile
    let reopened = Environment::open(&ws.env_dir).unwrap();
    let locked = reopened.concrete_roots().unwrap();
    assert_eq!(locked.len(), 2);
    assert_eq!(locked[0].1.hash(), app.hash());
    assert_eq!(locked[0].0.abstract_spec, "app");
    assert!(std::sync::Arc::ptr_eq(&locked[0].1.find("zlib").unwrap(), &locked[1].1));
}

#[test]
fn test_source_change_marks_dependents_until_rebuilt() {
    let ws = workspace();
    let mut env = Environment::open(&ws.env_dir).unwrap();
    env.concretize(ws.ctx.concretizer()).unwrap();
    assert_eq!(install_all(&ws, &mut env), 3);

    let report = ws.ctx.reconciler(&MtimeDetector).reconcile(&env).unwrap();
    assert!(report.is_clean(), "unexpected stale specs: {:?}", report.stale);

    fs::write(ws.source.join("inflate.c"), "int inflate(void);\n").unwrap();
    let mut env = Environment::open(&ws.env_dir).unwrap();
    let report = ws.ctx.reconciler(&MtimeDetector).reconcile(&env).unwrap();
    assert!(matches!(
        reasons_for(&report, "zlib")[..],
        [StaleReason::SourceChanged { .. }, ..]
    ));
    assert_eq!(
        reasons_for(&report, "libpng")[0],
        &StaleReason::DependencyStale {
            dependency: "zlib".to_string()
        }
    );
    assert_eq!(
        reasons_for(&report, "app")[0],
        &StaleReason::DependencyStale {
            dependency: "libpng".to_string()
        }
    );

    // Rebuild: dependents go first, then everything is installed again
    let (_, app) = env.concrete_roots().unwrap().remove(0);
    let installer = ws.ctx.installer();
    for name in ["app", "libpng", "zlib"] {
        installer.uninstall(app.find(name).unwrap().hash()).unwrap();
    }
    assert_eq!(install_all(&ws, &mut env), 3);

    let report = ws.ctx.reconciler(&MtimeDetector).reconcile(&env).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.valid.len(), 4);
}

#[test]
fn test_manifest_edits_are_reported() {
    let ws = workspace();
    let mut env = Environment::open(&ws.env_dir).unwrap();
    env.concretize(ws.ctx.concretizer()).unwrap();
    install_all(&ws, &mut env);

    // Drop the develop entry and the zlib root, add a new root
    fs::write(
        ws.env_dir.join(MANIFEST_FILE),
        "specs = [\"app\", \"libpng\"]\n",
    )
    .unwrap();
    let mut env = Environment::open(&ws.env_dir).unwrap();
    let report = ws.ctx.reconciler(&MtimeDetector).reconcile(&env).unwrap();

    // The locked app DAG still builds zlib from the checkout
    assert!(reasons_for(&report, "libpng").contains(&&StaleReason::NotConcretized));
    assert!(reasons_for(&report, "app").contains(&&StaleReason::DevelopChanged {
        package: "zlib".to_string()
    }));
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.removed[0].abstract_spec, "zlib@1.2:");

    // Concretizing again drops the checkout: a regular zlib is built
    env.concretize(ws.ctx.concretizer()).unwrap();
    let builder = PhaseLogBuilder::new(ws.ctx.repo());
    let (_, app) = env.concrete_roots().unwrap().remove(0);
    assert!(app.find("zlib").unwrap().dev_path().is_none());
    let report = ws.ctx.installer().install(&app, true, &builder).unwrap();
    assert_eq!(
        report.outcome(app.find("zlib").unwrap().hash()),
        Some(InstallOutcome::Built)
    );
}
