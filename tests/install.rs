// tests/install.rs

//! Installation, reference counting and cross-process locking.

mod common;

use common::{chain_abc, concretize, fast_options, fixture_repo, CountingBuilder, Store};
use sprig::db::InstallRecord;
use sprig::installer::{InstallOutcome, Installer};
use sprig::{Database, DirectoryLayout, Error, PathScheme};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_concurrent_installs_build_each_hash_once() {
    let repo = fixture_repo();
    let app = concretize(&repo, "app");
    let nodes = app.traverse().len();

    let store = Store::new();
    let builder = CountingBuilder::slow(Duration::from_millis(50));
    let start = Barrier::new(3);

    thread::scope(|s| {
        for _ in 0..3 {
            let (layout, db) = store.reopen();
            let (app, builder, start) = (&app, &builder, &start);
            s.spawn(move || {
                start.wait();
                let report = Installer::new(&db, &layout).install(app, true, builder).unwrap();
                assert_eq!(report.nodes.len(), nodes);
            });
        }
    });

    assert_eq!(builder.count(), nodes);
    let records = store.db.records().unwrap();
    assert_eq!(records.len(), nodes);
    assert!(store.db.check_integrity().unwrap().is_ok());
    assert!(records[app.hash()].explicit);
}

#[test]
fn test_racing_adds_record_once() {
    let store = Store::new();
    let zlib = concretize(&fixture_repo(), "zlib");
    let prefix = store.layout.create(&zlib).unwrap();
    let start = Barrier::new(2);

    let results: Vec<sprig::Result<InstallRecord>> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (_, db) = store.reopen();
                let (zlib, prefix, start) = (&zlib, &prefix, &start);
                s.spawn(move || {
                    start.wait();
                    db.add(zlib, prefix, true)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::AlreadyInstalled { upstream: false, .. }))));
}

#[test]
fn test_reference_counts_along_a_chain() {
    let store = Store::new();
    let a = chain_abc();
    let b = a.find("b").unwrap();
    let c = a.find("c").unwrap();

    let installer = Installer::new(&store.db, &store.layout);
    installer.install(&a, true, &CountingBuilder::default()).unwrap();

    let ref_count = |hash| store.db.query_local(hash).unwrap().unwrap().ref_count;
    assert_eq!(ref_count(a.hash()), 0);
    assert_eq!(ref_count(b.hash()), 1);
    assert_eq!(ref_count(c.hash()), 1);

    let err = installer.uninstall(b.hash()).unwrap_err();
    assert!(matches!(err, Error::StillReferenced { ref_count: 1, .. }));

    installer.uninstall(a.hash()).unwrap();
    assert_eq!(ref_count(b.hash()), 0);
    assert_eq!(ref_count(c.hash()), 1);
    assert!(!store.layout.path_for(&a).unwrap().exists());

    assert_eq!(store.db.unused_specs().unwrap(), vec![b.hash().clone(), c.hash().clone()]);
    installer.uninstall(b.hash()).unwrap();
    installer.uninstall(c.hash()).unwrap();
    assert!(store.db.records().unwrap().is_empty());
}

#[test]
fn test_reindex_restores_lost_database() {
    let repo = fixture_repo();
    let app = concretize(&repo, "app");
    let store = Store::new();
    Installer::new(&store.db, &store.layout)
        .install(&app, true, &CountingBuilder::default())
        .unwrap();
    let before = store.db.records().unwrap();

    let index = sprig::db::paths::index_path(&store.root);
    std::fs::remove_file(&index).unwrap();
    assert!(store.db.records().unwrap().is_empty());

    let count = store.db.reindex(&store.layout).unwrap();
    assert_eq!(count, before.len());
    let after = store.db.records().unwrap();
    for (hash, record) in &before {
        assert_eq!(after[hash].ref_count, record.ref_count);
    }
    assert!(store.db.check_integrity().unwrap().is_ok());
}

#[test]
fn test_upstream_install_is_reused() {
    let repo = fixture_repo();
    let png = concretize(&repo, "libpng");
    let zlib = png.find("zlib").unwrap();

    // Site-wide store holding zlib
    let site = TempDir::new().unwrap();
    let site_layout = DirectoryLayout::new(site.path(), PathScheme::V1);
    let site_db = Database::open(site.path(), fast_options()).unwrap();
    Installer::new(&site_db, &site_layout)
        .install(&zlib, true, &CountingBuilder::default())
        .unwrap();

    let user = TempDir::new().unwrap();
    let layout = DirectoryLayout::new(user.path(), PathScheme::V2)
        .with_upstream(Database::open_upstream(site.path()));
    let db = Database::open(user.path(), fast_options())
        .unwrap()
        .with_upstream(Database::open_upstream(site.path()));

    let builder = CountingBuilder::default();
    let report = Installer::new(&db, &layout).install(&png, true, &builder).unwrap();
    assert_eq!(builder.count(), 1);
    assert_eq!(report.outcome(zlib.hash()), Some(InstallOutcome::Upstream));
    assert_eq!(report.outcome(png.hash()), Some(InstallOutcome::Built));

    // Local record does not count the upstream edge, and the upstream is untouched
    assert_eq!(db.query_local(zlib.hash()).unwrap(), None);
    assert!(db.check_integrity().unwrap().is_ok());
    assert!(matches!(db.remove(zlib.hash()), Err(Error::ReadOnlyDatabase { .. })));
    assert_eq!(site_db.query_local(zlib.hash()).unwrap().unwrap().ref_count, 0);
}

#[test]
fn test_layout_paths_differ_per_scheme() {
    let zlib = concretize(&fixture_repo(), "zlib");
    let v1 = PathScheme::V1.relative_path(&zlib);
    let v2 = PathScheme::V2.relative_path(&zlib);
    assert_ne!(v1, v2);
    assert!(v1.ends_with(format!("zlib-1.2.13-{}", zlib.hash())));
    assert!(v2.ends_with(format!("zlib-1.2.13-{}", zlib.hash())));
    assert!(v1.starts_with("linux-ubuntu22.04-x86_64/gcc-12.2.0"));
    assert!(v2.starts_with("linux-x86_64"));
}

#[test]
fn test_relocated_upstream_install_is_found_by_record() {
    let repo = fixture_repo();
    let png = concretize(&repo, "libpng");
    let zlib = png.find("zlib").unwrap();

    // The site tree was moved: its record points where no scheme would
    let site = TempDir::new().unwrap();
    let site_db = Database::open(site.path(), fast_options()).unwrap();
    let relocated = site.path().join("relocated").join("zlib");
    std::fs::create_dir_all(&relocated).unwrap();
    site_db.add(&zlib, &relocated, true).unwrap();

    let user = TempDir::new().unwrap();
    let layout = DirectoryLayout::new(user.path(), PathScheme::V2)
        .with_upstream(Database::open_upstream(site.path()));
    let db = Database::open(user.path(), fast_options())
        .unwrap()
        .with_upstream(Database::open_upstream(site.path()));
    assert_eq!(layout.path_for(&zlib).unwrap(), relocated);

    let builder = CountingBuilder::default();
    let report = Installer::new(&db, &layout).install(&png, true, &builder).unwrap();
    assert_eq!(builder.count(), 1);
    assert_eq!(report.outcome(zlib.hash()), Some(InstallOutcome::Upstream));
    assert_eq!(report.nodes[0].prefix, relocated);

    // Reindexing keeps zlib out of the local records
    assert_eq!(db.reindex(&layout).unwrap(), 1);
    assert_eq!(db.query_local(zlib.hash()).unwrap(), None);
    assert_eq!(db.query(zlib.hash()).unwrap().unwrap().path, relocated);
    assert!(db.check_integrity().unwrap().is_ok());
}
