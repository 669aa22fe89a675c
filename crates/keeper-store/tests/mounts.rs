mod common;

use std::sync::Arc;

use common::{canonical, plain, Harness};
use keeper_core::{config::StoreConfig, context::Context};
use keeper_store::{PathConflict, StoreError};

#[tokio::test]
async fn duplicate_mount_paths_conflict() {
    let h = Harness::new();
    let shared = h.plain_store("shared").await;
    let config = h
        .config()
        .with_mount("a", plain(h.path("shared")))
        .with_mount("b", plain(h.path("elsewhere/../shared")));

    let err = h.open(&config).await.expect_err("conflict");
    match err {
        StoreError::MountConflict { conflicts } => {
            assert_eq!(
                conflicts,
                [PathConflict {
                    path: canonical(&shared),
                    aliases: vec!["a".into(), "b".into()],
                }]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn every_duplicate_group_is_named() {
    let h = Harness::new();
    let p1 = h.plain_store("p1").await;
    let p2 = h.plain_store("p2").await;
    let config = h
        .config()
        .with_mount("a", plain(&p1))
        .with_mount("b", plain(&p1))
        .with_mount("c", plain(&p2))
        .with_mount("d", plain(&p2));

    let err = h.open(&config).await.expect_err("conflict");
    let message = err.to_string();
    for alias in ["\"a\"", "\"b\"", "\"c\"", "\"d\""] {
        assert!(message.contains(alias), "{alias} missing from {message}");
    }
    match err {
        StoreError::MountConflict { conflicts } => {
            let groups: Vec<_> = conflicts.iter().map(|c| c.aliases.clone()).collect();
            assert_eq!(groups, [vec!["a", "b"], vec!["c", "d"]]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_mount_conflicts_with_its_target() {
    let h = Harness::new();
    let real = h.plain_store("real").await;
    let link = h.path("link");
    std::os::unix::fs::symlink(&real, &link).expect("symlink");
    let config = h
        .config()
        .with_mount("direct", plain(&real))
        .with_mount("linked", plain(&link));

    let err = h.open(&config).await.expect_err("conflict");
    assert!(
        matches!(&err, StoreError::MountConflict { conflicts }
            if conflicts.len() == 1 && conflicts[0].aliases == ["direct", "linked"]),
        "{err}"
    );
}

#[tokio::test]
async fn mount_on_the_root_path_conflicts_with_the_base() {
    let h = Harness::new();
    h.plain_store("root").await;
    let config = h.config().with_mount("again", plain(h.path("root")));
    let err = h.open(&config).await.expect_err("conflict");
    assert!(
        matches!(&err, StoreError::MountConflict { conflicts }
            if conflicts.len() == 1 && conflicts[0].aliases == ["", "again"]),
        "{err}"
    );
}

#[tokio::test]
async fn nested_mount_paths_are_allowed() {
    let h = Harness::new();
    h.plain_store("root").await;
    let inner = h.plain_store("root/inner").await;
    let opened = h
        .open(&h.config().with_mount("inner", plain(&inner)))
        .await
        .expect("nested mount");
    assert_eq!(opened.store.mount_points(), ["inner"]);
}

#[tokio::test]
async fn resolves_by_longest_alias_prefix() {
    let h = Harness::new();
    let work = h.plain_store("work").await;
    let ops = h.plain_store("ops").await;
    let config = h
        .config()
        .with_mount("work", plain(&work))
        .with_mount("/work/ops/", plain(&ops));
    let root = h.open(&config).await.expect("open").store;

    let resolved = root.get_store("work/ops/db");
    assert_eq!((resolved.alias.as_str(), resolved.name.as_str()), ("work/ops", "db"));
    assert_eq!(resolved.store.path(), ops);

    let resolved = root.get_store("/work/mail");
    assert_eq!((resolved.alias.as_str(), resolved.name.as_str()), ("work", "mail"));

    let resolved = root.get_store("work");
    assert_eq!((resolved.alias.as_str(), resolved.name.as_str()), ("work", ""));

    let resolved = root.get_store("workshop/tools");
    assert_eq!(
        (resolved.alias.as_str(), resolved.name.as_str()),
        ("", "workshop/tools")
    );
    assert_eq!(resolved.store.path(), root.path());
}

#[tokio::test]
async fn failing_mounts_are_skipped() {
    let h = Harness::new();
    h.plain_store("root").await;
    let good = h.plain_store("good").await;
    std::fs::create_dir_all(h.path("bare")).expect("bare dir");
    let config = h
        .config()
        .with_mount("good", plain(&good))
        .with_mount("broken", StoreConfig::new(h.path("good2")).with_crypto("broken"))
        .with_mount("bare", plain(h.path("bare")))
        .with_mount("unknown", StoreConfig::new(h.path("u")).with_crypto("gpg"));

    let opened = h.open(&config).await.expect("open despite failures");
    let skipped: Vec<&str> = opened.skipped.iter().map(|s| s.alias.as_str()).collect();
    assert_eq!(skipped, ["bare", "broken", "unknown"]);
    assert!(opened
        .skipped
        .iter()
        .all(|s| matches!(s.reason, StoreError::Init { .. })));

    let root = opened.store;
    assert_eq!(root.mount_points(), ["good"]);
    let ctx = Context::background();
    root.set(&ctx, "base-entry", b"1").await.expect("base usable");
    root.set(&ctx, "good/entry", b"2").await.expect("mount usable");
    assert_eq!(root.get(&ctx, "good/entry").await.expect("get"), b"2");
    assert!(good.join("entry.txt").is_file());
}

#[tokio::test]
async fn invalid_aliases_are_skipped() {
    let h = Harness::new();
    h.plain_store("root").await;
    let good = h.plain_store("good").await;
    let config = h.config().with_mount("../up", plain(&good));
    let opened = h.open(&config).await.expect("open");
    assert!(matches!(
        opened.skipped[0].reason,
        StoreError::InvalidAlias { .. }
    ));
    assert!(opened.store.mount_points().is_empty());
}

#[tokio::test]
async fn list_merges_mounts_and_hides_shadowed_entries() {
    let h = Harness::new();
    h.plain_store("root").await;
    let team = h.plain_store("team").await;
    let root = h
        .open(&h.config().with_mount("team", plain(&team)))
        .await
        .expect("open")
        .store;
    let ctx = Context::background();

    root.set(&ctx, "personal/mail", b"a").await.expect("set");
    root.set(&ctx, "team/deploy", b"b").await.expect("set");
    // Written straight into the base directory, then hidden by the mount.
    std::fs::create_dir_all(h.path("root/team")).expect("mkdir");
    std::fs::write(h.path("root/team/shadowed.txt"), b"c").expect("write");

    assert_eq!(
        root.list(&ctx).await.expect("list"),
        ["personal/mail", "team/deploy"]
    );
    assert!(root.is_dir("team"));
    assert!(root.is_dir("personal"));
    assert!(root.exists("team/deploy"));
    assert!(!root.exists("team/shadowed"));
}

#[tokio::test]
async fn add_and_remove_mounts_at_runtime() {
    let h = Harness::new();
    h.plain_store("root").await;
    let extra = h.plain_store("extra").await;
    let root = h.open(&h.config()).await.expect("open").store;
    let ctx = Context::background();

    root.add_mount(&ctx, "/extra/", &plain(&extra))
        .await
        .expect("add");
    assert_eq!(root.mount_points(), ["extra"]);
    assert_eq!(root.mounts().get("extra"), Some(&extra));
    assert_eq!(
        root.to_string(),
        format!(
            "Store(Path: {}, Mounts: extra=Store(Alias: extra, Path: {}))",
            root.path().display(),
            extra.display()
        )
    );

    let err = root
        .add_mount(&ctx, "extra", &plain(&extra))
        .await
        .expect_err("duplicate alias");
    assert!(matches!(err, StoreError::AlreadyMounted { .. }));

    let err = root
        .add_mount(&ctx, "copy", &plain(&extra))
        .await
        .expect_err("duplicate path");
    assert!(matches!(err, StoreError::MountConflict { .. }));
    assert_eq!(root.mount_points(), ["extra"], "failed add leaves table unchanged");

    let err = root
        .add_mount(&ctx, "", &plain(h.path("x")))
        .await
        .expect_err("empty alias");
    assert!(matches!(err, StoreError::InvalidAlias { .. }));

    root.remove_mount("extra").await.expect("remove");
    assert!(root.mount_points().is_empty());
    let err = root.remove_mount("extra").await.expect_err("gone");
    assert!(matches!(err, StoreError::NotMounted { .. }));
}

#[tokio::test]
async fn uninitialized_store_cannot_be_mounted() {
    let h = Harness::new();
    h.plain_store("root").await;
    std::fs::create_dir_all(h.path("fresh")).expect("mkdir");
    let root = h.open(&h.config()).await.expect("open").store;
    let ctx = Context::background();

    let err = root
        .add_mount(&ctx, "fresh", &plain(h.path("fresh")))
        .await
        .expect_err("uninitialized");
    assert!(matches!(err, StoreError::Init { .. }));

    root.init(&ctx, "fresh", Some(&plain(h.path("fresh"))), &["tester".into()])
        .await
        .expect("init unmounted store");
    root.add_mount(&ctx, "fresh", &plain(h.path("fresh")))
        .await
        .expect("mount after init");
    assert_eq!(root.mount_points(), ["fresh"]);
}

#[tokio::test]
async fn init_of_unknown_alias_needs_a_location() {
    let h = Harness::new();
    let root = h.open(&h.config()).await.expect("open").store;
    let err = root
        .init(&Context::background(), "nowhere", None, &["tester".into()])
        .await
        .expect_err("no location");
    assert!(matches!(err, StoreError::NotMounted { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mounts_of_one_path_admit_exactly_one() {
    let h = Harness::new();
    h.plain_store("root").await;
    let shared = h.plain_store("shared").await;
    let root = Arc::new(h.open(&h.config()).await.expect("open").store);

    let tasks: Vec<_> = ["one", "two", "three", "four"]
        .into_iter()
        .map(|alias| {
            let root = Arc::clone(&root);
            let cfg = plain(&shared);
            tokio::spawn(async move { root.add_mount(&Context::background(), alias, &cfg).await })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        match task.await.expect("join") {
            Ok(()) => admitted += 1,
            Err(StoreError::MountConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(root.mount_points().len(), 1);
}

#[tokio::test]
async fn tilde_paths_expand_against_the_configured_home() {
    let h = Harness::new();
    h.plain_store("root").await;
    let vault = h.plain_store("home/vault").await;
    let config = h.config().with_mount("vault", plain("~/vault"));
    let root = h.open(&config).await.expect("open").store;
    assert_eq!(root.mounts().get("vault"), Some(&vault));
}
