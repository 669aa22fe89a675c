#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use keeper_core::{
    agent::StaticAgent,
    config::{BackendOverride, Config, Locations, StoreConfig},
    context::Context,
    crypto::{BackendParams, CryptoBackend, CryptoError, CryptoRegistry, FormatVersion},
};
use keeper_crypto::{
    plain::PlainBackend,
    xc::{self, KdfParams, XcBackend},
};
use keeper_store::{Opened, RootStore, StoreError, SubStore, Wiring};
use keeper_sync::{NoopSync, SyncBackend, SyncError, SyncParams, SyncRegistry};
use tempfile::TempDir;

pub const PASSPHRASE: &str = "correct horse battery staple";

/// Crypto registry with a cheap xc KDF and a backend that always fails to build.
pub fn crypto_registry() -> CryptoRegistry {
    let mut registry = keeper_crypto::default_registry();
    registry
        .register(xc::NAME, |p: &BackendParams| {
            let backend = XcBackend::new(p.store_root.clone(), Arc::clone(&p.agent), &p.locations)?
                .with_kdf(KdfParams {
                    m_cost: 1024,
                    t_cost: 1,
                    p_cost: 1,
                });
            Ok(Box::new(backend) as Box<dyn CryptoBackend>)
        })
        .register("broken", |_p: &BackendParams| {
            Err(CryptoError::Uninitialized {
                backend: "broken",
                reason: "no key material".to_string(),
            })
        });
    registry
}

/// Sync backend that remembers every call, shared across all stores it builds.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("journal lock").clone()
    }

    fn push(&self, entry: String) {
        self.0.lock().expect("journal lock").push(entry);
    }
}

struct RecordingSync(Journal);

#[async_trait]
impl SyncBackend for RecordingSync {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn version(&self, _ctx: &Context) -> FormatVersion {
        FormatVersion::new(0, 0, 1)
    }

    async fn initialized(&self, _ctx: &Context) -> Result<(), SyncError> {
        Ok(())
    }

    async fn add(&self, _ctx: &Context, paths: &[PathBuf]) -> Result<(), SyncError> {
        for path in paths {
            self.0.push(format!("add {}", path.display()));
        }
        Ok(())
    }

    async fn commit(&self, _ctx: &Context, message: &str) -> Result<(), SyncError> {
        self.0.push(format!("commit {message}"));
        Ok(())
    }

    async fn push(&self, _ctx: &Context) -> Result<(), SyncError> {
        Ok(())
    }

    async fn pull(&self, _ctx: &Context) -> Result<(), SyncError> {
        Ok(())
    }
}

pub fn sync_registry(journal: &Journal) -> SyncRegistry {
    let mut registry = SyncRegistry::default();
    let journal = journal.clone();
    registry.register("recording", move |_p: &SyncParams| {
        Ok(Box::new(RecordingSync(journal.clone())) as Box<dyn SyncBackend>)
    });
    registry
}

/// A scratch directory plus the wiring every test store is built with.
pub struct Harness {
    pub dir: TempDir,
    pub journal: Journal,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            journal: Journal::default(),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn locations(&self) -> Locations {
        Locations::isolated(self.dir.path())
    }

    pub fn wiring(&self) -> Wiring {
        Wiring::new(
            crypto_registry(),
            sync_registry(&self.journal),
            Arc::new(StaticAgent::new(PASSPHRASE)),
            self.locations(),
        )
    }

    /// Root config for a plain-text base store at `<tmp>/root`.
    pub fn config(&self) -> Config {
        fs::create_dir_all(self.path("root")).expect("root dir");
        Config::new(StoreConfig::new(self.path("root")).with_crypto("plain"))
    }

    /// Write a plain store's ID file at `<tmp>/<rel>` and return its path.
    pub async fn plain_store(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        SubStore::new(rel, &path, Box::new(PlainBackend::new()), Box::new(NoopSync))
            .init(&Context::background(), &["tester".to_string()])
            .await
            .expect("init plain store");
        path
    }

    pub async fn open(&self, config: &Config) -> Result<Opened, StoreError> {
        RootStore::new(
            &Context::background(),
            config,
            self.wiring(),
            BackendOverride::default(),
        )
        .await
    }
}

pub fn plain(path: impl Into<PathBuf>) -> StoreConfig {
    StoreConfig::new(path).with_crypto("plain")
}

pub fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).expect("canonicalize")
}
