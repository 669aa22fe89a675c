//! The root store: a base store plus aliased mounts under one namespace.

mod mount;

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use keeper_core::{
    agent::Agent,
    config::{BackendOverride, Config, Locations, StoreConfig},
    context::Context,
    crypto::{BackendParams, CryptoRegistry},
    recipients::RecipientSet,
};
use keeper_sync::{SyncParams, SyncRegistry};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use self::mount::MountTable;
use crate::{
    paths::{clean_alias, clean_path},
    StoreError, SubStore,
};

/// Collaborators a root store needs to build its sub-stores.
#[derive(Clone)]
pub struct Wiring {
    pub crypto: CryptoRegistry,
    pub sync: SyncRegistry,
    pub agent: Arc<dyn Agent>,
    pub locations: Locations,
}

impl Wiring {
    pub fn new(
        crypto: CryptoRegistry,
        sync: SyncRegistry,
        agent: Arc<dyn Agent>,
        locations: Locations,
    ) -> Self {
        Self {
            crypto,
            sync,
            agent,
            locations,
        }
    }
}

impl fmt::Debug for Wiring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wiring")
            .field("crypto", &self.crypto)
            .field("sync", &self.sync)
            .field("agent", &self.agent.name())
            .field("locations", &self.locations)
            .finish()
    }
}

/// A configured mount that could not be opened.
#[derive(Debug)]
pub struct SkippedMount {
    pub alias: String,
    pub path: PathBuf,
    pub reason: StoreError,
}

/// Result of [`RootStore::new`]: the store plus every mount left out of it.
#[derive(Debug)]
pub struct Opened {
    pub store: RootStore,
    pub skipped: Vec<SkippedMount>,
}

/// Where a name lives: the owning store's alias, the store, and the name
/// relative to that store.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub alias: String,
    pub store: Arc<SubStore>,
    pub name: String,
}

pub struct RootStore {
    base: Arc<SubStore>,
    table: RwLock<Arc<MountTable>>,
    // Held across a whole add/remove so concurrent mutations cannot interleave.
    writer: Mutex<()>,
    wiring: Wiring,
    overrides: BackendOverride,
}

impl RootStore {
    /// Build the base store and every configured mount.
    ///
    /// A mount that fails to open is logged and reported in
    /// [`Opened::skipped`]; only base store failures, cancellation and mount
    /// path conflicts are fatal.
    #[instrument(skip_all, fields(root = %config.root.path.display(), mounts = config.mounts.len()))]
    pub async fn new(
        ctx: &Context,
        config: &Config,
        wiring: Wiring,
        overrides: BackendOverride,
    ) -> Result<Opened, StoreError> {
        ctx.check()?;
        if config.root.path.as_os_str().is_empty() {
            return Err(StoreError::Config {
                reason: "root store path is empty".to_string(),
            });
        }
        let root_path = clean_path(&config.root.path, &wiring.locations.home_dir)
            .map_err(|e| StoreError::from(e).init_at(&config.root.path))?;
        let base = build_sub(&wiring, &overrides, "", root_path.clone(), &config.root)
            .map_err(|e| e.init_at(&root_path))?;
        debug!(path = %root_path.display(), crypto = base.crypto().name(), "opened base store");

        let store = Self {
            base: Arc::new(base),
            table: RwLock::new(Arc::new(MountTable::default())),
            writer: Mutex::new(()),
            wiring,
            overrides,
        };

        let mut table = MountTable::default();
        let mut skipped = Vec::new();
        for (raw_alias, mount_cfg) in &config.mounts {
            let opened = match clean_alias(raw_alias) {
                Err(reason) => Err(StoreError::InvalidAlias {
                    alias: raw_alias.clone(),
                    reason,
                }),
                Ok(alias) if table.mounts.contains_key(&alias) => {
                    Err(StoreError::AlreadyMounted { alias })
                }
                Ok(alias) => store.open_mount(ctx, &alias, mount_cfg).await.map(|s| (alias, s)),
            };
            match opened {
                Ok((alias, sub)) => {
                    debug!(alias = %alias, path = %sub.path().display(), "mounted store");
                    table.mounts.insert(alias, Arc::new(sub));
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!(alias = %raw_alias, path = %mount_cfg.path.display(), error = %err, "skipping mount");
                    skipped.push(SkippedMount {
                        alias: raw_alias.clone(),
                        path: mount_cfg.path.clone(),
                        reason: err,
                    });
                }
            }
        }

        table.check_conflicts(&store.base)?;
        store.replace_table(table);
        Ok(Opened { store, skipped })
    }

    /// Build a mount store at `cfg.path` and require it to be initialized.
    async fn open_mount(
        &self,
        ctx: &Context,
        alias: &str,
        cfg: &StoreConfig,
    ) -> Result<SubStore, StoreError> {
        let path = clean_path(&cfg.path, &self.wiring.locations.home_dir)
            .map_err(|e| StoreError::from(e).init_at(&cfg.path))?;
        let sub = build_sub(&self.wiring, &self.overrides, alias, path.clone(), cfg)
            .map_err(|e| e.init_at(&path))?;
        sub.initialized(ctx).await.map_err(|e| e.init_at(&path))?;
        Ok(sub)
    }

    fn snapshot(&self) -> Arc<MountTable> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_table(&self, table: MountTable) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }

    /// Route `name` to the store that owns it. Never fails: names outside
    /// every mount belong to the base store.
    pub fn get_store(&self, name: &str) -> Resolved {
        let name = name.trim_start_matches('/');
        let table = self.snapshot();
        match table.longest_match(name) {
            Some((alias, store)) => Resolved {
                alias: alias.to_string(),
                store: Arc::clone(store),
                name: name[alias.len()..].trim_start_matches('/').to_string(),
            },
            None => Resolved {
                alias: String::new(),
                store: Arc::clone(&self.base),
                name: name.to_string(),
            },
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        let resolved = self.get_store(name);
        resolved.store.exists(&resolved.name)
    }

    /// True for directories inside any store, mount points, and the parents of mount points.
    pub fn is_dir(&self, name: &str) -> bool {
        if self.snapshot().has_mount_below(name) {
            return true;
        }
        let resolved = self.get_store(name);
        resolved.store.is_dir(&resolved.name)
    }

    /// The sub-store owning `name`.
    pub fn store(&self, name: &str) -> Arc<SubStore> {
        self.get_store(name).store
    }

    /// Path of the base store, as configured (tilde expanded, `.`/`..` folded).
    pub fn path(&self) -> &Path {
        self.base.path()
    }

    /// Always `""`: the root store is never mounted under an alias.
    pub fn alias(&self) -> &str {
        ""
    }

    pub async fn get(&self, ctx: &Context, name: &str) -> Result<Vec<u8>, StoreError> {
        let resolved = self.get_store(name);
        resolved.store.get(ctx, &resolved.name).await
    }

    pub async fn set(&self, ctx: &Context, name: &str, content: &[u8]) -> Result<(), StoreError> {
        let resolved = self.get_store(name);
        resolved.store.set(ctx, &resolved.name, content).await
    }

    pub async fn delete(&self, ctx: &Context, name: &str) -> Result<(), StoreError> {
        let resolved = self.get_store(name);
        resolved.store.delete(ctx, &resolved.name).await
    }

    /// Every entry in the tree, mount entries prefixed by their alias, sorted.
    /// Base entries hidden behind a mount point are left out.
    #[instrument(skip_all)]
    pub async fn list(&self, ctx: &Context) -> Result<Vec<String>, StoreError> {
        let table = self.snapshot();
        let mut names: Vec<String> = self
            .base
            .list(ctx)
            .await?
            .into_iter()
            .filter(|name| table.longest_match(name).is_none())
            .collect();
        for (alias, store) in &table.mounts {
            for name in store.list(ctx).await? {
                let full = format!("{alias}/{name}");
                // A deeper mount owns this name; it is listed there.
                if table.longest_match(&full).map(|(a, _)| a) == Some(alias.as_str()) {
                    names.push(full);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Whether the base store is ready for use.
    pub async fn initialized(&self, ctx: &Context) -> Result<(), StoreError> {
        self.base.initialized(ctx).await
    }

    /// Write the ID file of a store.
    ///
    /// An empty alias initializes the base store and a mounted alias its
    /// mount. Any other alias needs `cfg`, which locates a not yet mounted
    /// store; mount it afterwards with [`RootStore::add_mount`].
    #[instrument(skip_all, fields(alias))]
    pub async fn init(
        &self,
        ctx: &Context,
        alias: &str,
        cfg: Option<&StoreConfig>,
        recipients: &[String],
    ) -> Result<(), StoreError> {
        let alias = alias.trim().trim_matches('/');
        if alias.is_empty() {
            return self.base.init(ctx, recipients).await;
        }
        let alias = clean_alias(alias).map_err(|reason| StoreError::InvalidAlias {
            alias: alias.to_string(),
            reason,
        })?;
        if let Some(store) = self.snapshot().mounts.get(&alias) {
            return store.init(ctx, recipients).await;
        }
        let cfg = cfg.ok_or_else(|| StoreError::NotMounted {
            alias: alias.clone(),
        })?;
        let path = clean_path(&cfg.path, &self.wiring.locations.home_dir)?;
        let sub = build_sub(&self.wiring, &self.overrides, &alias, path, cfg)?;
        sub.init(ctx, recipients).await
    }

    /// Mount an initialized store at `alias`.
    ///
    /// The new table is validated for path conflicts before it replaces the
    /// current one; on any error the mounts are unchanged.
    #[instrument(skip_all, fields(alias, path = %cfg.path.display()))]
    pub async fn add_mount(
        &self,
        ctx: &Context,
        alias: &str,
        cfg: &StoreConfig,
    ) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        let alias = clean_alias(alias).map_err(|reason| StoreError::InvalidAlias {
            alias: alias.to_string(),
            reason,
        })?;
        let current = self.snapshot();
        if current.mounts.contains_key(&alias) {
            return Err(StoreError::AlreadyMounted { alias });
        }
        let sub = self.open_mount(ctx, &alias, cfg).await?;

        let mut candidate = MountTable::clone(&current);
        candidate.mounts.insert(alias.clone(), Arc::new(sub));
        candidate.check_conflicts(&self.base)?;
        ctx.check()?;
        self.replace_table(candidate);
        info!(alias = %alias, "mount added");
        Ok(())
    }

    #[instrument(skip_all, fields(alias))]
    pub async fn remove_mount(&self, alias: &str) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        let key = alias.trim().trim_matches('/');
        let mut candidate = MountTable::clone(&self.snapshot());
        if candidate.mounts.remove(key).is_none() {
            return Err(StoreError::NotMounted {
                alias: alias.to_string(),
            });
        }
        self.replace_table(candidate);
        info!(alias = %key, "mount removed");
        Ok(())
    }

    /// Mounted aliases, sorted.
    pub fn mount_points(&self) -> Vec<String> {
        self.snapshot().mounts.keys().cloned().collect()
    }

    /// Alias to physical path for every mount.
    pub fn mounts(&self) -> BTreeMap<String, PathBuf> {
        self.snapshot()
            .mounts
            .iter()
            .map(|(alias, store)| (alias.clone(), store.path().to_path_buf()))
            .collect()
    }

    /// Recipients of the store owning `name`.
    pub async fn recipients(&self, ctx: &Context, name: &str) -> Result<RecipientSet, StoreError> {
        self.store(name).recipients(ctx).await
    }

    pub async fn add_recipient(
        &self,
        ctx: &Context,
        name: &str,
        id: &str,
    ) -> Result<bool, StoreError> {
        self.store(name).add_recipient(ctx, id).await
    }

    pub async fn remove_recipient(
        &self,
        ctx: &Context,
        name: &str,
        id: &str,
    ) -> Result<bool, StoreError> {
        self.store(name).remove_recipient(ctx, id).await
    }
}

fn build_sub(
    wiring: &Wiring,
    overrides: &BackendOverride,
    alias: &str,
    path: PathBuf,
    cfg: &StoreConfig,
) -> Result<SubStore, StoreError> {
    let crypto = wiring.crypto.build(
        overrides.crypto_for(cfg),
        &BackendParams {
            store_root: path.clone(),
            agent: Arc::clone(&wiring.agent),
            locations: wiring.locations.clone(),
        },
    )?;
    let sync = wiring.sync.build(
        overrides.sync_for(cfg),
        &SyncParams {
            store_root: path.clone(),
            locations: wiring.locations.clone(),
        },
    )?;
    Ok(SubStore::new(alias, path, crypto, sync))
}

impl fmt::Display for RootStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.snapshot();
        let mounts = table
            .mounts
            .iter()
            .map(|(alias, store)| format!("{alias}={store}"))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "Store(Path: {}, Mounts: {mounts})", self.base.path().display())
    }
}

impl fmt::Debug for RootStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootStore")
            .field("base", &self.base)
            .field("mounts", &self.snapshot().mounts)
            .finish()
    }
}
