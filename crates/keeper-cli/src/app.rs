//! Process-level wiring: agent selection and opening the root store.

use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use keeper_core::{
    agent::{Agent, CachingAgent, StaticAgent},
    config::{BackendOverride, Config},
    context::Context,
};
use keeper_crypto::agent::KeyringAgent;
use keeper_store::{RootStore, Wiring};
use keeper_sync::SyncRegistry;
use tracing::{debug, warn};

use crate::config::{self, Paths, PASSPHRASE_ENV};

pub const KEYCHAIN_SERVICE: &str = "keeper";
pub const KEYCHAIN_ACCOUNT: &str = "passphrase";

/// Everything a command needs: resolved paths, loaded config and the open store.
pub struct App {
    pub paths: Paths,
    pub config: Config,
    pub root: RootStore,
}

impl App {
    /// Load config from `paths` and open the root store. Mounts that fail to
    /// open are reported as warnings and left out.
    pub async fn open(
        ctx: &Context,
        paths: Paths,
        agent: Arc<dyn Agent>,
        overrides: BackendOverride,
    ) -> Result<Self> {
        let config = config::load_from_path(&paths.config_file, paths.default_config())?;
        debug!(file = %paths.config_file.display(), mounts = config.mounts.len(), "loaded config");
        let wiring = Wiring::new(
            keeper_crypto::default_registry(),
            SyncRegistry::default(),
            agent,
            paths.locations.clone(),
        );
        let opened = RootStore::new(ctx, &config, wiring, overrides).await?;
        for skipped in &opened.skipped {
            warn!(alias = %skipped.alias, "mount unavailable: {}", skipped.reason);
        }
        Ok(Self {
            paths,
            config,
            root: opened.store,
        })
    }

    pub fn config_file(&self) -> &PathBuf {
        &self.paths.config_file
    }

    /// Persist the in-memory config back to the config file.
    pub fn save_config(&self) -> Result<()> {
        config::save(&self.config, &self.paths.config_file)
    }
}

/// `KEEPER_PASSPHRASE` wins; otherwise the OS keychain, asked once per process.
pub fn build_agent(lookup: impl Fn(&str) -> Option<String>) -> Arc<dyn Agent> {
    match lookup(PASSPHRASE_ENV).filter(|p| !p.is_empty()) {
        Some(secret) => Arc::new(StaticAgent::new(secret)),
        None => Arc::new(CachingAgent::new(keychain())),
    }
}

pub fn keychain() -> KeyringAgent {
    KeyringAgent::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT)
}
