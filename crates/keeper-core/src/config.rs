use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Current config schema version written by `Config::new`.
pub const CONFIG_VERSION: &str = "1.0.0";

/// Desired store topology. Owned by the caller; stores only read it.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub root: StoreConfig,
    /// Mount alias to store settings.
    #[serde(default)]
    pub mounts: BTreeMap<String, StoreConfig>,
}

/// Location and backend selection for one store.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: PathBuf,
    /// Crypto backend name; registry default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_backend: Option<String>,
    /// Sync backend name; registry default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_backend: Option<String>,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            crypto_backend: None,
            sync_backend: None,
        }
    }

    pub fn with_crypto(mut self, name: impl Into<String>) -> Self {
        self.crypto_backend = Some(name.into());
        self
    }

    pub fn with_sync(mut self, name: impl Into<String>) -> Self {
        self.sync_backend = Some(name.into());
        self
    }
}

impl Config {
    pub fn new(root: StoreConfig) -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            root,
            mounts: BTreeMap::new(),
        }
    }

    pub fn with_mount(mut self, alias: impl Into<String>, store: StoreConfig) -> Self {
        self.mounts.insert(alias.into(), store);
        self
    }
}

/// Explicit replacements for the process-wide config and home directories.
///
/// Resolved once at the process boundary and passed down; nothing below the
/// binary reads the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locations {
    /// Where backends keep per-user material such as keyrings.
    pub config_dir: PathBuf,
    /// Used to expand `~` in configured store paths.
    pub home_dir: PathBuf,
}

impl Locations {
    pub fn new(config_dir: impl Into<PathBuf>, home_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            home_dir: home_dir.into(),
        }
    }

    /// Both directories rooted under `root`; handy for isolated test harnesses.
    pub fn isolated(root: &Path) -> Self {
        Self::new(root.join("config"), root.join("home"))
    }
}

/// Caller-supplied backend choice that wins over config for one construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOverride {
    pub crypto: Option<String>,
    pub sync: Option<String>,
}

impl BackendOverride {
    pub fn crypto(name: impl Into<String>) -> Self {
        Self {
            crypto: Some(name.into()),
            sync: None,
        }
    }

    /// Override first, then the store's own setting.
    pub fn crypto_for<'a>(&'a self, store: &'a StoreConfig) -> Option<&'a str> {
        self.crypto
            .as_deref()
            .or(store.crypto_backend.as_deref())
    }

    pub fn sync_for<'a>(&'a self, store: &'a StoreConfig) -> Option<&'a str> {
        self.sync.as_deref().or(store.sync_backend.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_store_setting() {
        let store = StoreConfig::new("/tmp/s").with_crypto("xc").with_sync("noop");
        let none = BackendOverride::default();
        assert_eq!(none.crypto_for(&store), Some("xc"));
        assert_eq!(none.sync_for(&store), Some("noop"));

        let forced = BackendOverride::crypto("plain");
        assert_eq!(forced.crypto_for(&store), Some("plain"));
        assert_eq!(forced.sync_for(&store), Some("noop"));
    }

    #[test]
    fn builder_records_mounts_and_version() {
        let cfg = Config::new(StoreConfig::new("/srv/root"))
            .with_mount("work", StoreConfig::new("/srv/work"));
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.mounts["work"].path, PathBuf::from("/srv/work"));
    }

    #[test]
    fn isolated_locations_stay_under_root() {
        let loc = Locations::isolated(Path::new("/tmp/t"));
        assert_eq!(loc.config_dir, PathBuf::from("/tmp/t/config"));
        assert_eq!(loc.home_dir, PathBuf::from("/tmp/t/home"));
    }
}
