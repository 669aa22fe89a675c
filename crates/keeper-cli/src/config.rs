use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::{eyre::eyre, Result};
use keeper_core::config::{Config, Locations, StoreConfig};

/// Points the CLI at a different config file; its directory becomes the config dir.
pub const CONFIG_ENV: &str = "KEEPER_CONFIG";
/// Replaces the home directory used for `~` expansion and the default store.
pub const HOMEDIR_ENV: &str = "KEEPER_HOMEDIR";
/// When set, used as the passphrase instead of the OS keychain.
pub const PASSPHRASE_ENV: &str = "KEEPER_PASSPHRASE";

/// Where the config file lives plus the directories handed to the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub config_file: PathBuf,
    pub locations: Locations,
}

impl Paths {
    /// Resolve paths from the process environment and platform defaults.
    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var_os(key).map(PathBuf::from))
    }

    /// Resolve paths with `lookup` standing in for the environment.
    pub fn resolve(lookup: impl Fn(&str) -> Option<PathBuf>) -> Result<Self> {
        let config_file = match lookup(CONFIG_ENV).filter(|p| !p.as_os_str().is_empty()) {
            Some(file) => file,
            None => default_path()?,
        };
        let config_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| eyre!("config file {} has no parent", config_file.display()))?;
        let home_dir = match lookup(HOMEDIR_ENV).filter(|p| !p.as_os_str().is_empty()) {
            Some(home) => home,
            None => dirs::home_dir().ok_or_else(|| eyre!("no home dir available"))?,
        };
        Ok(Self {
            config_file,
            locations: Locations::new(config_dir, home_dir),
        })
    }

    /// Config used when no file exists: a root store under the home directory.
    pub fn default_config(&self) -> Config {
        Config::new(StoreConfig::new(
            self.locations.home_dir.join(".keeper-store"),
        ))
    }
}

/// Load config from a given path; if missing or empty, return `fallback`.
pub fn load_from_path(path: impl AsRef<Path>, fallback: Config) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(fallback);
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(fallback);
    }
    let cfg: Config = toml::from_str(&contents)?;
    if cfg.root.path.as_os_str().is_empty() {
        return Ok(Config {
            root: fallback.root,
            ..cfg
        });
    }
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| eyre!("no config dir available"))?;
    Ok(base.join("keeper").join("config.toml"))
}

/// Write `config` to `path`, replacing any previous contents.
pub fn save(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(())
}

/// Write `config` unless a file already exists, to avoid clobbering user edits.
pub fn write_default_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        save(config, path)?;
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback() -> Config {
        Config::new(StoreConfig::new("/home/test/.keeper-store"))
    }

    #[test]
    fn returns_fallback_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml"), fallback()).expect("load");
        assert_eq!(cfg, fallback());
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            version = "1.0.0"
            [root]
            path = "/srv/keeper"
            crypto_backend = "xc"
            [mounts.work]
            path = "~/work-store"
            crypto_backend = "agecli"
            sync_backend = "noop"
            [mounts."team/ops"]
            path = "/srv/ops"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path, fallback()).expect("load");
        assert_eq!(
            cfg,
            Config::new(StoreConfig::new("/srv/keeper").with_crypto("xc"))
                .with_mount(
                    "work",
                    StoreConfig::new("~/work-store")
                        .with_crypto("agecli")
                        .with_sync("noop")
                )
                .with_mount("team/ops", StoreConfig::new("/srv/ops"))
        );
    }

    #[test]
    fn missing_root_path_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[mounts.a]\npath = \"/srv/a\"\n").expect("write");
        let cfg = load_from_path(&path, fallback()).expect("load");
        assert_eq!(cfg.root, fallback().root);
        assert_eq!(cfg.mounts.len(), 1);
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = fallback();

        write_default_if_missing(&cfg, &path).expect("write should succeed");
        let changed = cfg.clone().with_mount("x", StoreConfig::new("/x"));
        let second = write_default_if_missing(&changed, &path).expect("second write ok");
        assert_eq!(second, path);
        let loaded = load_from_path(&path, Config::default()).expect("reload");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn env_overrides_pick_config_and_home() {
        let paths = Paths::resolve(|key| match key {
            CONFIG_ENV => Some(PathBuf::from("/etc/keeper-test/config.toml")),
            HOMEDIR_ENV => Some(PathBuf::from("/home/other")),
            _ => None,
        })
        .expect("resolve");
        assert_eq!(paths.config_file, PathBuf::from("/etc/keeper-test/config.toml"));
        assert_eq!(
            paths.locations,
            Locations::new("/etc/keeper-test", "/home/other")
        );
        assert_eq!(
            paths.default_config().root.path,
            PathBuf::from("/home/other/.keeper-store")
        );
    }
}
