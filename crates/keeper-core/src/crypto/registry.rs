use std::{collections::BTreeMap, fmt, path::PathBuf, sync::Arc};

use tracing::debug;

use super::{CryptoBackend, CryptoError};
use crate::{agent::Agent, config::Locations};

/// Everything a backend factory may need to build an instance for one store.
#[derive(Clone)]
pub struct BackendParams {
    /// Root directory of the store the backend will serve.
    pub store_root: PathBuf,
    pub agent: Arc<dyn Agent>,
    pub locations: Locations,
}

impl fmt::Debug for BackendParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendParams")
            .field("store_root", &self.store_root)
            .field("agent", &self.agent.name())
            .field("locations", &self.locations)
            .finish()
    }
}

pub type CryptoFactory =
    Arc<dyn Fn(&BackendParams) -> Result<Box<dyn CryptoBackend>, CryptoError> + Send + Sync>;

/// Crypto backends keyed by name. Resolved once, when a store is constructed.
#[derive(Clone)]
pub struct CryptoRegistry {
    factories: BTreeMap<&'static str, CryptoFactory>,
    default: &'static str,
}

impl CryptoRegistry {
    /// An empty registry whose fallback backend is `default`.
    pub fn new(default: &'static str) -> Self {
        Self {
            factories: BTreeMap::new(),
            default,
        }
    }

    pub fn register<F>(&mut self, name: &'static str, factory: F) -> &mut Self
    where
        F: Fn(&BackendParams) -> Result<Box<dyn CryptoBackend>, CryptoError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name, Arc::new(factory));
        self
    }

    pub fn default_name(&self) -> &'static str {
        self.default
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the backend called `name`, or the default when `name` is `None`.
    pub fn build(
        &self,
        name: Option<&str>,
        params: &BackendParams,
    ) -> Result<Box<dyn CryptoBackend>, CryptoError> {
        let name = name.filter(|n| !n.is_empty()).unwrap_or(self.default);
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CryptoError::UnknownBackend {
                name: name.to_string(),
            })?;
        debug!(backend = name, root = ?params.store_root, "building crypto backend");
        factory(params)
    }
}

impl fmt::Debug for CryptoRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoRegistry")
            .field("backends", &self.names())
            .field("default", &self.default)
            .finish()
    }
}
