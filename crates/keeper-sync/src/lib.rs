//! Sync backends record changes made to a store and exchange them with a
//! remote. The store only ever talks to the [`SyncBackend`] trait.

use std::{collections::BTreeMap, fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use keeper_core::{
    config::Locations,
    context::{Cancelled, Context},
    crypto::FormatVersion,
};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync backend {backend} is not initialized: {reason}")]
    Uninitialized {
        backend: &'static str,
        reason: String,
    },
    #[error("unknown sync backend: {name}")]
    UnknownBackend { name: String },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Change tracking for one store.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Stable backend identifier, e.g. "noop".
    fn name(&self) -> &'static str;

    fn version(&self, ctx: &Context) -> FormatVersion;

    async fn initialized(&self, ctx: &Context) -> Result<(), SyncError>;

    /// Stage files (relative to the store root) for the next commit.
    async fn add(&self, ctx: &Context, paths: &[PathBuf]) -> Result<(), SyncError>;

    async fn commit(&self, ctx: &Context, message: &str) -> Result<(), SyncError>;

    async fn push(&self, ctx: &Context) -> Result<(), SyncError>;

    async fn pull(&self, ctx: &Context) -> Result<(), SyncError>;
}

/// Sync backend that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSync;

pub const NOOP: &str = "noop";

#[async_trait]
impl SyncBackend for NoopSync {
    fn name(&self) -> &'static str {
        NOOP
    }

    fn version(&self, _ctx: &Context) -> FormatVersion {
        FormatVersion::new(0, 0, 1)
    }

    async fn initialized(&self, ctx: &Context) -> Result<(), SyncError> {
        ctx.check()?;
        Ok(())
    }

    #[instrument(skip_all, fields(paths = paths.len()))]
    async fn add(&self, ctx: &Context, paths: &[PathBuf]) -> Result<(), SyncError> {
        ctx.check()?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn commit(&self, ctx: &Context, _message: &str) -> Result<(), SyncError> {
        ctx.check()?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn push(&self, ctx: &Context) -> Result<(), SyncError> {
        ctx.check()?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn pull(&self, ctx: &Context) -> Result<(), SyncError> {
        ctx.check()?;
        Ok(())
    }
}

/// What a sync factory gets to build an instance for one store.
#[derive(Debug, Clone)]
pub struct SyncParams {
    pub store_root: PathBuf,
    pub locations: Locations,
}

pub type SyncFactory =
    Arc<dyn Fn(&SyncParams) -> anyhow::Result<Box<dyn SyncBackend>> + Send + Sync>;

/// Sync backends keyed by name.
#[derive(Clone)]
pub struct SyncRegistry {
    factories: BTreeMap<&'static str, SyncFactory>,
    default: &'static str,
}

impl SyncRegistry {
    pub fn new(default: &'static str) -> Self {
        Self {
            factories: BTreeMap::new(),
            default,
        }
    }

    pub fn register<F>(&mut self, name: &'static str, factory: F) -> &mut Self
    where
        F: Fn(&SyncParams) -> anyhow::Result<Box<dyn SyncBackend>> + Send + Sync + 'static,
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

    /// Build the backend called `name`, or the default when `name` is `None` or empty.
    pub fn build(
        &self,
        name: Option<&str>,
        params: &SyncParams,
    ) -> Result<Box<dyn SyncBackend>, SyncError> {
        let name = name.filter(|n| !n.is_empty()).unwrap_or(self.default);
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SyncError::UnknownBackend {
                name: name.to_string(),
            })?;
        debug!(backend = name, root = ?params.store_root, "building sync backend");
        Ok(factory(params)?)
    }
}

impl Default for SyncRegistry {
    /// Registry holding only [`NoopSync`].
    fn default() -> Self {
        let mut registry = Self::new(NOOP);
        registry.register(NOOP, |_params: &SyncParams| {
            Ok(Box::new(NoopSync) as Box<dyn SyncBackend>)
        });
        registry
    }
}

impl fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRegistry")
            .field("backends", &self.names())
            .field("default", &self.default)
            .finish()
    }
}
