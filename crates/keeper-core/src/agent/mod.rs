use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use crate::context::{Cancelled, Context};

/// A passphrase handed out by an agent. Wiped from memory on drop.
pub type Passphrase = Zeroizing<String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The agent has no passphrase to offer (nothing cached, nothing stored).
    #[error("no passphrase available: {reason}")]
    Unavailable { reason: String },
    /// The agent's own backing service failed.
    #[error("agent failure: {reason}")]
    Backend { reason: String },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Supplies the passphrase that unlocks a backend's private key material.
///
/// Caching is the agent's concern; backends call `passphrase` whenever they
/// need the key unlocked and never remember the answer themselves.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Ask for the passphrase. `reason` describes what is being unlocked.
    async fn passphrase(&self, ctx: &Context, reason: &str) -> Result<Passphrase, AgentError>;

    /// Drop any cached secret. Agents without a cache ignore this.
    async fn forget(&self) {}
}

#[async_trait]
impl<A: Agent + ?Sized> Agent for Arc<A> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn passphrase(&self, ctx: &Context, reason: &str) -> Result<Passphrase, AgentError> {
        (**self).passphrase(ctx, reason).await
    }

    async fn forget(&self) {
        (**self).forget().await
    }
}

/// Agent that always answers with the same secret. Used by tests and when the
/// passphrase is supplied up front by the caller.
#[derive(Clone)]
pub struct StaticAgent {
    secret: Passphrase,
}

impl StaticAgent {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }
}

impl std::fmt::Debug for StaticAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticAgent").finish_non_exhaustive()
    }
}

#[async_trait]
impl Agent for StaticAgent {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn passphrase(&self, ctx: &Context, _reason: &str) -> Result<Passphrase, AgentError> {
        ctx.check()?;
        Ok(self.secret.clone())
    }
}

/// Wraps another agent and remembers its first successful answer for the
/// rest of the session.
pub struct CachingAgent<A> {
    inner: A,
    cached: Mutex<Option<Passphrase>>,
}

impl<A: Agent> CachingAgent<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: Agent> Agent for CachingAgent<A> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn passphrase(&self, ctx: &Context, reason: &str) -> Result<Passphrase, AgentError> {
        ctx.check()?;
        // Held across the inner call so concurrent callers prompt only once.
        let mut guard = self.cached.lock().await;
        if let Some(secret) = guard.as_ref() {
            return Ok(secret.clone());
        }
        let secret = self.inner.passphrase(ctx, reason).await?;
        debug!(agent = self.inner.name(), "caching passphrase for session");
        *guard = Some(secret.clone());
        Ok(secret)
    }

    async fn forget(&self) {
        self.cached.lock().await.take();
        self.inner.forget().await;
    }
}
