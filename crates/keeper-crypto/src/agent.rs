use async_trait::async_trait;
use keeper_core::{
    agent::{Agent, AgentError, Passphrase},
    context::Context,
};
use tracing::debug;
use zeroize::Zeroizing;

/// OS keychain-backed passphrase agent. Uses the `keyring` crate.
///
/// Wrap it in `CachingAgent` to avoid a keychain round trip per operation.
pub struct KeyringAgent {
    service: String,
    account: String,
}

impl KeyringAgent {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, AgentError> {
        keyring::Entry::new(&self.service, &self.account).map_err(|e| AgentError::Backend {
            reason: e.to_string(),
        })
    }

    /// Store `passphrase` so later `passphrase` calls can return it.
    pub fn remember(&self, passphrase: &str) -> Result<(), AgentError> {
        self.entry()?
            .set_password(passphrase)
            .map_err(|e| AgentError::Backend {
                reason: e.to_string(),
            })
    }

    pub fn clear(&self) -> Result<(), AgentError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AgentError::Backend {
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Agent for KeyringAgent {
    fn name(&self) -> &'static str {
        "keyring"
    }

    async fn passphrase(&self, ctx: &Context, reason: &str) -> Result<Passphrase, AgentError> {
        ctx.check()?;
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        debug!(service = %self.service, reason, "reading passphrase from keychain");
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Zeroizing::new(secret)),
            Err(keyring::Error::NoEntry) => Err(AgentError::Unavailable {
                reason: format!(
                    "no keychain entry for {}/{}",
                    self.service, self.account
                ),
            }),
            Err(e) => Err(AgentError::Backend {
                reason: e.to_string(),
            }),
        }
    }
}
