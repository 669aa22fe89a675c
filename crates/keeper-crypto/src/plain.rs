//! `plain`: stores payloads unencrypted. For tests and debugging only.

use async_trait::async_trait;
use keeper_core::{
    context::Context,
    crypto::{CryptoBackend, CryptoError, FormatVersion},
};

pub const NAME: &str = "plain";
pub const EXT: &str = "txt";
pub const ID_FILE: &str = ".plain-ids";

/// Every non-empty recipient string is accepted; there is no key material.
#[derive(Debug, Default, Clone)]
pub struct PlainBackend;

impl PlainBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CryptoBackend for PlainBackend {
    async fn initialized(&self, ctx: &Context) -> Result<(), CryptoError> {
        ctx.check()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn version(&self, _ctx: &Context) -> FormatVersion {
        FormatVersion::new(1, 0, 0)
    }

    fn ext(&self) -> &'static str {
        EXT
    }

    fn id_file(&self) -> &'static str {
        ID_FILE
    }

    async fn encrypt(
        &self,
        ctx: &Context,
        plaintext: &[u8],
        recipients: &[String],
    ) -> Result<Vec<u8>, CryptoError> {
        ctx.check()?;
        if !recipients.iter().any(|r| !r.trim().is_empty()) {
            return Err(CryptoError::Recipient {
                reason: "recipient list is empty".to_string(),
            });
        }
        Ok(plaintext.to_vec())
    }

    async fn decrypt(&self, ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        ctx.check()?;
        Ok(ciphertext.to_vec())
    }

    async fn list_recipients(&self, ctx: &Context) -> Result<Vec<String>, CryptoError> {
        ctx.check()?;
        Ok(Vec::new())
    }

    async fn list_identities(&self, ctx: &Context) -> Result<Vec<String>, CryptoError> {
        ctx.check()?;
        Ok(Vec::new())
    }

    async fn generate_identity(&self, ctx: &Context, name: &str) -> Result<String, CryptoError> {
        ctx.check()?;
        Ok(name.to_string())
    }
}
