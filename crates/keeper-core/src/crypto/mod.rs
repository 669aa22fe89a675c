//! Contract every encryption scheme must satisfy to back a store.

mod registry;
mod version;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    agent::AgentError,
    context::{Cancelled, Context},
};

pub use registry::{BackendParams, CryptoFactory, CryptoRegistry};
pub use version::{FormatVersion, ParseVersionError};

/// Errors produced by crypto backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material or ID file is missing; run the setup flow.
    #[error("backend {backend} is not initialized: {reason}")]
    Uninitialized {
        backend: &'static str,
        reason: String,
    },
    /// None of the requested recipients resolved to usable key material.
    #[error("no usable recipient: {reason}")]
    Recipient { reason: String },
    /// Ciphertext is malformed or the local identity cannot open it.
    #[error("decryption failed: {reason}")]
    Decrypt { reason: String },
    #[error("encryption failed: {reason}")]
    Encrypt { reason: String },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("passphrase agent: {0}")]
    Agent(AgentError),
    #[error("unknown crypto backend: {name}")]
    UnknownBackend { name: String },
    #[error("{backend} does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
    #[error("crypto backend i/o: {reason}")]
    Io { reason: String },
}

impl From<AgentError> for CryptoError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Cancelled(c) => CryptoError::Cancelled(c),
            other => CryptoError::Agent(other),
        }
    }
}

impl From<std::io::Error> for CryptoError {
    fn from(err: std::io::Error) -> Self {
        CryptoError::Io {
            reason: err.to_string(),
        }
    }
}

/// Pluggable encryption scheme bound to one store.
///
/// `name`, `ext` and `id_file` are constants of the implementation. Entry files
/// are named `<entry>.<ext>`; the extension is stored without its dot.
#[async_trait]
pub trait CryptoBackend: Send + Sync {
    /// Ok iff the on-disk material this backend needs exists and is usable.
    async fn initialized(&self, ctx: &Context) -> Result<(), CryptoError>;

    /// Stable backend identifier used for selection and diagnostics.
    fn name(&self) -> &'static str;

    /// On-disk format revision this build understands.
    fn version(&self, ctx: &Context) -> FormatVersion;

    /// Suffix for encrypted entries, without the leading dot.
    fn ext(&self) -> &'static str;

    /// Name of the recipients file, relative to the store root.
    fn id_file(&self) -> &'static str;

    /// Encrypt `plaintext` (possibly empty) for every resolvable recipient.
    async fn encrypt(
        &self,
        ctx: &Context,
        plaintext: &[u8],
        recipients: &[String],
    ) -> Result<Vec<u8>, CryptoError>;

    async fn decrypt(&self, ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Every recipient this backend can encrypt to.
    async fn list_recipients(&self, ctx: &Context) -> Result<Vec<String>, CryptoError>;

    /// Recipients for which local private key material exists.
    async fn list_identities(&self, ctx: &Context) -> Result<Vec<String>, CryptoError>;

    /// Create a new private identity and return its recipient ID.
    async fn generate_identity(&self, ctx: &Context, name: &str) -> Result<String, CryptoError> {
        let _ = (ctx, name);
        Err(CryptoError::Unsupported {
            backend: self.name(),
            operation: "generate_identity",
        })
    }

    async fn export_public_key(&self, ctx: &Context, id: &str) -> Result<Vec<u8>, CryptoError> {
        let _ = (ctx, id);
        Err(CryptoError::Unsupported {
            backend: self.name(),
            operation: "export_public_key",
        })
    }

    /// Import a key produced by `export_public_key`, returning its recipient ID.
    async fn import_public_key(&self, ctx: &Context, key: &[u8]) -> Result<String, CryptoError> {
        let _ = (ctx, key);
        Err(CryptoError::Unsupported {
            backend: self.name(),
            operation: "import_public_key",
        })
    }

    /// Human readable one-line description of a recipient.
    async fn format_key(&self, ctx: &Context, id: &str) -> String {
        let _ = ctx;
        id.to_string()
    }
}
