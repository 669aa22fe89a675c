//! `xc`: the built-in, passphrase-protected crypto backend.
//!
//! Per-user X25519 identities live in two JSON keyrings under
//! `<config_dir>/xc/`. Private keys are sealed with a key derived from the
//! agent's passphrase; entries are sealed with a fresh content key that is
//! wrapped once per recipient listed in the store's `.xc-ids` file.

mod envelope;
mod keyring;
mod seal;

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use keeper_core::{
    agent::Agent,
    config::Locations,
    context::Context,
    crypto::{CryptoBackend, CryptoError, FormatVersion},
};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use x25519_dalek::{PublicKey, StaticSecret};

pub use envelope::{Envelope, WrappedKey};
pub use keyring::{fingerprint, PublicEntry, PublicRing, RingPaths, SecretEntry, SecretRing};
pub use seal::KdfParams;

use keyring::decode_public_key;

pub const NAME: &str = "xc";
pub const EXT: &str = "xc";
pub const ID_FILE: &str = ".xc-ids";
/// Bumped only when the keyring or envelope layout changes.
pub const FORMAT_VERSION: FormatVersion = FormatVersion::new(0, 0, 1);

pub struct XcBackend {
    store_root: PathBuf,
    agent: Arc<dyn Agent>,
    rings: RingPaths,
    kdf: KdfParams,
    // Serializes keyring read-modify-write within this instance.
    ring_lock: Mutex<()>,
}

impl std::fmt::Debug for XcBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XcBackend")
            .field("store_root", &self.store_root)
            .field("rings", &self.rings)
            .field("agent", &self.agent.name())
            .finish()
    }
}

impl XcBackend {
    /// Bind to `store_root`, creating empty keyrings under the config dir if
    /// none exist yet.
    pub fn new(
        store_root: impl Into<PathBuf>,
        agent: Arc<dyn Agent>,
        locations: &Locations,
    ) -> Result<Self, CryptoError> {
        let rings = RingPaths::new(&locations.config_dir);
        rings.ensure()?;
        Ok(Self {
            store_root: store_root.into(),
            agent,
            rings,
            kdf: KdfParams::default(),
            ring_lock: Mutex::new(()),
        })
    }

    /// Override the Argon2 cost used for newly sealed identities.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn store_root(&self) -> &std::path::Path {
        &self.store_root
    }

    pub fn rings(&self) -> &RingPaths {
        &self.rings
    }

    fn public_ring(&self) -> Result<PublicRing, CryptoError> {
        PublicRing::load(&self.rings.public)
    }

    fn secret_ring(&self) -> Result<SecretRing, CryptoError> {
        SecretRing::load(&self.rings.secret)
    }

    /// Public keys for `ids`, looked up in both rings. Unknown IDs are skipped.
    fn resolve_recipients(&self, ids: &[String]) -> Result<Vec<(String, PublicKey)>, CryptoError> {
        let public = self.public_ring()?;
        let secret = self.secret_ring()?;
        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            let entry = public
                .get(id)
                .or_else(|| secret.get(id).map(|s| &s.public));
            match entry {
                Some(entry) => resolved.push((id.clone(), entry.key()?)),
                None => warn!(recipient = %id, "no public key for recipient, skipping"),
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl CryptoBackend for XcBackend {
    async fn initialized(&self, ctx: &Context) -> Result<(), CryptoError> {
        ctx.check()?;
        let uninitialized = |reason: String| CryptoError::Uninitialized {
            backend: NAME,
            reason,
        };
        for path in [&self.rings.public, &self.rings.secret] {
            if !path.is_file() {
                return Err(uninitialized(format!("missing keyring {}", path.display())));
            }
        }
        self.public_ring()
            .map_err(|e| uninitialized(format!("public keyring unreadable: {e}")))?;
        self.secret_ring()
            .map_err(|e| uninitialized(format!("secret keyring unreadable: {e}")))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn version(&self, _ctx: &Context) -> FormatVersion {
        FORMAT_VERSION
    }

    fn ext(&self) -> &'static str {
        EXT
    }

    fn id_file(&self) -> &'static str {
        ID_FILE
    }

    #[instrument(skip_all, fields(recipients = recipients.len(), len = plaintext.len()))]
    async fn encrypt(
        &self,
        ctx: &Context,
        plaintext: &[u8],
        recipients: &[String],
    ) -> Result<Vec<u8>, CryptoError> {
        ctx.check()?;
        if recipients.is_empty() {
            return Err(CryptoError::Recipient {
                reason: "recipient list is empty".to_string(),
            });
        }
        let resolved = self.resolve_recipients(recipients)?;
        if resolved.is_empty() {
            return Err(CryptoError::Recipient {
                reason: format!("none of {} recipients has a known public key", recipients.len()),
            });
        }
        let envelope = Envelope::seal(plaintext, &resolved)?;
        ctx.check()?;
        envelope.to_bytes()
    }

    #[instrument(skip_all, fields(len = ciphertext.len()))]
    async fn decrypt(&self, ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        ctx.check()?;
        let envelope = Envelope::from_bytes(ciphertext)?;
        let ring = self.secret_ring()?;
        let candidates: Vec<(WrappedKey, SecretEntry)> = envelope
            .recipients
            .iter()
            .filter_map(|w| ring.get(&w.id).map(|s| (w.clone(), s.clone())))
            .collect();
        if candidates.is_empty() {
            return Err(CryptoError::Decrypt {
                reason: "not encrypted for any local identity".to_string(),
            });
        }

        let passphrase = self.agent.passphrase(ctx, "unlock xc identity").await?;
        debug!(candidates = candidates.len(), "unlocking xc identity");
        let work = tokio::task::spawn_blocking(move || {
            let mut last_err = None;
            for (wrapped, entry) in &candidates {
                match entry
                    .unseal(&passphrase)
                    .and_then(|secret| envelope.open(wrapped, &secret))
                {
                    Ok(plaintext) => return Ok(plaintext),
                    Err(err) => last_err = Some(err),
                }
            }
            Err(last_err.unwrap_or_else(|| CryptoError::Decrypt {
                reason: "no identity could open the ciphertext".to_string(),
            }))
        });
        ctx.run(work)
            .await?
            .map_err(|e| CryptoError::Decrypt {
                reason: format!("decrypt task: {e}"),
            })?
    }

    async fn list_recipients(&self, ctx: &Context) -> Result<Vec<String>, CryptoError> {
        ctx.check()?;
        let mut ids = self.public_ring()?.ids();
        for id in self.secret_ring()?.ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn list_identities(&self, ctx: &Context) -> Result<Vec<String>, CryptoError> {
        ctx.check()?;
        let mut ids = self.secret_ring()?.ids();
        ids.sort();
        Ok(ids)
    }

    #[instrument(skip(self, ctx))]
    async fn generate_identity(&self, ctx: &Context, name: &str) -> Result<String, CryptoError> {
        ctx.check()?;
        let passphrase = self.agent.passphrase(ctx, "protect new xc identity").await?;
        let name_owned = name.to_string();
        let kdf = self.kdf;
        let work = tokio::task::spawn_blocking(move || {
            let secret = StaticSecret::random_from_rng(aes_gcm::aead::OsRng);
            SecretEntry::seal(&name_owned, &secret, &passphrase, kdf)
        });
        let entry = ctx.run(work).await?.map_err(|e| CryptoError::Encrypt {
            reason: format!("keygen task: {e}"),
        })??;

        // Last chance to back out before touching disk.
        ctx.check()?;
        let _guard = self.ring_lock.lock().await;
        let mut secret_ring = self.secret_ring()?;
        let mut public_ring = self.public_ring()?;
        let id = entry.public.id.clone();
        public_ring.upsert(entry.public.clone());
        secret_ring.upsert(entry);
        secret_ring.save(&self.rings.secret)?;
        keyring::restrict_permissions(&self.rings.secret)?;
        public_ring.save(&self.rings.public)?;
        debug!(%id, "generated xc identity");
        Ok(id)
    }

    async fn export_public_key(&self, ctx: &Context, id: &str) -> Result<Vec<u8>, CryptoError> {
        ctx.check()?;
        let public = self.public_ring()?;
        let secret = self.secret_ring()?;
        let entry = public
            .get(id)
            .or_else(|| secret.get(id).map(|s| &s.public))
            .ok_or_else(|| CryptoError::Recipient {
                reason: format!("unknown recipient {id}"),
            })?;
        serde_json::to_vec_pretty(entry).map_err(|e| CryptoError::Io {
            reason: e.to_string(),
        })
    }

    async fn import_public_key(&self, ctx: &Context, key: &[u8]) -> Result<String, CryptoError> {
        ctx.check()?;
        let entry: PublicEntry = serde_json::from_slice(key).map_err(|e| CryptoError::Recipient {
            reason: format!("malformed public key: {e}"),
        })?;
        let public = decode_public_key(&entry.public_key)
            .map_err(|reason| CryptoError::Recipient { reason })?;
        if fingerprint(&public) != entry.id {
            return Err(CryptoError::Recipient {
                reason: format!("fingerprint mismatch for {}", entry.id),
            });
        }
        let _guard = self.ring_lock.lock().await;
        let mut ring = self.public_ring()?;
        let id = entry.id.clone();
        ring.upsert(entry);
        ring.save(&self.rings.public)?;
        Ok(id)
    }

    async fn format_key(&self, _ctx: &Context, id: &str) -> String {
        let name = self.public_ring().ok().and_then(|ring| ring.get(id).map(|e| e.name.clone()));
        match name {
            Some(name) if !name.is_empty() => format!("{id} - {name}"),
            _ => id.to_string(),
        }
    }
}
