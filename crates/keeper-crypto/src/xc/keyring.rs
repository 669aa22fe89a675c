use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use keeper_core::crypto::CryptoError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::seal::{self, KdfParams, KEY_LEN};

const RING_FORMAT: u32 = 1;
const FINGERPRINT_LEN: usize = 20;

/// Recipient ID of a public key: hex of the first 20 bytes of its SHA-256.
pub fn fingerprint(key: &PublicKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..FINGERPRINT_LEN])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicEntry {
    pub id: String,
    pub name: String,
    pub public_key: String,
}

impl PublicEntry {
    pub fn new(name: &str, key: &PublicKey) -> Self {
        Self {
            id: fingerprint(key),
            name: name.to_string(),
            public_key: STANDARD.encode(key.as_bytes()),
        }
    }

    pub fn key(&self) -> Result<PublicKey, CryptoError> {
        decode_public_key(&self.public_key).map_err(|reason| CryptoError::Recipient {
            reason: format!("public key {}: {reason}", self.id),
        })
    }
}

/// Private key sealed under a passphrase-derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    #[serde(flatten)]
    pub public: PublicEntry,
    pub kdf: KdfParams,
    pub salt: String,
    pub nonce: String,
    pub sealed_key: String,
}

impl SecretEntry {
    /// Seal `secret` under `passphrase`. CPU heavy; call off the async runtime.
    pub fn seal(
        name: &str,
        secret: &StaticSecret,
        passphrase: &str,
        kdf: KdfParams,
    ) -> Result<Self, CryptoError> {
        let salt = seal::random_salt();
        let key = seal::derive_passphrase_key(passphrase.as_bytes(), &salt, kdf)
            .map_err(|e| CryptoError::Encrypt { reason: e.0 })?;
        let secret_bytes = Zeroizing::new(secret.to_bytes());
        let (nonce, sealed) =
            seal::seal(&key, secret_bytes.as_slice()).map_err(|e| CryptoError::Encrypt {
                reason: e.0,
            })?;
        Ok(Self {
            public: PublicEntry::new(name, &PublicKey::from(secret)),
            kdf,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            sealed_key: STANDARD.encode(sealed),
        })
    }

    /// Recover the private key. A wrong passphrase surfaces as `Decrypt`.
    /// CPU heavy; call off the async runtime.
    pub fn unseal(&self, passphrase: &str) -> Result<StaticSecret, CryptoError> {
        let decrypt_err = |reason: String| CryptoError::Decrypt {
            reason: format!("identity {}: {reason}", self.public.id),
        };
        let salt = STANDARD
            .decode(&self.salt)
            .map_err(|e| decrypt_err(format!("salt: {e}")))?;
        let nonce = STANDARD
            .decode(&self.nonce)
            .map_err(|e| decrypt_err(format!("nonce: {e}")))?;
        let sealed = STANDARD
            .decode(&self.sealed_key)
            .map_err(|e| decrypt_err(format!("sealed key: {e}")))?;

        let key = seal::derive_passphrase_key(passphrase.as_bytes(), &salt, self.kdf)
            .map_err(|e| decrypt_err(e.0))?;
        let bytes = Zeroizing::new(
            seal::open(&key, &nonce, &sealed)
                .map_err(|_| decrypt_err("wrong passphrase or corrupted key".to_string()))?,
        );
        let array: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| decrypt_err(format!("expected {KEY_LEN} key bytes")))?;
        Ok(StaticSecret::from(array))
    }
}

/// On-disk keyring: a JSON document holding entries of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRing<E> {
    pub format: u32,
    pub keys: Vec<E>,
}

impl<E> Default for KeyRing<E> {
    fn default() -> Self {
        Self {
            format: RING_FORMAT,
            keys: Vec::new(),
        }
    }
}

pub type PublicRing = KeyRing<PublicEntry>;
pub type SecretRing = KeyRing<SecretEntry>;

pub trait RingEntry {
    fn id(&self) -> &str;
}

impl RingEntry for PublicEntry {
    fn id(&self) -> &str {
        &self.id
    }
}

impl RingEntry for SecretEntry {
    fn id(&self) -> &str {
        &self.public.id
    }
}

impl<E> KeyRing<E>
where
    E: RingEntry + Serialize + for<'de> Deserialize<'de>,
{
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let bytes = fs::read(path)?;
        let ring: Self = serde_json::from_slice(&bytes).map_err(|e| CryptoError::Io {
            reason: format!("keyring {}: {e}", path.display()),
        })?;
        if ring.format != RING_FORMAT {
            return Err(CryptoError::Io {
                reason: format!(
                    "keyring {} has format {}, expected {RING_FORMAT}",
                    path.display(),
                    ring.format
                ),
            });
        }
        Ok(ring)
    }

    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        let parent = path.parent().ok_or_else(|| CryptoError::Io {
            reason: format!("invalid keyring path {}", path.display()),
        })?;
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        let json = serde_json::to_vec_pretty(self).map_err(|e| CryptoError::Io {
            reason: e.to_string(),
        })?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| CryptoError::from(e.error))?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.keys.iter().find(|entry| entry.id() == id)
    }

    /// Insert or replace the entry with the same ID.
    pub fn upsert(&mut self, entry: E) {
        match self.keys.iter_mut().find(|e| e.id() == entry.id()) {
            Some(existing) => *existing = entry,
            None => self.keys.push(entry),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.keys.iter().map(|e| e.id().to_string()).collect()
    }
}

/// Paths of the two keyrings for one config directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingPaths {
    pub public: PathBuf,
    pub secret: PathBuf,
}

impl RingPaths {
    pub fn new(config_dir: &Path) -> Self {
        let dir = config_dir.join("xc");
        Self {
            public: dir.join("pubring.json"),
            secret: dir.join("secring.json"),
        }
    }

    /// Write empty rings for any that are missing.
    pub fn ensure(&self) -> Result<(), CryptoError> {
        if !self.public.exists() {
            PublicRing::default().save(&self.public)?;
        }
        if !self.secret.exists() {
            SecretRing::default().save(&self.secret)?;
            restrict_permissions(&self.secret)?;
        }
        Ok(())
    }
}

pub(crate) fn decode_public_key(encoded: &str) -> Result<PublicKey, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("base64: {e}"))?;
    let array: [u8; KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("expected {KEY_LEN} bytes, got {}", bytes.len()))?;
    Ok(PublicKey::from(array))
}

pub(crate) fn restrict_permissions(path: &Path) -> Result<(), CryptoError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use aes_gcm::aead::OsRng;

    use super::*;

    #[test]
    fn fingerprint_is_forty_hex_chars_and_stable() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let id = fingerprint(&public);
        assert_eq!(id.len(), 2 * FINGERPRINT_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, fingerprint(&public));
    }

    #[test]
    fn secret_entry_unseals_only_with_right_passphrase() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let kdf = KdfParams {
            m_cost: 1024,
            t_cost: 1,
            p_cost: 1,
        };
        let entry = SecretEntry::seal("alice", &secret, "correct horse", kdf).expect("seal");
        let recovered = entry.unseal("correct horse").expect("unseal");
        assert_eq!(recovered.to_bytes(), secret.to_bytes());

        let err = entry.unseal("wrong").err().expect("wrong passphrase");
        assert!(matches!(err, CryptoError::Decrypt { .. }));
    }

    #[test]
    fn rings_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = RingPaths::new(dir.path());
        paths.ensure().expect("ensure");
        assert!(PublicRing::load(&paths.public).expect("pub").keys.is_empty());

        let secret = StaticSecret::random_from_rng(OsRng);
        let mut ring = PublicRing::load(&paths.public).expect("load");
        let entry = PublicEntry::new("bob", &PublicKey::from(&secret));
        ring.upsert(entry.clone());
        ring.upsert(entry.clone());
        ring.save(&paths.public).expect("save");

        let reloaded = PublicRing::load(&paths.public).expect("reload");
        assert_eq!(reloaded.keys, vec![entry.clone()]);
        assert_eq!(reloaded.get(&entry.id), Some(&entry));
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pubring.json");
        fs::write(&path, b"not json").expect("write");
        assert!(matches!(
            PublicRing::load(&path),
            Err(CryptoError::Io { .. })
        ));
    }
}
