//! xc ciphertext layout: one payload sealed under a random content key, and
//! that content key wrapped once per recipient.

use aes_gcm::aead::OsRng;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use keeper_core::crypto::CryptoError;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::{
    keyring::decode_public_key,
    seal::{self, KEY_LEN},
};

pub(crate) const ENVELOPE_FORMAT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Recipient ID the content key was wrapped for.
    pub id: String,
    pub ephemeral: String,
    pub nonce: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub format: u32,
    pub recipients: Vec<WrappedKey>,
    pub nonce: String,
    pub ciphertext: String,
}

impl Envelope {
    /// Seal `plaintext` for every `(id, key)` pair.
    pub fn seal(plaintext: &[u8], recipients: &[(String, PublicKey)]) -> Result<Self, CryptoError> {
        if recipients.is_empty() {
            return Err(CryptoError::Recipient {
                reason: "no recipients".to_string(),
            });
        }
        let encrypt_err = |e: seal::SealError| CryptoError::Encrypt { reason: e.0 };

        let content_key = seal::random_key();
        let (nonce, ciphertext) = seal::seal(&content_key, plaintext).map_err(encrypt_err)?;

        let mut wrapped = Vec::with_capacity(recipients.len());
        for (id, recipient) in recipients {
            let ephemeral = EphemeralSecret::random_from_rng(OsRng);
            let ephemeral_pub = PublicKey::from(&ephemeral);
            let shared = ephemeral.diffie_hellman(recipient);
            let wrap_key =
                seal::derive_wrap_key(&shared, &ephemeral_pub, recipient).map_err(encrypt_err)?;
            let (key_nonce, key_ct) =
                seal::seal(&wrap_key, content_key.as_slice()).map_err(encrypt_err)?;
            wrapped.push(WrappedKey {
                id: id.clone(),
                ephemeral: STANDARD.encode(ephemeral_pub.as_bytes()),
                nonce: STANDARD.encode(key_nonce),
                key: STANDARD.encode(key_ct),
            });
        }

        Ok(Self {
            format: ENVELOPE_FORMAT,
            recipients: wrapped,
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Encrypt {
            reason: format!("serialize envelope: {e}"),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| CryptoError::Decrypt {
                reason: format!("malformed ciphertext: {e}"),
            })?;
        if envelope.format != ENVELOPE_FORMAT {
            return Err(CryptoError::Decrypt {
                reason: format!("unsupported envelope format {}", envelope.format),
            });
        }
        if envelope.recipients.is_empty() {
            return Err(CryptoError::Decrypt {
                reason: "ciphertext has no recipients".to_string(),
            });
        }
        Ok(envelope)
    }

    pub fn recipient_ids(&self) -> impl Iterator<Item = &str> {
        self.recipients.iter().map(|w| w.id.as_str())
    }

    /// Open the payload using the private key behind `wrapped`.
    pub fn open(&self, wrapped: &WrappedKey, secret: &StaticSecret) -> Result<Vec<u8>, CryptoError> {
        let decrypt_err = |reason: String| CryptoError::Decrypt { reason };

        let ephemeral = decode_public_key(&wrapped.ephemeral)
            .map_err(|e| decrypt_err(format!("ephemeral key: {e}")))?;
        let recipient = PublicKey::from(secret);
        let shared = secret.diffie_hellman(&ephemeral);
        let wrap_key =
            seal::derive_wrap_key(&shared, &ephemeral, &recipient).map_err(|e| decrypt_err(e.0))?;

        let key_nonce = decode(&wrapped.nonce, "key nonce")?;
        let key_ct = decode(&wrapped.key, "wrapped key")?;
        let content_key = Zeroizing::new(
            seal::open(&wrap_key, &key_nonce, &key_ct)
                .map_err(|e| decrypt_err(format!("unwrap content key: {}", e.0)))?,
        );
        let content_key: Zeroizing<[u8; KEY_LEN]> = Zeroizing::new(
            content_key
                .as_slice()
                .try_into()
                .map_err(|_| decrypt_err("content key has wrong length".to_string()))?,
        );

        let nonce = decode(&self.nonce, "nonce")?;
        let ciphertext = decode(&self.ciphertext, "ciphertext")?;
        seal::open(&content_key, &nonce, &ciphertext)
            .map_err(|e| decrypt_err(format!("payload: {}", e.0)))
    }
}

fn decode(field: &str, what: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD.decode(field).map_err(|e| CryptoError::Decrypt {
        reason: format!("{what}: {e}"),
    })
}
