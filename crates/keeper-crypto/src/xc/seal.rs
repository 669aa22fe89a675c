//! Symmetric building blocks for the xc format: AES-256-GCM sealing,
//! Argon2id passphrase keys and HKDF-derived key-wrapping keys.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey, SharedSecret};
use zeroize::Zeroizing;

pub(crate) const KEY_LEN: usize = 32;
pub(crate) const NONCE_LEN: usize = 12;
pub(crate) const SALT_LEN: usize = 16;

const WRAP_INFO: &[u8] = b"keeper/xc/v1/wrap";

/// Argon2id cost parameters, persisted next to every sealed key so a later
/// change of defaults never orphans existing key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19_456,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

/// Failures here are mapped by callers onto the crypto error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SealError(pub String);

pub(crate) fn random_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut *key);
    key
}

pub(crate) fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub(crate) fn derive_passphrase_key(
    passphrase: &[u8],
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, SealError> {
    let params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEY_LEN))
        .map_err(|e| SealError(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase, salt, &mut *out)
        .map_err(|e| SealError(format!("argon2: {e}")))?;
    Ok(out)
}

/// Key that wraps a content key for one recipient.
///
/// Salted with both public halves so a wrap is bound to its exact key pair.
pub(crate) fn derive_wrap_key(
    shared: &SharedSecret,
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<Zeroizing<[u8; KEY_LEN]>, SealError> {
    let mut salt = [0u8; 2 * KEY_LEN];
    salt[..KEY_LEN].copy_from_slice(ephemeral.as_bytes());
    salt[KEY_LEN..].copy_from_slice(recipient.as_bytes());
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(WRAP_INFO, &mut *out)
        .map_err(|e| SealError(format!("hkdf expand: {e}")))?;
    Ok(out)
}

/// AES-256-GCM encrypt; returns `(nonce, ciphertext)`.
pub(crate) fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), SealError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| SealError(format!("cipher init: {e}")))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| SealError(format!("encrypt: {e}")))?;
    Ok((nonce.to_vec(), ciphertext))
}

pub(crate) fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, SealError> {
    if nonce.len() != NONCE_LEN {
        return Err(SealError(format!(
            "expected {NONCE_LEN} byte nonce, got {}",
            nonce.len()
        )));
    }
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| SealError(format!("cipher init: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SealError("authentication failed".to_string()))
}
