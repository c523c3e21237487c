//! Encryption primitives: AEAD secret storage, token minting, token hashing.
//!
//! XChaCha20-Poly1305 with a 24-byte random nonce prefixed to the ciphertext
//! (`[nonce][ciphertext+tag]`), the same construction and layout used
//! elsewhere in the wider credential-vault ecosystem this crate draws on.
//! The process-wide master key is 32 raw bytes, base64-encoded in
//! `BOT_MASTER_KEY`; its absence or malformation is a fatal init error.

#![allow(deprecated)] // chacha20poly1305 pulls in generic-array 0.x

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use once_cell::sync::OnceCell;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("BOT_MASTER_KEY is not set")]
    MissingMasterKey,
    #[error("BOT_MASTER_KEY is not valid base64: {0}")]
    InvalidEncoding(String),
    #[error("BOT_MASTER_KEY must decode to exactly 32 bytes, got {0}")]
    WrongKeyLength(usize),
    #[error("decryption failed: ciphertext too short or authentication tag mismatch")]
    DecryptFailed,
}

static MASTER_KEY: OnceCell<[u8; 32]> = OnceCell::new();

/// Loads and caches the process-wide master key. Call once at startup;
/// fails fatally (per §4.1) if the key is missing or malformed.
pub fn init_master_key() -> Result<(), CryptoError> {
    let raw = std::env::var("BOT_MASTER_KEY").map_err(|_| CryptoError::MissingMasterKey)?;
    let mut decoded = URL_SAFE_NO_PAD
        .decode(raw.trim())
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(raw.trim()))
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
    if decoded.len() != 32 {
        let len = decoded.len();
        decoded.zeroize();
        return Err(CryptoError::WrongKeyLength(len));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded);
    decoded.zeroize();
    MASTER_KEY
        .set(key)
        .map_err(|_| CryptoError::InvalidEncoding("master key already initialized".to_string()))?;
    Ok(())
}

fn master_key() -> &'static [u8; 32] {
    MASTER_KEY
        .get()
        .expect("crypto::init_master_key was not called at startup")
}

/// A decrypted secret. Zeroized on drop so plaintext credentials never
/// linger in memory beyond the request that needed them.
pub struct Secret(String);

impl Secret {
    pub(crate) fn new(value: String) -> Self {
        Secret(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Clone for Secret {
    fn clone(&self) -> Self {
        Secret(self.0.clone())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

pub fn encrypt(plaintext: &str) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(master_key().into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("XChaCha20-Poly1305 encryption cannot fail for a well-formed key");
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

pub fn decrypt(ciphertext: &[u8]) -> Result<Secret, CryptoError> {
    if ciphertext.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptFailed);
    }
    let (nonce_bytes, ct) = ciphertext.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(master_key().into());
    let plaintext = cipher
        .decrypt(nonce, ct)
        .map_err(|_| CryptoError::DecryptFailed)?;
    let text = String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)?;
    Ok(Secret(text))
}

/// 32 bytes of CSPRNG randomness, URL-safe base64 (no padding).
pub fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Deterministic SHA-256 digest, hex-encoded, for lookup-by-hash.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_key() {
        INIT.call_once(|| {
            let key = [0x11u8; 32];
            std::env::set_var("BOT_MASTER_KEY", URL_SAFE_NO_PAD.encode(key));
            init_master_key().unwrap();
        });
    }

    #[test]
    fn round_trip() {
        ensure_key();
        let secret = "sk-super-secret-value";
        let ciphertext = encrypt(secret);
        let decrypted = decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted.as_str(), secret);
    }

    #[test]
    fn fresh_nonce_each_call() {
        ensure_key();
        let a = encrypt("same plaintext");
        let b = encrypt("same plaintext");
        assert_ne!(a, b);
        assert_eq!(decrypt(&a).unwrap().as_str(), decrypt(&b).unwrap().as_str());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        ensure_key();
        let mut ciphertext = encrypt("value");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(decrypt(&ciphertext).is_err());
    }

    #[test]
    fn mint_token_is_unpredictable() {
        assert_ne!(hash_token(&mint_token()), hash_token(&mint_token()));
    }

    #[test]
    fn hash_token_is_deterministic() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
    }
}
