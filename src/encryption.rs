//! Field encryption for storage credentials.
//!
//! Backends only see the [`FieldEncryptor`] trait. [`AesGcmFieldEncryptor`] is the
//! bundled implementation: AES-256-GCM with a fresh nonce per value, stored as
//! `enc:` followed by base64 of `nonce || ciphertext`.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Prefix marking a value as already encrypted
pub const ENCRYPTED_PREFIX: &str = "enc:";

/// Nonce size in bytes (96 bits for AES-GCM)
pub const NONCE_SIZE_BYTES: usize = 12;

/// Key size in bytes (256 bits for AES-256)
pub const KEY_SIZE_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("invalid key: expected {expected} bytes, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("cipher failure: {0}")]
    Cipher(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque encrypt/decrypt capability for secret configuration fields
pub trait FieldEncryptor: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError>;

    fn decrypt(&self, value: &str) -> Result<String, EncryptionError>;
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// AES-256-GCM field encryptor
pub struct AesGcmFieldEncryptor {
    cipher: Aes256Gcm,
}

impl AesGcmFieldEncryptor {
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.len() != KEY_SIZE_BYTES {
            return Err(EncryptionError::InvalidKey {
                expected: KEY_SIZE_BYTES,
                actual: key.len(),
            });
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| EncryptionError::Cipher(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn from_base64(key: &str) -> Result<Self, EncryptionError> {
        let bytes = BASE64
            .decode(key.trim())
            .map_err(|e| EncryptionError::Malformed(format!("invalid key encoding: {}", e)))?;
        Self::new(&bytes)
    }

    /// Random key, useful for tests and first-run setup
    pub fn generate() -> Result<Self, EncryptionError> {
        let mut key = [0u8; KEY_SIZE_BYTES];
        OsRng.fill_bytes(&mut key);
        Self::new(&key)
    }

    /// Load the key from `path`, generating and persisting one if the file is absent
    pub async fn load_or_create(path: &Path) -> Result<Self, EncryptionError> {
        if path.exists() {
            let bytes = fs::read(path).await?;
            return Self::new(&bytes);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut key = [0u8; KEY_SIZE_BYTES];
        OsRng.fill_bytes(&mut key);

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        // owner read/write only
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(path).await?;
        file.write_all(&key).await?;
        file.sync_all().await?;
        tracing::info!(path = %path.display(), "Generated new field encryption key");

        Self::new(&key)
    }
}

impl AesGcmFieldEncryptor {
    /// Decrypt the base64 payload that follows the `enc:` prefix
    fn open(&self, encoded: &str) -> Result<String, EncryptionError> {
        let payload = BASE64
            .decode(encoded)
            .map_err(|e| EncryptionError::Malformed(format!("invalid encoding: {}", e)))?;
        if payload.len() <= NONCE_SIZE_BYTES {
            return Err(EncryptionError::Malformed("payload too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE_BYTES);
        let decrypted = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| EncryptionError::Cipher(format!("decryption failed: {}", e)))?;

        String::from_utf8(decrypted).map_err(|e| EncryptionError::Malformed(format!("invalid UTF-8: {}", e)))
    }
}

impl FieldEncryptor for AesGcmFieldEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        // Only ciphertext this key opens is passed through; a secret that merely
        // starts with the prefix is still plaintext.
        if let Some(encoded) = plaintext.strip_prefix(ENCRYPTED_PREFIX) {
            if self.open(encoded).is_ok() {
                return Ok(plaintext.to_string());
            }
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE_BYTES];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let encrypted = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::Cipher(format!("encryption failed: {}", e)))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE_BYTES + encrypted.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&encrypted);

        Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(payload)))
    }

    fn decrypt(&self, value: &str) -> Result<String, EncryptionError> {
        match value.strip_prefix(ENCRYPTED_PREFIX) {
            Some(encoded) => self.open(encoded),
            // rows written before encryption was enabled
            None => Ok(value.to_string()),
        }
    }
}
