//! Symmetric encryption of credential material at rest.
//!
//! Every secret the vault persists is sealed with AES-256-GCM under a single
//! process-wide [`VaultKey`]. The configured salt is bound to each ciphertext
//! as associated data, so material sealed under another deployment's salt
//! will not open even with the same key.
//!
//! # Security Notes
//!
//! - AES-256-GCM provides authenticated encryption
//! - Each seal uses a fresh random nonce
//! - Key material is zeroized on drop and never printed by `Debug`

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Argon2id parameters for passphrase-derived vault keys
/// - m_cost: 64 MiB memory
/// - t_cost: 3 iterations
/// - p_cost: 4 parallel threads
const ARGON2_M_COST: u32 = 65536; // 64 MiB
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

/// AES-256 key length
pub const KEY_LEN: usize = 32;

/// Shortest salt accepted for a vault key
pub const MIN_SALT_LEN: usize = 16;

/// Nonce length for AES-256-GCM
const NONCE_LEN: usize = 12;

/// GCM authentication tag length
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
    #[error("Invalid ciphertext format")]
    InvalidFormat,
}

/// Process-wide symmetric key and salt used to seal credential material.
///
/// Built once at startup from configuration and handed to
/// [`CredentialVault`](crate::vault::CredentialVault). Read-only afterwards,
/// so it can be shared across workers without locking.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_LEN],
    salt: Vec<u8>,
}

impl VaultKey {
    /// Use a raw 32-byte key.
    pub fn from_bytes(key: &[u8], salt: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        check_salt(salt)?;

        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(key);
        Ok(Self {
            key: bytes,
            salt: salt.to_vec(),
        })
    }

    /// Derive the key from a passphrase using Argon2id over the salt.
    pub fn derive(passphrase: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        check_salt(salt)?;

        let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(KEY_LEN))
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_LEN];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        Ok(Self {
            key,
            salt: salt.to_vec(),
        })
    }

    /// The salt bound to every ciphertext sealed under this key.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &self.salt,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt bytes produced by [`seal`](Self::seal).
    ///
    /// # Errors
    /// Returns error if the key or salt differ, or the ciphertext was tampered with
    pub fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidFormat);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &self.salt,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)?;

        Ok(Zeroizing::new(plaintext))
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey")
            .field("key", &"<redacted>")
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

fn check_salt(salt: &[u8]) -> Result<(), CryptoError> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "salt must be at least {} bytes, got {}",
            MIN_SALT_LEN,
            salt.len()
        )));
    }
    Ok(())
}
