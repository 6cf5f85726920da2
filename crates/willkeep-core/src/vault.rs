//! Credential vault: issues and verifies liveness proofs.
//!
//! A [`Credential`] holds two classes of sealed secret:
//!
//! - **software token**: the owner's HOTP seed and counter
//! - **secondary keys**: single-use fallback keys, for when the
//!   authenticator is lost
//!
//! Every successful verification returns a *new* credential. The caller
//! must persist it: the old one still carries the previous counter (or the
//! spent fallback key) and would accept the same proof again.

use crate::crypto::{CryptoError, VaultKey};
use crate::encoding::{base32_encode, hex_bytes, hex_list, percent_encode};
use crate::hotp::{Hotp, HotpError, DEFAULT_DIGITS};
use qrcode::QrCode;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// A liveness proof was rejected.
///
/// Deliberately carries no cause: mismatches, undecryptable material and
/// exhausted fallback keys all look the same to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("authentication failed")]
pub struct AuthFailure;

/// Errors while issuing credentials
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("OTP error: {0}")]
    Otp(#[from] HotpError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Enrollment rendering failed: {0}")]
    Enrollment(String),

    #[error("Invalid vault settings: {0}")]
    InvalidSettings(String),
}

/// Tunables for credential issuance and verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// How many counter steps ahead of the server a code may be
    pub otp_tolerance: u64,
    /// Fallback keys minted per credential
    pub secondary_keys_number: usize,
    /// Raw length of each fallback key in bytes
    pub secondary_key_len: usize,
    /// Issuer label shown by authenticator apps
    pub issuer: String,
    /// Digits per one-time code
    pub digits: u32,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            otp_tolerance: 7,
            secondary_keys_number: 4,
            secondary_key_len: 16,
            issuer: "willkeep".to_string(),
            digits: DEFAULT_DIGITS,
        }
    }
}

/// One authentication factor bound to a will's owner. Sealed at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Sealed HOTP state
    #[serde(with = "hex_bytes")]
    pub software_token: Vec<u8>,
    /// Sealed fallback keys, in issue order
    #[serde(with = "hex_list")]
    pub secondary_keys: Vec<Vec<u8>>,
}

impl Credential {
    /// Fallback keys not yet spent
    pub fn remaining_fallback_keys(&self) -> usize {
        self.secondary_keys.len()
    }
}

/// The one-time plaintext view handed to the owner at issue time.
///
/// Never persisted; zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Enrollment {
    /// `otpauth://hotp/...` provisioning URI
    pub uri: String,
    /// Terminal-renderable QR code of `uri`
    pub qr: String,
    /// Hex-encoded fallback keys
    pub fallback_keys: Vec<String>,
    seed: Hotp,
}

impl Enrollment {
    /// A copy of the authenticator state the owner enrolls.
    pub fn authenticator(&self) -> Hotp {
        self.seed.clone()
    }
}

impl fmt::Debug for Enrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enrollment")
            .field("uri", &"<redacted>")
            .field("fallback_keys", &self.fallback_keys.len())
            .finish()
    }
}

/// Issues and verifies credentials under one vault key.
#[derive(Debug)]
pub struct CredentialVault {
    key: VaultKey,
    settings: VaultSettings,
}

impl CredentialVault {
    pub fn new(key: VaultKey, settings: VaultSettings) -> Result<Self, VaultError> {
        if settings.secondary_keys_number == 0 {
            return Err(VaultError::InvalidSettings(
                "secondary_keys_number must be > 0".into(),
            ));
        }
        if settings.secondary_key_len < 16 {
            return Err(VaultError::InvalidSettings(
                "secondary_key_len must be >= 16".into(),
            ));
        }
        if settings.issuer.is_empty() {
            return Err(VaultError::InvalidSettings("issuer must not be empty".into()));
        }
        Ok(Self { key, settings })
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    /// Mint a credential for `owner_name`.
    ///
    /// Returns the sealed credential (safe to persist) and the enrollment
    /// bundle (show it once, then drop it).
    pub fn issue(&self, owner_name: &str) -> Result<(Credential, Enrollment), VaultError> {
        let seed = Hotp::generate(self.settings.digits)?;

        let uri = self.provisioning_uri(owner_name, &seed);
        let qr = QrCode::new(uri.as_bytes())
            .map_err(|e| VaultError::Enrollment(format!("QR encode: {}", e)))?
            .render::<char>()
            .quiet_zone(true)
            .module_dimensions(2, 1)
            .build();

        let state = Zeroizing::new(serde_json::to_vec(&seed)?);
        let software_token = self.key.seal(&state)?;

        let mut fallback_keys = Vec::with_capacity(self.settings.secondary_keys_number);
        let mut secondary_keys = Vec::with_capacity(self.settings.secondary_keys_number);
        for _ in 0..self.settings.secondary_keys_number {
            let mut raw = Zeroizing::new(vec![0u8; self.settings.secondary_key_len]);
            OsRng.fill_bytes(&mut raw);
            secondary_keys.push(self.key.seal(&raw)?);
            fallback_keys.push(hex::encode(raw.as_slice()));
        }

        log::debug!(
            "Issued credential for {} with {} fallback keys",
            owner_name,
            secondary_keys.len()
        );

        Ok((
            Credential {
                software_token,
                secondary_keys,
            },
            Enrollment {
                uri,
                qr,
                fallback_keys,
                seed,
            },
        ))
    }

    /// Verify a one-time code and return the credential with its counter advanced.
    pub fn verify_otp(&self, code: &str, credential: &Credential) -> Result<Credential, AuthFailure> {
        let state = self
            .key
            .open(&credential.software_token)
            .map_err(|_| reject("software token did not decrypt"))?;
        let mut seed: Hotp =
            serde_json::from_slice(&state).map_err(|_| reject("software token did not parse"))?;

        let matched = seed
            .verify(code.trim(), self.settings.otp_tolerance)
            .map_err(|_| reject("software token unusable"))?;
        if !matched {
            return Err(reject("code outside tolerance window"));
        }

        let state = Zeroizing::new(
            serde_json::to_vec(&seed).map_err(|_| reject("software token did not serialize"))?,
        );
        let software_token = self.key.seal(&state).map_err(|e| {
            log::error!("Failed to reseal software token: {}", e);
            AuthFailure
        })?;

        Ok(Credential {
            software_token,
            secondary_keys: credential.secondary_keys.clone(),
        })
    }

    /// Verify a hex-encoded fallback key and return the credential without it.
    pub fn verify_fallback_key(
        &self,
        raw_key: &str,
        credential: &Credential,
    ) -> Result<Credential, AuthFailure> {
        let presented = Zeroizing::new(
            hex::decode(raw_key.trim()).map_err(|_| reject("fallback key is not hex"))?,
        );

        for (idx, sealed) in credential.secondary_keys.iter().enumerate() {
            // A damaged entry must not lock the owner out of the rest.
            let Ok(stored) = self.key.open(sealed) else {
                log::warn!("Fallback key {} did not decrypt; skipping it", idx);
                continue;
            };
            if bool::from(stored.as_slice().ct_eq(presented.as_slice())) {
                let mut updated = credential.clone();
                updated.secondary_keys.remove(idx);
                return Ok(updated);
            }
        }

        Err(reject("no fallback key matched"))
    }

    fn provisioning_uri(&self, owner_name: &str, seed: &Hotp) -> String {
        let issuer = percent_encode(&self.settings.issuer);
        format!(
            "otpauth://hotp/{}:{}?secret={}&issuer={}&counter={}&digits={}&algorithm=SHA1",
            issuer,
            percent_encode(owner_name),
            base32_encode(seed.secret()),
            issuer,
            seed.counter(),
            seed.digits()
        )
    }
}

fn reject(reason: &str) -> AuthFailure {
    log::debug!("Liveness proof rejected: {}", reason);
    AuthFailure
}
