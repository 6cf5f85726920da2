//! Counter-based one-time codes (HOTP, RFC 4226).
//!
//! The server keeps `(secret, counter)`; the owner's authenticator keeps the
//! same pair and advances its own counter every time it shows a code. The
//! two drift apart whenever the owner generates codes without submitting
//! them, so verification scans a bounded window ahead of the server counter.

use crate::encoding::hex_bytes;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha1 = Hmac<Sha1>;

/// Code length shown by authenticator apps
pub const DEFAULT_DIGITS: u32 = 6;

/// Seed length (160 bits, the RFC 4226 recommendation)
pub const SEED_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum HotpError {
    #[error("Invalid HOTP secret")]
    InvalidSecret,
    #[error("Unsupported digit count: {0}")]
    InvalidDigits(u32),
}

/// HOTP generator state: shared secret plus the next expected counter.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Hotp {
    #[serde(with = "hex_bytes")]
    secret: Vec<u8>,
    counter: u64,
    digits: u32,
}

impl Hotp {
    /// Generate a fresh random seed starting at counter 0.
    pub fn generate(digits: u32) -> Result<Self, HotpError> {
        let mut secret = vec![0u8; SEED_LEN];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(secret, 0, digits)
    }

    /// Rebuild a generator from known state.
    pub fn from_secret(secret: Vec<u8>, counter: u64, digits: u32) -> Result<Self, HotpError> {
        if secret.is_empty() {
            return Err(HotpError::InvalidSecret);
        }
        if !(6..=9).contains(&digits) {
            return Err(HotpError::InvalidDigits(digits));
        }
        Ok(Self {
            secret,
            counter,
            digits,
        })
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    /// The code for an arbitrary counter value.
    pub fn code_at(&self, counter: u64) -> Result<String, HotpError> {
        let mut mac =
            HmacSha1::new_from_slice(&self.secret).map_err(|_| HotpError::InvalidSecret)?;
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        // Dynamic truncation (RFC 4226 §5.3)
        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let binary = ((digest[offset] as u32 & 0x7f) << 24)
            | ((digest[offset + 1] as u32) << 16)
            | ((digest[offset + 2] as u32) << 8)
            | (digest[offset + 3] as u32);

        let code = binary % 10u32.pow(self.digits);
        Ok(format!("{:0width$}", code, width = self.digits as usize))
    }

    /// Produce the code at the current counter and advance it.
    ///
    /// This is what an authenticator does each time the owner asks for a code.
    pub fn next_code(&mut self) -> Result<String, HotpError> {
        let code = self.code_at(self.counter)?;
        self.counter = self.counter.saturating_add(1);
        Ok(code)
    }

    /// Check `code` against counters `counter ..= counter + window`.
    ///
    /// On a match the counter moves past the matched position, so the same
    /// code (and every code before it) can never be accepted again. On a
    /// mismatch the state is untouched.
    pub fn verify(&mut self, code: &str, window: u64) -> Result<bool, HotpError> {
        if code.len() != self.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }

        for offset in 0..=window {
            let Some(candidate) = self.counter.checked_add(offset) else {
                break;
            };
            let expected = self.code_at(candidate)?;
            if bool::from(expected.as_bytes().ct_eq(code.as_bytes())) {
                self.counter = candidate.saturating_add(1);
                return Ok(true);
            }
        }

        Ok(false)
    }
}
