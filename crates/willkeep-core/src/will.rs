//! The will aggregate and its time-to-delivery lifecycle.
//!
//! ```text
//! create ──► pending ──(refresh)──► pending ──(now > TTD)──► deliverable ──► exhausted ──► purged
//!              ▲    │
//!              └────┘ verify_liveness (credential state only, TTD unchanged)
//! ```
//!
//! Liveness verification and deadline refresh are separate operations. A
//! check-in composes them: verify the proof, persist the updated
//! credential, then refresh.

use crate::encoding::{duration_millis, hex_bytes};
use crate::vault::{AuthFailure, Credential, CredentialVault, Enrollment, VaultError};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Length of the secret that unlocks the sealed reference on release
pub const DELIVERY_KEY_LEN: usize = 64;

/// Random bytes mixed into every will id
const ID_NONCE_LEN: usize = 32;

/// Fraction of the deadline window after which a refresh is recommended
const REFRESH_RECOMMENDED_AT: f64 = 0.5;

/// Fraction of the deadline window after which a refresh is required
const REFRESH_REQUIRED_AT: f64 = 0.9;

#[derive(Error, Debug)]
pub enum WillError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthFailure),

    #[error("Credential issue failed: {0}")]
    Vault(#[from] VaultError),
}

/// The will's owner and their authentication factors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerId {
    pub name: String,
    pub email: String,
    /// Index-addressed factors. Only index 0 is issued today.
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

impl OwnerId {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            credentials: Vec::new(),
        }
    }
}

/// Someone who receives the will on release. Copied into the will at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
    /// Key material for the released payload, opaque to willkeep
    #[serde(default)]
    pub key_material: String,
}

impl Recipient {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            key_material: String::new(),
        }
    }

    pub fn with_key_material(mut self, key_material: impl Into<String>) -> Self {
        self.key_material = key_material.into();
        self
    }
}

/// Deadline parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Added to "now" on creation and every refresh
    #[serde(with = "duration_millis")]
    pub extension_unit: Duration,
    /// Extra grace period on top of `extension_unit`
    #[serde(with = "duration_millis")]
    pub delivery_offset: Duration,
    /// Skip the grace period
    #[serde(default)]
    pub disable_offset: bool,
    /// Owner wants deadline reminders (informational)
    #[serde(default)]
    pub notify_deadline: bool,
}

impl Settings {
    pub fn new(extension_unit: Duration, delivery_offset: Duration) -> Self {
        Self {
            extension_unit,
            delivery_offset,
            disable_offset: false,
            notify_deadline: false,
        }
    }

    /// Compute the delivery deadline for a check-in at `now`.
    ///
    /// Both durations must be positive, even when the offset is disabled.
    pub fn deadline_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, WillError> {
        if self.extension_unit <= Duration::zero() {
            return Err(WillError::Validation(
                "extension_unit must be positive".into(),
            ));
        }
        if self.delivery_offset <= Duration::zero() {
            return Err(WillError::Validation(
                "delivery_offset must be positive".into(),
            ));
        }

        let mut deadline = now
            .checked_add_signed(self.extension_unit)
            .ok_or_else(|| WillError::Validation("extension_unit out of range".into()))?;
        if !self.disable_offset {
            deadline = deadline
                .checked_add_signed(self.delivery_offset)
                .ok_or_else(|| WillError::Validation("delivery_offset out of range".into()))?;
        }
        Ok(deadline)
    }
}

/// Proof of life presented by the owner
#[derive(Clone, PartialEq, Eq)]
pub enum LivenessProof {
    /// A code from the owner's authenticator
    Otp(String),
    /// A hex-encoded fallback key
    Fallback(String),
}

impl LivenessProof {
    /// Build a proof from two optional inputs, exactly one of which must be non-empty.
    pub fn from_parts(otp: Option<&str>, fallback: Option<&str>) -> Result<Self, WillError> {
        let otp = otp.map(str::trim).filter(|s| !s.is_empty());
        let fallback = fallback.map(str::trim).filter(|s| !s.is_empty());
        match (otp, fallback) {
            (Some(code), None) => Ok(Self::Otp(code.to_string())),
            (None, Some(key)) => Ok(Self::Fallback(key.to_string())),
            (Some(_), Some(_)) => Err(WillError::Validation(
                "supply either a one-time code or a fallback key, not both".into(),
            )),
            (None, None) => Err(WillError::Validation(
                "a one-time code or a fallback key is required".into(),
            )),
        }
    }
}

impl fmt::Debug for LivenessProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Otp(_) => f.write_str("Otp(<redacted>)"),
            Self::Fallback(_) => f.write_str("Fallback(<redacted>)"),
        }
    }
}

/// Where a will stands relative to its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WillStatus {
    /// Less than half the deadline window used
    Healthy,
    /// Past the halfway point; the owner should check in
    RefreshRecommended,
    /// Nearly expired; the owner must check in now
    RefreshRequired,
    /// Deadline passed; eligible for delivery
    Due,
    /// Delivered to recipients, awaiting purge
    Delivered,
    /// Disabled by the owner; never delivered
    Disabled,
}

/// A pending release: sealed reference, recipients and a deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Will {
    pub id: String,
    pub owner: OwnerId,
    pub creation: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
    /// Sealed will content, never interpreted here
    #[serde(with = "hex_bytes")]
    pub reference: Vec<u8>,
    pub recipients: Vec<Recipient>,
    pub time_to_delivery: DateTime<Utc>,
    pub settings: Settings,
    pub disabled: bool,
    /// Unlocks `reference`; generated once, never regenerated
    #[serde(with = "hex_bytes")]
    pub delivery_key: Vec<u8>,
    /// Delivery has started (set before the first send attempt)
    pub deliverable: bool,
    /// Delivered; eligible for purge
    #[serde(default)]
    pub exhausted: bool,
}

impl Will {
    /// Create a will and mint its owner credential.
    ///
    /// Returns the will plus the enrollment bundle the owner must store
    /// out-of-band. The bundle is not part of the will.
    pub fn create(
        vault: &CredentialVault,
        owner: OwnerId,
        reference: Vec<u8>,
        settings: Settings,
        recipients: Vec<Recipient>,
    ) -> Result<(Self, Enrollment), WillError> {
        Self::create_at(vault, owner, reference, settings, recipients, Utc::now())
    }

    fn create_at(
        vault: &CredentialVault,
        mut owner: OwnerId,
        reference: Vec<u8>,
        settings: Settings,
        recipients: Vec<Recipient>,
        now: DateTime<Utc>,
    ) -> Result<(Self, Enrollment), WillError> {
        if owner.name.trim().is_empty() {
            return Err(WillError::Validation("owner name must not be empty".into()));
        }
        if owner.email.trim().is_empty() {
            return Err(WillError::Validation("owner email must not be empty".into()));
        }
        if reference.is_empty() {
            return Err(WillError::Validation("reference must not be empty".into()));
        }
        let time_to_delivery = settings.deadline_from(now)?;

        let id = derive_id(&owner.name, now, &reference);
        let (credential, enrollment) = vault.issue(&owner.name)?;
        owner.credentials = vec![credential];

        let mut delivery_key = vec![0u8; DELIVERY_KEY_LEN];
        OsRng.fill_bytes(&mut delivery_key);

        log::info!("Created will {} for {}", id, owner.name);

        Ok((
            Self {
                id,
                owner,
                creation: now,
                last_modified: now,
                last_ping: now,
                reference,
                recipients,
                time_to_delivery,
                settings,
                disabled: false,
                delivery_key,
                deliverable: false,
                exhausted: false,
            },
            enrollment,
        ))
    }

    /// Check a liveness proof against the credential at `credential_index`.
    ///
    /// On success the stored credential is replaced by its updated state;
    /// the caller must persist the will. The deadline is not moved.
    pub fn verify_liveness(
        &mut self,
        vault: &CredentialVault,
        credential_index: usize,
        proof: &LivenessProof,
    ) -> Result<(), WillError> {
        let credential = self
            .owner
            .credentials
            .get(credential_index)
            .ok_or_else(|| {
                WillError::Validation(format!(
                    "credential index {} out of range ({} credentials)",
                    credential_index,
                    self.owner.credentials.len()
                ))
            })?;

        let updated = match proof {
            LivenessProof::Otp(code) => vault.verify_otp(code, credential)?,
            LivenessProof::Fallback(key) => vault.verify_fallback_key(key, credential)?,
        };

        self.owner.credentials[credential_index] = updated;
        self.last_modified = Utc::now();
        Ok(())
    }

    /// Push the deadline out from now, exactly as on creation.
    pub fn refresh(&mut self) -> Result<(), WillError> {
        self.refresh_at(Utc::now())
    }

    /// [`refresh`](Self::refresh) with an explicit clock reading.
    pub fn refresh_at(&mut self, now: DateTime<Utc>) -> Result<(), WillError> {
        self.time_to_delivery = self.settings.deadline_from(now)?;
        self.last_ping = now;
        self.last_modified = now;
        Ok(())
    }

    /// Eligible for the dispatch scheduler at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.disabled && !self.exhausted && self.time_to_delivery < now
    }

    /// Evaluate how close the will is to release.
    pub fn status(&self, now: DateTime<Utc>) -> WillStatus {
        if self.disabled {
            return WillStatus::Disabled;
        }
        if self.exhausted {
            return WillStatus::Delivered;
        }
        if now >= self.time_to_delivery {
            return WillStatus::Due;
        }

        let window = (self.time_to_delivery - self.last_ping).num_milliseconds();
        let elapsed = (now - self.last_ping).num_milliseconds();
        let fraction = if window > 0 {
            elapsed as f64 / window as f64
        } else {
            1.0
        };

        if fraction >= REFRESH_REQUIRED_AT {
            WillStatus::RefreshRequired
        } else if fraction >= REFRESH_RECOMMENDED_AT {
            WillStatus::RefreshRecommended
        } else {
            WillStatus::Healthy
        }
    }

    /// Time left before delivery (negative once overdue).
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.time_to_delivery - now
    }

    pub fn mark_deliverable(&mut self) {
        self.deliverable = true;
        self.last_modified = Utc::now();
    }

    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
        self.last_modified = Utc::now();
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
        self.last_modified = Utc::now();
    }
}

/// One-way, randomized will identifier.
///
/// `sha256(owner || secs || nanos || sha256(reference) || 32 random bytes)`
fn derive_id(owner_name: &str, now: DateTime<Utc>, reference: &[u8]) -> String {
    let mut nonce = [0u8; ID_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut hasher = Sha256::new();
    hasher.update(owner_name.as_bytes());
    hasher.update(now.timestamp().to_be_bytes());
    hasher.update(now.timestamp_subsec_nanos().to_be_bytes());
    hasher.update(Sha256::digest(reference));
    hasher.update(nonce);
    hex::encode(hasher.finalize())
}
