//! One-shot owner commands: create a will, check in, show status.

use crate::config::ServerConfig;
use crate::daemon;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use willkeep_core::{
    CredentialVault, Enrollment, LivenessProof, OwnerId, Recipient, Settings, Will,
};
use willkeep_notify::templates::generate_enrollment_message;
use willkeep_store::WillStore;

/// A will creation request, read from TOML.
///
/// ```toml
/// reference_file = "sealed.age"
///
/// [owner]
/// name = "Alice"
/// email = "alice@example.com"
///
/// [settings]
/// extension_unit_secs = 2592000
/// delivery_offset_secs = 604800
///
/// [[recipients]]
/// name = "Bob"
/// email = "bob@example.com"
/// key_material = "age1..."
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct WillRequest {
    pub owner: OwnerRequest,

    /// Sealed payload; relative paths resolve against the request file
    pub reference_file: PathBuf,

    #[serde(default)]
    pub settings: SettingsRequest,

    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsRequest {
    #[serde(default = "default_extension_unit")]
    pub extension_unit_secs: i64,
    #[serde(default = "default_delivery_offset")]
    pub delivery_offset_secs: i64,
    #[serde(default)]
    pub disable_offset: bool,
    #[serde(default)]
    pub notify_deadline: bool,
}

impl Default for SettingsRequest {
    fn default() -> Self {
        Self {
            extension_unit_secs: default_extension_unit(),
            delivery_offset_secs: default_delivery_offset(),
            disable_offset: false,
            notify_deadline: false,
        }
    }
}

fn default_extension_unit() -> i64 {
    30 * 24 * 3600 // 30 days
}

fn default_delivery_offset() -> i64 {
    7 * 24 * 3600 // 7 days
}

impl WillRequest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read will request: {}", path.display()))?;
        toml::from_str(&contents).with_context(|| "Failed to parse will request")
    }

    pub fn settings(&self) -> Settings {
        Settings {
            extension_unit: Duration::seconds(self.settings.extension_unit_secs),
            delivery_offset: Duration::seconds(self.settings.delivery_offset_secs),
            disable_offset: self.settings.disable_offset,
            notify_deadline: self.settings.notify_deadline,
        }
    }

    fn reference_path(&self, request_path: &Path) -> PathBuf {
        match request_path.parent() {
            Some(dir) if self.reference_file.is_relative() => dir.join(&self.reference_file),
            _ => self.reference_file.clone(),
        }
    }
}

/// Create and persist a will. The enrollment must be shown to the owner
/// now; it cannot be recovered later.
pub fn create_will(
    store: &dyn WillStore,
    vault: &CredentialVault,
    request: &WillRequest,
    reference: Vec<u8>,
) -> Result<(Will, Enrollment)> {
    let (will, enrollment) = Will::create(
        vault,
        OwnerId::new(&request.owner.name, &request.owner.email),
        reference,
        request.settings(),
        request.recipients.clone(),
    )
    .context("Failed to create will")?;
    store.set_will(&will).context("Failed to store will")?;
    Ok((will, enrollment))
}

/// `--create REQUEST.toml`
pub fn create(config: &ServerConfig, request_path: &Path) -> Result<()> {
    let request = WillRequest::from_file(request_path)?;
    let reference_path = request.reference_path(request_path);
    let reference = std::fs::read(&reference_path).with_context(|| {
        format!(
            "Failed to read reference file: {}",
            reference_path.display()
        )
    })?;

    let vault = daemon::open_vault(config)?;
    let store = daemon::open_store(config)?;
    let (will, enrollment) = create_will(store.as_ref(), &vault, &request, reference)?;

    let message = generate_enrollment_message(&will.owner, &will.id, &enrollment);
    println!("{}", message.body);
    println!();
    println!("Will ID:        {}", will.id);
    println!("Recipients:     {}", will.recipients.len());
    println!("Next delivery:  {}", will.time_to_delivery);
    Ok(())
}

/// `--check-in WILL_ID --otp CODE | --fallback KEY`
pub fn check_in(config: &ServerConfig, will_id: &str, proof: &LivenessProof) -> Result<()> {
    let vault = daemon::open_vault(config)?;
    let store = daemon::open_store(config)?;
    let will = willkeep_store::check_in(store.as_ref(), &vault, will_id, 0, proof)
        .context("Check-in failed")?;

    println!("✅ Checked in.");
    println!("Next delivery:  {}", will.time_to_delivery);
    println!(
        "Fallback keys:  {} remaining",
        will.owner
            .credentials
            .first()
            .map(|c| c.remaining_fallback_keys())
            .unwrap_or(0)
    );
    Ok(())
}

/// `--status OWNER`
pub fn status(config: &ServerConfig, owner: &str) -> Result<()> {
    let store = daemon::open_store(config)?;
    let wills = store
        .get_wills_by_owner(owner)
        .context("Failed to list wills")?;

    if wills.is_empty() {
        println!("No wills for {}.", owner);
        return Ok(());
    }

    let now = Utc::now();
    for will in &wills {
        println!("{}", status_line(will, now));
    }
    Ok(())
}

/// One human-readable line per will.
pub fn status_line(will: &Will, now: DateTime<Utc>) -> String {
    let remaining = will.remaining(now);
    let left = if remaining > Duration::zero() {
        format!(
            "{}d {}h left",
            remaining.num_days(),
            remaining.num_hours() % 24
        )
    } else {
        "overdue".to_string()
    };
    format!(
        "{}  {:?}  delivery {}  ({})  {} recipient(s)",
        will.id,
        will.status(now),
        will.time_to_delivery.format("%Y-%m-%d %H:%M UTC"),
        left,
        will.recipients.len()
    )
}
