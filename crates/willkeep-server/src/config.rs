//! Server configuration: parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use willkeep_core::crypto::{KEY_LEN, MIN_SALT_LEN};
use willkeep_core::{VaultKey, VaultSettings};
use willkeep_dispatch::DispatchConfig;
use willkeep_notify::EmailConfig;

/// Top-level server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// General server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Persistence
    #[serde(default)]
    pub storage: StorageSection,

    /// Credential vault key material and tunables
    #[serde(default)]
    pub vault: VaultSection,

    /// Dispatch scheduler tuning
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// SMTP delivery; absent means dry-run delivery
    pub email: Option<EmailSection>,
}

/// General server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Data directory (SQLite DB)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// SQLite database file (default: `<data_dir>/willkeep.db`)
    pub database_path: Option<PathBuf>,
}

/// Vault key material. Exactly one of `key` and `passphrase`.
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultSection {
    /// Raw AES-256 key, hex
    pub key: Option<String>,

    /// Passphrase for Argon2id key derivation
    pub passphrase: Option<String>,

    /// Salt, hex; bound to every ciphertext
    #[serde(default)]
    pub salt: String,

    #[serde(default = "default_otp_tolerance")]
    pub otp_tolerance: u64,

    #[serde(default = "default_secondary_keys_number")]
    pub secondary_keys_number: usize,

    #[serde(default = "default_secondary_key_len")]
    pub secondary_key_len: usize,

    #[serde(default = "default_issuer")]
    pub issuer: String,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            key: None,
            passphrase: None,
            salt: String::new(),
            otp_tolerance: default_otp_tolerance(),
            secondary_keys_number: default_secondary_keys_number(),
            secondary_key_len: default_secondary_key_len(),
            issuer: default_issuer(),
        }
    }
}

impl fmt::Debug for VaultSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSection")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("salt", &self.salt)
            .field("otp_tolerance", &self.otp_tolerance)
            .field("secondary_keys_number", &self.secondary_keys_number)
            .field("secondary_key_len", &self.secondary_key_len)
            .field("issuer", &self.issuer)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Seconds between dispatch ticks (default: 3 minutes)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Deliveries that may run at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deliveries waiting for a worker before the rest wait a cycle
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Bound on one will's delivery attempt
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    #[serde(default = "default_error_queue_depth")]
    pub error_queue_depth: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            delivery_timeout_secs: default_delivery_timeout(),
            error_queue_depth: default_error_queue_depth(),
        }
    }
}

/// Email delivery settings
#[derive(Clone, Serialize, Deserialize)]
pub struct EmailSection {
    /// SMTP server hostname
    pub smtp_host: String,

    /// SMTP port (default: 587)
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// SMTP username
    pub smtp_user: String,

    /// SMTP password
    pub smtp_password: String,

    /// Sender address
    pub from_address: String,

    /// Send attempts per recipient
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl fmt::Debug for EmailSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSection")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_user", &self.smtp_user)
            .field("smtp_password", &"<redacted>")
            .field("from_address", &self.from_address)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otp_tolerance() -> u64 {
    7
}

fn default_secondary_keys_number() -> usize {
    4
}

fn default_secondary_key_len() -> usize {
    16
}

fn default_issuer() -> String {
    "willkeep".to_string()
}

fn default_poll_interval() -> u64 {
    180 // 3 minutes
}

fn default_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    16
}

fn default_delivery_timeout() -> u64 {
    120
}

fn default_error_queue_depth() -> usize {
    64
}

fn default_smtp_port() -> u16 {
    587
}

fn default_max_attempts() -> u32 {
    3
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `WILLKEEP_DATA_DIR`
    /// - `WILLKEEP_LOG_LEVEL`
    /// - `WILLKEEP_DATABASE_PATH`
    /// - `WILLKEEP_VAULT_KEY`
    /// - `WILLKEEP_VAULT_PASSPHRASE`
    /// - `WILLKEEP_VAULT_SALT`
    /// - `WILLKEEP_POLL_INTERVAL`
    /// - `WILLKEEP_WORKERS`
    /// - `WILLKEEP_QUEUE_DEPTH`
    /// - `WILLKEEP_SMTP_PASSWORD`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WILLKEEP_DATA_DIR") {
            self.server.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WILLKEEP_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("WILLKEEP_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("WILLKEEP_VAULT_KEY") {
            self.vault.key = Some(v);
        }
        if let Ok(v) = std::env::var("WILLKEEP_VAULT_PASSPHRASE") {
            self.vault.passphrase = Some(v);
        }
        if let Ok(v) = std::env::var("WILLKEEP_VAULT_SALT") {
            self.vault.salt = v;
        }
        if let Ok(v) = std::env::var("WILLKEEP_POLL_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                self.scheduler.poll_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("WILLKEEP_WORKERS") {
            if let Ok(n) = v.parse::<usize>() {
                self.scheduler.workers = n;
            }
        }
        if let Ok(v) = std::env::var("WILLKEEP_QUEUE_DEPTH") {
            if let Ok(n) = v.parse::<usize>() {
                self.scheduler.queue_depth = n;
            }
        }
        if let Ok(v) = std::env::var("WILLKEEP_SMTP_PASSWORD") {
            if let Some(ref mut email) = self.email {
                email.smtp_password = v;
            }
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        let vault = &self.vault;
        anyhow::ensure!(
            vault.key.is_some() != vault.passphrase.is_some(),
            "exactly one of vault.key and vault.passphrase must be set"
        );
        if let Some(ref key) = vault.key {
            let bytes = hex::decode(key).context("vault.key must be hex")?;
            anyhow::ensure!(
                bytes.len() == KEY_LEN,
                "vault.key must be {} bytes ({} hex chars)",
                KEY_LEN,
                KEY_LEN * 2
            );
        }
        if let Some(ref passphrase) = vault.passphrase {
            anyhow::ensure!(
                !passphrase.is_empty(),
                "vault.passphrase must not be empty"
            );
        }
        let salt = hex::decode(&vault.salt).context("vault.salt must be hex")?;
        anyhow::ensure!(
            salt.len() >= MIN_SALT_LEN,
            "vault.salt must be at least {} bytes",
            MIN_SALT_LEN
        );
        anyhow::ensure!(vault.otp_tolerance >= 1, "vault.otp_tolerance must be >= 1");
        anyhow::ensure!(
            vault.secondary_keys_number >= 1,
            "vault.secondary_keys_number must be >= 1"
        );
        anyhow::ensure!(
            vault.secondary_key_len >= 16,
            "vault.secondary_key_len must be >= 16"
        );
        anyhow::ensure!(!vault.issuer.is_empty(), "vault.issuer must not be empty");

        let scheduler = &self.scheduler;
        anyhow::ensure!(
            scheduler.poll_interval_secs >= 1,
            "scheduler.poll_interval_secs must be >= 1"
        );
        anyhow::ensure!(scheduler.workers >= 1, "scheduler.workers must be >= 1");
        anyhow::ensure!(
            scheduler.queue_depth >= 1,
            "scheduler.queue_depth must be >= 1"
        );
        anyhow::ensure!(
            scheduler.delivery_timeout_secs >= 1,
            "scheduler.delivery_timeout_secs must be >= 1"
        );
        anyhow::ensure!(
            scheduler.error_queue_depth >= 1,
            "scheduler.error_queue_depth must be >= 1"
        );

        // If email delivery configured, need core SMTP fields
        if let Some(ref email) = self.email {
            anyhow::ensure!(
                !email.smtp_host.is_empty(),
                "email.smtp_host must not be empty"
            );
            anyhow::ensure!(
                !email.from_address.is_empty(),
                "email.from_address must not be empty"
            );
            anyhow::ensure!(email.max_attempts >= 1, "email.max_attempts must be >= 1");
        }

        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| self.server.data_dir.join("willkeep.db"))
    }

    /// Build the vault key. A passphrase runs Argon2id, which takes a moment.
    pub fn vault_key(&self) -> Result<VaultKey> {
        let salt = hex::decode(&self.vault.salt).context("vault.salt must be hex")?;
        let key = match (&self.vault.key, &self.vault.passphrase) {
            (Some(key), None) => {
                let bytes = hex::decode(key).context("vault.key must be hex")?;
                VaultKey::from_bytes(&bytes, &salt)?
            }
            (None, Some(passphrase)) => VaultKey::derive(passphrase, &salt)?,
            _ => anyhow::bail!("exactly one of vault.key and vault.passphrase must be set"),
        };
        Ok(key)
    }

    pub fn vault_settings(&self) -> VaultSettings {
        VaultSettings {
            otp_tolerance: self.vault.otp_tolerance,
            secondary_keys_number: self.vault.secondary_keys_number,
            secondary_key_len: self.vault.secondary_key_len,
            issuer: self.vault.issuer.clone(),
            ..VaultSettings::default()
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            poll_interval: Duration::from_secs(self.scheduler.poll_interval_secs),
            workers: self.scheduler.workers,
            queue_depth: self.scheduler.queue_depth,
            delivery_timeout: Duration::from_secs(self.scheduler.delivery_timeout_secs),
            error_queue_depth: self.scheduler.error_queue_depth,
        }
    }

    pub fn email_config(&self) -> Option<EmailConfig> {
        self.email.as_ref().map(|email| {
            EmailConfig::new(
                &email.smtp_host,
                &email.smtp_user,
                &email.smtp_password,
                &email.from_address,
            )
            .with_port(email.smtp_port)
            .with_retries(email.max_attempts, Duration::from_secs(2))
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
