//! The daemon: dispatch scheduler wired to storage and delivery.

use crate::config::ServerConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use willkeep_core::{CredentialVault, DeliveryChannel};
use willkeep_dispatch::{CycleReport, Scheduler};
use willkeep_notify::{DryRunDelivery, EmailDelivery};
use willkeep_store::{SqliteStore, WillStore};

/// Open the SQLite store, creating its directory if needed.
pub fn open_store(config: &ServerConfig) -> Result<Arc<dyn WillStore>> {
    let path = config.database_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data dir: {}", parent.display()))?;
    }
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(store))
}

pub fn open_vault(config: &ServerConfig) -> Result<CredentialVault> {
    let key = config.vault_key().context("Failed to build vault key")?;
    CredentialVault::new(key, config.vault_settings()).context("Invalid vault settings")
}

/// Email when `[email]` is configured, otherwise log-only.
pub fn delivery_channel(config: &ServerConfig) -> Arc<dyn DeliveryChannel> {
    match config.email_config() {
        Some(email) => {
            log::info!(
                "Delivering by email via {}:{}",
                email.smtp_host,
                email.smtp_port
            );
            Arc::new(EmailDelivery::new(email))
        }
        None => {
            log::warn!("No [email] section configured; deliveries will only be logged");
            Arc::new(DryRunDelivery)
        }
    }
}

fn start_scheduler(config: &ServerConfig) -> Result<Scheduler> {
    let store = open_store(config)?;
    let channel = delivery_channel(config);
    Scheduler::start(store, channel, &config.dispatch_config())
        .context("Failed to start dispatch scheduler")
}

/// Run the dispatch loop until Ctrl-C, then drain the in-flight cycle.
pub async fn run(config: ServerConfig) -> Result<()> {
    log::info!("willkeep server starting…");
    log::info!("  Data dir:   {}", config.server.data_dir.display());
    log::info!("  Database:   {}", config.database_path().display());
    log::info!(
        "  Interval:   {} seconds",
        config.scheduler.poll_interval_secs
    );
    log::info!(
        "  Workers:    {} (queue depth {})",
        config.scheduler.workers,
        config.scheduler.queue_depth
    );

    let scheduler = start_scheduler(&config)?;

    tokio::select! {
        _ = scheduler.run() => {}
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => log::info!("Received shutdown signal. Finishing current cycle…"),
                Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

/// Execute a single dispatch cycle and exit.
pub async fn run_once(config: &ServerConfig) -> Result<CycleReport> {
    let scheduler = start_scheduler(config)?;
    let report = scheduler.run_once().await;
    scheduler.shutdown().await;
    report.context("Dispatch cycle failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;
    use willkeep_core::{OwnerId, Recipient, Settings, Will};

    fn test_config(dir: &TempDir) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.server.data_dir = dir.path().join("data");
        config.vault.key = Some("42".repeat(32));
        config.vault.salt = hex::encode("willkeep-daemon-salt");
        config
    }

    #[test]
    fn test_open_store_creates_data_dir() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        open_store(&config).unwrap();
        assert!(config.database_path().exists());
    }

    #[tokio::test]
    async fn test_run_once_releases_overdue_wills() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let vault = open_vault(&config).unwrap();
        let store = open_store(&config).unwrap();

        let (mut will, _) = Will::create(
            &vault,
            OwnerId::new("alice", "alice@example.com"),
            b"sealed".to_vec(),
            Settings::new(Duration::hours(1), Duration::hours(1)),
            vec![Recipient::new("Bob", "bob@example.com")],
        )
        .unwrap();
        will.time_to_delivery = Utc::now() - Duration::seconds(5);
        store.set_will(&will).unwrap();

        let report = run_once(&config).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.purged, 1);
        assert!(store.get_will(&will.id).is_err());
    }

    #[test]
    fn test_open_vault_rejects_missing_key() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.vault.key = None;
        assert!(open_vault(&config).is_err());
    }
}
