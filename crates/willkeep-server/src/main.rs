//! willkeep Server: headless daemon that releases wills on missed check-ins
//!
//! Runs the dispatch scheduler against a SQLite store and hosts the owner
//! commands (create, check in, status). Designed for Docker / server
//! deployment.
//!
//! # Usage
//!
//! ```bash
//! willkeep-server --config /path/to/willkeep.toml
//! willkeep-server --once       # Run one dispatch cycle and exit
//! willkeep-server --validate   # Validate config and exit
//! willkeep-server --create request.toml
//! willkeep-server --check-in <WILL_ID> --otp 123456
//! willkeep-server --status alice
//! ```

mod commands;
mod config;
mod daemon;

use anyhow::{Context, Result};
use std::path::PathBuf;
use willkeep_core::LivenessProof;

enum Command {
    Run,
    Once,
    Validate,
    Create(PathBuf),
    CheckIn(String),
    Status(String),
}

fn main() -> Result<()> {
    // SMTP over TLS needs a process-wide rustls CryptoProvider.
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    // Parse CLI args (minimal, no clap dependency needed)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("/config/willkeep.toml");
    let mut command = Command::Run;
    let mut otp: Option<String> = None;
    let mut fallback: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                config_path = PathBuf::from(next_value(&args, &mut i, "--config")?);
            }
            "--once" => {
                command = Command::Once;
            }
            "--validate" => {
                command = Command::Validate;
            }
            "--create" => {
                command = Command::Create(PathBuf::from(next_value(&args, &mut i, "--create")?));
            }
            "--check-in" => {
                command = Command::CheckIn(next_value(&args, &mut i, "--check-in")?);
            }
            "--otp" => {
                otp = Some(next_value(&args, &mut i, "--otp")?);
            }
            "--fallback" => {
                fallback = Some(next_value(&args, &mut i, "--fallback")?);
            }
            "--status" => {
                command = Command::Status(next_value(&args, &mut i, "--status")?);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("willkeep-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Load config
    let mut server_config = config::ServerConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Apply env overrides
    server_config.apply_env_overrides();

    // Validate
    server_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(server_config.server.log_level.as_str()),
    )
    .init();

    match command {
        Command::Validate => {
            println!("✅ Configuration is valid.");
            println!(
                "  Database:       {}",
                server_config.database_path().display()
            );
            println!(
                "  Vault key:      {}",
                if server_config.vault.key.is_some() {
                    "raw key"
                } else {
                    "passphrase (Argon2id)"
                }
            );
            println!(
                "  Poll interval:  {} secs",
                server_config.scheduler.poll_interval_secs
            );
            println!(
                "  Workers:        {} (queue depth {})",
                server_config.scheduler.workers, server_config.scheduler.queue_depth
            );
            println!(
                "  Email delivery: {}",
                server_config.email.is_some()
            );
            Ok(())
        }
        Command::Create(request) => commands::create(&server_config, &request),
        Command::CheckIn(will_id) => {
            let proof = LivenessProof::from_parts(otp.as_deref(), fallback.as_deref())
                .context("--check-in needs exactly one of --otp or --fallback")?;
            commands::check_in(&server_config, &will_id, &proof)
        }
        Command::Status(owner) => commands::status(&server_config, &owner),
        Command::Once => {
            let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            log::info!("Running single dispatch cycle…");
            let report = rt.block_on(daemon::run_once(&server_config))?;
            log::info!(
                "Done: {} due, {} delivered, {} failed, {} skipped, {} purged.",
                report.due,
                report.delivered,
                report.failed,
                report.skipped,
                report.purged
            );
            Ok(())
        }
        Command::Run => {
            let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            if let Err(e) = rt.block_on(daemon::run(server_config)) {
                log::error!("Server error: {:#}", e);
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    match args.get(*i) {
        Some(value) => Ok(value.clone()),
        None => anyhow::bail!("{} requires an argument", flag),
    }
}

fn print_help() {
    println!(
        r#"willkeep Server: releases wills whose owners stopped checking in

USAGE:
    willkeep-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>       Config file path (default: /config/willkeep.toml)
    --once                    Run a single dispatch cycle and exit
    --validate                Validate config file and exit
    --create <REQUEST.toml>   Create a will and print the owner's enrollment
    --check-in <WILL_ID>      Check in; needs --otp <CODE> or --fallback <KEY>
    --status <OWNER>          List an owner's wills and their deadlines
    -h, --help                Show this help message
    -V, --version             Show version

ENVIRONMENT VARIABLES (override config file):
    WILLKEEP_DATA_DIR           Data directory path
    WILLKEEP_LOG_LEVEL          Log level (error/warn/info/debug/trace)
    WILLKEEP_DATABASE_PATH      SQLite database file
    WILLKEEP_VAULT_KEY          Vault key, 64 hex chars
    WILLKEEP_VAULT_PASSPHRASE   Vault passphrase (instead of a key)
    WILLKEEP_VAULT_SALT         Vault salt, hex
    WILLKEEP_POLL_INTERVAL      Dispatch interval in seconds
    WILLKEEP_WORKERS            Worker pool size
    WILLKEEP_QUEUE_DEPTH        Worker queue depth
    WILLKEEP_SMTP_PASSWORD      SMTP password

EXAMPLES:
    # Run as daemon with config file
    willkeep-server --config /path/to/config.toml

    # Single cycle (useful for cron jobs)
    willkeep-server --config config.toml --once

    # Validate configuration
    willkeep-server --config config.toml --validate
"#
    );
}
