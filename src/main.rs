//! Encrypted Incremental Backup Tool
//!
//! Provides CLI interface for backup dispatch, batch backups, decryption and sync

// backuptool/src/main.rs
mod backup;
mod codec;
mod config;
mod errors;
mod restore;
mod storage;
mod sync;
mod utils;

use anyhow::{Context, Result};
use backup::producer::ProducerRegistry;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use config::{check_settings, AppConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypted incremental backups to file, S3, Dropbox and Drive destinations")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, env = "BACKUP_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up one date range (default: yesterday) to every destination
    RunIncrementalBackup {
        #[arg(long, value_parser = parse_date)]
        start_date: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date)]
        end_date: Option<NaiveDate>,
        #[arg(long = "filter-sensitive-data")]
        filter_sensitive: bool,
        #[arg(long)]
        clear_archived: bool,
    },
    /// Split a date range into windows and back up each one
    RunBatchBackup {
        #[arg(long, value_parser = parse_date)]
        start_date: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        end_date: NaiveDate,
        #[arg(long, default_value_t = 7)]
        window_days: u32,
        #[arg(long = "filter-sensitive-data")]
        filter_sensitive: bool,
    },
    /// Decrypt `.encrypted` backup files next to themselves
    DecryptFile {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Also write the decompressed dump
        #[arg(long)]
        decompress: bool,
    },
    /// Copy new or changed files from one location to another
    Sync { source: String, destination: String },
    /// Report configuration problems without contacting any destination
    CheckConfig,
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run_app(cli).await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let app_config = AppConfig::load(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;

    match cli.command {
        Command::RunIncrementalBackup {
            start_date,
            end_date,
            filter_sensitive,
            clear_archived,
        } => {
            let run = backup::run::BackupRun::from_options(
                start_date,
                end_date,
                filter_sensitive,
                clear_archived || app_config.clear_archived,
                Local::now().date_naive(),
            )?;
            let registry = ProducerRegistry::from_config(&app_config);
            let report = backup::run_incremental_backup(&app_config, &registry, &run)
                .await
                .context("Backup process failed")?;
            println!("📦 {} upload(s) completed.", report.uploaded.len());
            for skipped in &report.skipped_destinations {
                println!("⚠️ Skipped unknown destination: {}", skipped);
            }
        }
        Command::RunBatchBackup {
            start_date,
            end_date,
            window_days,
            filter_sensitive,
        } => {
            let registry = ProducerRegistry::from_config(&app_config);
            let reports = backup::run_batch_backup(
                &app_config,
                &registry,
                start_date,
                end_date,
                window_days,
                filter_sensitive,
            )
            .await
            .context("Batch backup process failed")?;
            println!("📦 {} backup window(s) completed.", reports.len());
        }
        Command::DecryptFile { files, decompress } => {
            let key = app_config.backup_key()?;
            restore::decrypt_files(&files, &key, decompress).context("Decryption failed")?;
        }
        Command::Sync { source, destination } => {
            let summary = sync::run_sync_flow(&app_config, &source, &destination)
                .await
                .context("Sync process failed")?;
            println!(
                "🔄 {} item(s) transferred, {} already current.",
                summary.transferred, summary.skipped
            );
        }
        Command::CheckConfig => {
            let warnings = check_settings(&app_config);
            for warning in &warnings {
                println!("⚠️ {}: {}", warning.id, warning.message);
                println!("   Hint: {}", warning.hint);
            }
            if !warnings.is_empty() {
                anyhow::bail!("{} configuration warning(s)", warnings.len());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_batch_arguments() {
        let cli = Cli::try_parse_from([
            "backuptool",
            "run-batch-backup",
            "--start-date",
            "2024-01-01",
            "--end-date",
            "2024-01-20",
            "--window-days",
            "7",
        ])
        .unwrap();
        match cli.command {
            Command::RunBatchBackup { window_days, start_date, .. } => {
                assert_eq!(window_days, 7);
                assert_eq!(start_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_malformed_date_rejected() {
        assert!(Cli::try_parse_from(["backuptool", "run-incremental-backup", "--start-date", "01/02/2024"]).is_err());
    }

    #[test]
    fn test_decrypt_requires_files() {
        assert!(Cli::try_parse_from(["backuptool", "decrypt-file"]).is_err());
    }
}
