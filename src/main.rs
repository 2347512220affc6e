mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, ConfigCommands};
use stackvault::core::{list_backups, BackupManager, BackupManifest, DockerPlatform, RestoreManager, RunReport};
use stackvault::utils::{AppConfig, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,stackvault={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::config_path()?,
    };
    let settings = AppConfig::load_from(&config_path)?.resolve(cli.roots.into());

    match cli.command {
        Commands::Backup => handle_backup(&settings, cli.json).await,
        Commands::Restore {
            backup_path,
            target_root,
        } => handle_restore(&settings, backup_path, target_root, cli.json).await,
        Commands::List => handle_list(&settings),
        Commands::Config { command } => handle_config(command, &settings, &config_path),
    }
}

async fn handle_backup(settings: &Settings, json: bool) -> Result<()> {
    let platform = DockerPlatform::new(&settings.mover_image)?;
    let report = BackupManager::new(&platform, &settings.source_root, &settings.backup_root)
        .create_backup()
        .await?;

    print_report(&report, json)
}

async fn handle_restore(
    settings: &Settings,
    backup_path: Option<PathBuf>,
    target_root: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let target_root = target_root.unwrap_or_else(|| settings.restore_root.clone());
    let platform = DockerPlatform::new(&settings.mover_image)?;
    let report = RestoreManager::new(&platform, &settings.backup_root, target_root)
        .restore(backup_path.as_deref())
        .await?;

    print_report(&report, json)
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let output = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        println!("{}", output);
    } else {
        report.print_summary();
    }
    Ok(())
}

fn handle_list(settings: &Settings) -> Result<()> {
    let sets = list_backups(&settings.backup_root).with_context(|| {
        format!("Failed to read backup root {}", settings.backup_root.display())
    })?;

    if sets.is_empty() {
        println!("No backup sets under {}", settings.backup_root.display());
        return Ok(());
    }

    println!("Backup sets in {}\n", settings.backup_root.display());
    println!("{:<40} {:<10} {:<10}", "Backup", "Projects", "Volumes");
    println!("{}", "-".repeat(60));

    for set in sets.iter().rev() {
        match BackupManifest::load(set) {
            Ok(Some(manifest)) => {
                let volumes: usize = manifest.projects.iter().map(|p| p.volumes.len()).sum();
                println!("{:<40} {:<10} {:<10}", set.id, manifest.projects.len(), volumes);
            }
            Ok(None) => println!("{:<40} {:<10} {:<10}", set.id, "-", "-"),
            Err(e) => println!("{:<40} {}", set.id, format!("unreadable manifest: {:#}", e).red()),
        }
    }

    Ok(())
}

fn handle_config(command: ConfigCommands, settings: &Settings, config_path: &Path) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("Configuration ({}):\n", config_path.display());
            println!("  source_root:  {}", settings.source_root.display());
            println!("  backup_root:  {}", settings.backup_root.display());
            println!("  restore_root: {}", settings.restore_root.display());
            println!("  mover_image:  {}", settings.mover_image);
        }
        ConfigCommands::Save => {
            AppConfig::from(settings).save_to(config_path)?;
            println!("✓ Configuration saved to {}", config_path.display());
        }
    }

    Ok(())
}
