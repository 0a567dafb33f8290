mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, ConfigCommands};
use flashbackup::core::updater::{download_package, GitHubReleases, ReleaseCache, UpdateChecker};
use flashbackup::core::{
    activate, list_artifacts, rotate_backups, BackupExecutor, ConfigError, DatabaseConfig, FolderToken, RunOutcome,
    Scheduler, Settings,
};
use flashbackup::utils::{find_program, format_age, format_bytes, is_dir_writable, AppConfig, AppState};

/// Where settings and state live for this invocation
struct Paths {
    config: PathBuf,
    state: PathBuf,
}

impl Paths {
    fn resolve(config_override: Option<PathBuf>) -> Result<Self> {
        let config = match config_override {
            Some(path) => path,
            None => AppConfig::default_path()?,
        };
        let state = AppState::path_beside(&config);
        Ok(Self { config, state })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let paths = Paths::resolve(cli.config)?;

    match cli.command {
        Commands::Activate => {
            handle_activate(&paths)?;
        }
        Commands::Run { dry_run } => {
            handle_run(&paths, dry_run).await?;
        }
        Commands::Daemon => {
            handle_daemon(&paths).await?;
        }
        Commands::Rotate => {
            handle_rotate(&paths)?;
        }
        Commands::List => {
            handle_list(&paths)?;
        }
        Commands::Check => {
            handle_check(&paths)?;
        }
        Commands::Config { command } => {
            handle_config(&paths, command)?;
        }
        Commands::Upgrade { refresh, download } => {
            handle_upgrade(refresh, download).await?;
        }
    }

    Ok(())
}

fn load_settings(paths: &Paths) -> Result<Settings> {
    let raw = AppConfig::load_from(&paths.config)?;
    Settings::resolve(&raw, |key| std::env::var(key).ok())
        .with_context(|| format!("Invalid settings in {}", paths.config.display()))
}

fn load_token(paths: &Paths) -> Result<FolderToken> {
    FolderToken::load(&paths.state)?.ok_or_else(|| ConfigError::MissingFolderToken.into())
}

fn load_executor(paths: &Paths) -> Result<(Settings, BackupExecutor)> {
    let settings = load_settings(paths)?;
    let token = load_token(paths)?;
    let database = DatabaseConfig::from_env().context("Database settings are incomplete")?;

    let executor = BackupExecutor::new(settings.backup_config(&token), database);
    Ok((settings, executor))
}

fn handle_activate(paths: &Paths) -> Result<()> {
    let settings = load_settings(paths)?;
    let activation = activate(&paths.state, &settings.content_root)?;

    if activation.dir_created {
        println!("{} Created backup directory", "✓".green());
    } else {
        println!("{} Backup directory already exists", "✓".green());
    }
    println!("  Path:     {}", activation.backup_dir.display());
    println!("  Interval: {}", humantime::format_duration(settings.interval));

    if activation.token_created {
        println!("\nFolder token saved to {}", paths.state.display());
        println!("Keep this file: a new token would point at an empty directory.");
    }

    Ok(())
}

async fn handle_run(paths: &Paths, dry_run: bool) -> Result<()> {
    let (_, executor) = load_executor(paths)?;

    if dry_run {
        println!("{}", executor.plan(Local::now()).to_shell_string(false));
        return Ok(());
    }

    match executor.run().await? {
        RunOutcome::Skipped(reason) => {
            println!("{} Backup skipped: {}", "⚠".yellow(), reason);
        }
        RunOutcome::Completed { dump, rotation } => {
            println!("{} Backup created", "✓".green());
            println!("  File:    {}", dump.file.display());
            println!("  Size:    {}", format_bytes(dump.bytes_written));
            println!("  Elapsed: {:.1}s", dump.elapsed.as_secs_f64());

            match rotation {
                Some(report) => {
                    println!("  Rotated: {} deleted, {} kept", report.deleted.len(), report.retained);
                    for failure in &report.failures {
                        println!("  {} Could not delete {}: {}", "✗".red(), failure.name, failure.error);
                    }
                }
                None => println!("  {} Rotation did not run", "⚠".yellow()),
            }
        }
    }

    Ok(())
}

async fn handle_daemon(paths: &Paths) -> Result<()> {
    let (settings, executor) = load_executor(paths)?;
    let scheduler = Scheduler::new(executor, settings.interval);

    println!(
        "Running backups every {} (Ctrl+C to stop)",
        humantime::format_duration(scheduler.interval())
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let runs = scheduler.run_until(shutdown, None).await;
    println!("Stopped after {} backup cycle(s)", runs);

    Ok(())
}

fn handle_rotate(paths: &Paths) -> Result<()> {
    let settings = load_settings(paths)?;
    let config = settings.backup_config(&load_token(paths)?);

    let report = rotate_backups(&config.backup_dir, Local::now(), config.retention, config.age_source)
        .with_context(|| format!("Failed to rotate {}", config.backup_dir.display()))?;

    println!(
        "Retention: {} (age from {})\n",
        humantime::format_duration(config.retention.max_age()),
        config.age_source
    );
    for name in &report.deleted {
        println!("  {} Deleted {}", "✓".green(), name);
    }
    for failure in &report.failures {
        println!("  {} Could not delete {}: {}", "✗".red(), failure.name, failure.error);
    }
    println!("\n{} deleted, {} kept", report.deleted.len(), report.retained);

    if !report.is_clean() {
        anyhow::bail!("{} entries could not be deleted", report.failures.len());
    }
    Ok(())
}

fn handle_list(paths: &Paths) -> Result<()> {
    let settings = load_settings(paths)?;
    let backup_dir = load_token(paths)?.backup_dir(&settings.content_root);
    let artifacts = list_artifacts(&backup_dir)?;

    println!("Backups in {}\n", backup_dir.display());
    if artifacts.is_empty() {
        println!("No backups yet");
        return Ok(());
    }

    println!("{:<45} {:>12} {:>10}", "File", "Size", "Age");
    println!("{}", "-".repeat(69));

    let now = Local::now();
    let mut total = 0;
    for artifact in &artifacts {
        let age = artifact
            .name
            .created_at()
            .map(|created| format_age(created, now))
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "{:<45} {:>12} {:>10}",
            artifact.name.file_name(),
            format_bytes(artifact.size_bytes),
            age
        );
        total += artifact.size_bytes;
    }

    println!("\n{} backup(s), {} total", artifacts.len(), format_bytes(total));
    Ok(())
}

fn print_program(program: &str) -> bool {
    match find_program(program) {
        Some(path) => {
            println!("  {} {:<12} {}", "✓".green(), program, path.display());
            true
        }
        None => {
            println!("  {} {:<12} not found", "✗".red(), program);
            false
        }
    }
}

fn handle_check(paths: &Paths) -> Result<()> {
    let settings = load_settings(paths)?;

    println!("Programs:");
    let dump_ok = print_program(&settings.dump_tool);
    if let Some(compressor) = settings.compression.compressor() {
        if !print_program(compressor) {
            println!(
                "\n{} {} is missing: backups will be skipped until it is installed or compression is changed.",
                "⚠".yellow(),
                compressor
            );
        }
    }

    if !dump_ok {
        tracing::warn!(tool = %settings.dump_tool, "dump tool cannot be executed, backups will be skipped");
        println!(
            "\n{} FlashBackup can't run: {} cannot be executed on this system.",
            "⚠".yellow(),
            settings.dump_tool
        );
    }

    println!("\nBackup directory:");
    match FolderToken::load(&paths.state)? {
        None => println!("  {} Not activated, run `flashbackup activate`", "✗".red()),
        Some(token) => {
            let dir = token.backup_dir(&settings.content_root);
            if !dir.is_dir() {
                println!("  {} {} does not exist", "✗".red(), dir.display());
            } else if !is_dir_writable(&dir) {
                println!("  {} {} is not writable", "✗".red(), dir.display());
            } else {
                println!("  {} {}", "✓".green(), dir.display());
            }
        }
    }

    println!("\nDatabase:");
    match DatabaseConfig::from_env() {
        Ok(db) => println!("  {} {}@{}/{}", "✓".green(), db.user, db.host, db.name),
        Err(e) => println!("  {} {}", "✗".red(), e),
    }

    Ok(())
}

fn handle_config(paths: &Paths, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::View => {
            let settings = load_settings(paths)?;

            println!("Configuration ({}):\n", paths.config.display());
            println!("content_root: {}", settings.content_root.display());
            match FolderToken::load(&paths.state)? {
                Some(token) => println!("backup_dir:   {}", token.backup_dir(&settings.content_root).display()),
                None => println!("backup_dir:   <not activated>"),
            }
            println!("compression:  {}", settings.compression);
            println!("rotate_time:  {}", humantime::format_duration(settings.retention.max_age()));
            println!("interval:     {}", humantime::format_duration(settings.interval));
            match settings.dump_timeout {
                Some(timeout) => println!("dump_timeout: {}", humantime::format_duration(timeout)),
                None => println!("dump_timeout: none"),
            }
            println!("age_source:   {}", settings.age_source);
            println!("credentials:  {}", settings.credentials);
            println!("dump_tool:    {}", settings.dump_tool);

            println!("\nDatabase:\n");
            match DatabaseConfig::from_env() {
                Ok(db) => {
                    println!("DB_HOST:     {}", db.host);
                    println!("DB_USER:     {}", db.user);
                    println!("DB_PASSWORD: {}", db.masked_password());
                    println!("DB_NAME:     {}", db.name);
                }
                Err(e) => println!("{} {}", "✗".red(), e),
            }
        }
        ConfigCommands::Validate => {
            let errors = validate(paths);

            if errors.is_empty() {
                println!("{} Configuration is valid", "✓".green());
            } else {
                println!("{} Configuration errors:", "✗".red());
                for error in &errors {
                    println!("  - {}", error);
                }
                anyhow::bail!("{} configuration error(s)", errors.len());
            }
        }
        ConfigCommands::Path => {
            println!("Settings: {}", paths.config.display());
            println!("State:    {}", paths.state.display());
            if let Ok(cache) = ReleaseCache::default_location() {
                println!("Cache:    {}", cache.path().display());
            }
        }
    }

    Ok(())
}

/// Every configuration problem, in the order a run would hit them
fn validate(paths: &Paths) -> Vec<String> {
    let mut errors = Vec::new();

    let settings = match AppConfig::load_from(&paths.config) {
        Ok(raw) => match Settings::resolve(&raw, |key| std::env::var(key).ok()) {
            Ok(settings) => Some(settings),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        },
        Err(e) => {
            errors.push(format!("{:#}", e));
            None
        }
    };

    match FolderToken::load(&paths.state) {
        Ok(Some(token)) => {
            if let Some(settings) = &settings {
                let dir = token.backup_dir(&settings.content_root);
                if !dir.is_dir() {
                    errors.push(format!("backup directory {} does not exist", dir.display()));
                }
            }
        }
        Ok(None) => errors.push(ConfigError::MissingFolderToken.to_string()),
        Err(e) => errors.push(format!("{:#}", e)),
    }

    if let Err(e) = DatabaseConfig::from_env() {
        errors.push(e.to_string());
    }

    errors
}

async fn handle_upgrade(refresh: bool, download: Option<PathBuf>) -> Result<()> {
    let cache = ReleaseCache::default_location()?;
    if refresh {
        cache.clear()?;
    }

    println!("Checking for updates...\n");
    let checker = UpdateChecker::new(GitHubReleases::flashbackup()?, cache);
    let info = checker.check(Utc::now()).await;

    println!("Current version: {}", info.current_version);
    match &info.latest_version {
        Some(latest) => println!("Latest version:  {}", latest),
        None => println!("Latest version:  {}", "unavailable".dimmed()),
    }

    if info.update_available {
        println!("\n{} Update available", "⬆".green());
        if let Some(url) = &info.release_url {
            println!("  {}", url);
        }
        if let Some(notes) = info.release_notes.as_deref().filter(|n| !n.trim().is_empty()) {
            println!("\nRelease notes:\n{}", notes.trim());
        }
    } else if info.latest_version.is_some() {
        println!("\n{} You are running the latest version", "✓".green());
    }

    if let Some(path) = download {
        save_package(&info, &path).await?;
    }

    Ok(())
}

async fn save_package(info: &flashbackup::core::VersionInfo, path: &Path) -> Result<()> {
    println!("\nDownloading release package...");
    let bytes = download_package(info, path).await?;
    println!("{} Saved {} to {}", "✓".green(), format_bytes(bytes), path.display());
    Ok(())
}
