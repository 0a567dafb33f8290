/// CLI argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "flashbackup")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Settings file (default: ~/.config/flashbackup/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the backup directory and its access rules
    Activate,

    /// Run one backup now
    Run {
        /// Print the dump command without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Run backups on the configured interval until interrupted
    Daemon,

    /// Delete backups older than the retention period
    Rotate,

    /// List existing backups, newest first
    List,

    /// Check that the dump tools and backup directory are usable
    Check,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Check for a newer release
    Upgrade {
        /// Ignore the cached release check
        #[arg(short, long)]
        refresh: bool,

        /// Download the release package to this path
        #[arg(short, long)]
        download: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// View the resolved configuration
    View,

    /// Validate configuration
    Validate,

    /// Show where settings and state are stored
    Path,
}
