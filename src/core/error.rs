/// Error types for the backup core
///
/// CLI handlers wrap these in `anyhow` with context; the scheduler logs them
/// and keeps going.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::dump::DumpOutcome;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid compression mode '{0}' (expected gz, zip or none)")]
    InvalidCompression(String),

    #[error("invalid duration for {key}: '{value}'")]
    InvalidDuration { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    ZeroDuration { key: &'static str },

    #[error("invalid age source '{0}' (expected metadata or filename)")]
    InvalidAgeSource(String),

    #[error("invalid credentials mode '{0}' (expected environment or argument)")]
    InvalidCredentialMode(String),

    #[error("{0} is not set")]
    MissingDatabaseSetting(&'static str),

    #[error("no folder token found, run `flashbackup activate` first")]
    MissingFolderToken,

    #[error("could not determine a content root directory")]
    NoContentRoot,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to create backup file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dump did not finish within {}", humantime::format_duration(*.after))]
    TimedOut { after: Duration, file: PathBuf },

    #[error("dump failed ({}): {}", .0.status_summary(), .0.stderr.trim())]
    DumpFailed(Box<DumpOutcome>),
}
