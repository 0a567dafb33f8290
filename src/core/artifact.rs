/// Backup artifact naming and listing
///
/// Artifacts are named `DB_Backup_<Y.m.d-H.i.s>_<6 hex chars>.sql[.gz|.zip]`.
/// The random suffix keeps two runs in the same second from colliding.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;
use crate::utils::{generate_hex_string, ARTIFACT_PREFIX, ARTIFACT_TIMESTAMP_FORMAT, DISAMBIGUATOR_BYTES};

/// Output compression, selecting both the file extension and the compressor in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    #[default]
    Gzip,
    Zip,
    None,
}

impl CompressionMode {
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionMode::Gzip => ".sql.gz",
            CompressionMode::Zip => ".sql.zip",
            CompressionMode::None => ".sql",
        }
    }

    /// Program the dump output is piped through, if any
    pub fn compressor(&self) -> Option<&'static str> {
        match self {
            CompressionMode::Gzip => Some("gzip"),
            CompressionMode::Zip => Some("zip"),
            CompressionMode::None => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMode::Gzip => "gz",
            CompressionMode::Zip => "zip",
            CompressionMode::None => "none",
        }
    }
}

impl FromStr for CompressionMode {
    type Err = ConfigError;

    /// An empty value means "not configured" and resolves to gzip, never to none
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "gz" | "gzip" => Ok(CompressionMode::Gzip),
            "zip" => Ok(CompressionMode::Zip),
            "none" => Ok(CompressionMode::None),
            _ => Err(ConfigError::InvalidCompression(s.to_string())),
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed or freshly generated artifact file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub timestamp: NaiveDateTime,
    pub disambiguator: String,
    pub compression: CompressionMode,
}

fn artifact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^DB_Backup_(\d{4}\.\d{2}\.\d{2}-\d{2}\.\d{2}\.\d{2})_([0-9a-f]{6})\.sql(\.gz|\.zip)?$")
            .expect("artifact pattern is a valid regex")
    })
}

impl ArtifactName {
    /// New name for a backup taken at `now`, with a fresh random disambiguator
    pub fn new(now: DateTime<Local>, compression: CompressionMode) -> Self {
        let timestamp = now.naive_local();
        Self {
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            disambiguator: generate_hex_string(DISAMBIGUATOR_BYTES),
            compression,
        }
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let captures = artifact_pattern().captures(file_name)?;
        let timestamp = NaiveDateTime::parse_from_str(&captures[1], ARTIFACT_TIMESTAMP_FORMAT).ok()?;
        let compression = match captures.get(3).map(|m| m.as_str()) {
            Some(".gz") => CompressionMode::Gzip,
            Some(".zip") => CompressionMode::Zip,
            _ => CompressionMode::None,
        };

        Some(Self {
            timestamp,
            disambiguator: captures[2].to_string(),
            compression,
        })
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}{}_{}{}",
            ARTIFACT_PREFIX,
            self.timestamp.format(ARTIFACT_TIMESTAMP_FORMAT),
            self.disambiguator,
            self.compression.extension()
        )
    }

    /// Local time embedded in the name. `None` for times skipped by a DST change.
    pub fn created_at(&self) -> Option<DateTime<Local>> {
        Local.from_local_datetime(&self.timestamp).earliest()
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// A backup file found on disk
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub name: ArtifactName,
    pub size_bytes: u64,
}

/// List artifacts in `dir`, newest first. Files that don't look like backups are skipped.
pub fn list_artifacts(dir: &Path) -> Result<Vec<BackupArtifact>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read backup directory {}", dir.display()))?;

    let mut artifacts = Vec::new();
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(ArtifactName::parse) else {
            continue;
        };

        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        artifacts.push(BackupArtifact {
            path: entry.path(),
            name,
            size_bytes,
        });
    }

    artifacts.sort_by(|a, b| {
        b.name
            .timestamp
            .cmp(&a.name.timestamp)
            .then_with(|| b.name.disambiguator.cmp(&a.name.disambiguator))
    });

    Ok(artifacts)
}
