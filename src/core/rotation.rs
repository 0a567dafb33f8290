/// Time-based retention for the backup directory
///
/// Every entry older than the retention policy is deleted, except the two
/// sentinel files that keep the directory from being browsed.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::core::artifact::ArtifactName;
use crate::core::error::ConfigError;
use crate::utils::{ACCESS_FILE, INDEX_FILE, MONTH_IN_SECONDS, WEEK_IN_SECONDS};

/// Names that rotation never touches, matched exactly
pub const SENTINEL_FILES: [&str; 2] = [INDEX_FILE, ACCESS_FILE];

/// Maximum age of a backup, in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_age_secs: u64,
}

impl RetentionPolicy {
    pub const ONE_WEEK: Self = Self { max_age_secs: WEEK_IN_SECONDS };
    pub const ONE_MONTH: Self = Self { max_age_secs: MONTH_IN_SECONDS };

    pub fn from_secs(secs: u64) -> Result<Self, ConfigError> {
        if secs == 0 {
            return Err(ConfigError::ZeroDuration { key: "rotate_time" });
        }
        Ok(Self { max_age_secs: secs })
    }

    pub fn as_secs(&self) -> u64 {
        self.max_age_secs
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// An entry exactly as old as the policy is already expired
    pub fn is_expired(&self, age_secs: i64) -> bool {
        age_secs >= 0 && age_secs as u64 >= self.max_age_secs
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::ONE_WEEK
    }
}

/// Where an entry's age comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeSource {
    /// Filesystem metadata. Copies that don't preserve timestamps look new.
    #[default]
    Metadata,
    /// Timestamp embedded in the artifact name. Entries with other names are kept.
    Filename,
}

impl FromStr for AgeSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "metadata" => Ok(AgeSource::Metadata),
            "filename" => Ok(AgeSource::Filename),
            _ => Err(ConfigError::InvalidAgeSource(s.to_string())),
        }
    }
}

impl fmt::Display for AgeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeSource::Metadata => f.write_str("metadata"),
            AgeSource::Filename => f.write_str("filename"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationFailure {
    pub name: String,
    pub error: String,
}

/// What a rotation pass did, for logging
#[derive(Debug, Clone, Default)]
pub struct RotationReport {
    pub deleted: Vec<String>,
    pub retained: usize,
    pub failures: Vec<RotationFailure>,
}

impl RotationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Creation time of an entry as the filesystem reports it.
///
/// Uses the birth time where the platform records one, the inode change time
/// on other Unix filesystems, and the modification time as a last resort.
/// Birth time is preferred over ctime even where both exist: a `chmod`,
/// `chown` or rename updates ctime and would otherwise make an old backup
/// look new again.
pub fn entry_time(metadata: &fs::Metadata) -> io::Result<DateTime<Local>> {
    if let Ok(created) = metadata.created() {
        return Ok(created.into());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Some(changed) = Local.timestamp_opt(metadata.ctime(), 0).single() {
            return Ok(changed);
        }
    }

    metadata.modified().map(DateTime::<Local>::from)
}

/// Delete every entry in `dir` whose age at `reference` is at least `policy`.
///
/// `reference` is supplied by the caller so a backup run uses one notion of
/// "now" for both naming and rotation. Only the top level of `dir` is scanned.
/// A failure on one entry is recorded and the scan moves on.
pub fn rotate_backups(
    dir: &Path,
    reference: DateTime<Local>,
    policy: RetentionPolicy,
    age_source: AgeSource,
) -> io::Result<RotationReport> {
    let mut report = RotationReport::default();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to read directory entry");
                report.failures.push(RotationFailure {
                    name: String::new(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        let file_name = entry.file_name();
        if SENTINEL_FILES.iter().any(|sentinel| file_name == *sentinel) {
            continue;
        }
        let name = file_name.to_string_lossy().into_owned();

        let born = match age_source {
            AgeSource::Metadata => match entry.metadata().and_then(|m| entry_time(&m)) {
                Ok(time) => time,
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "cannot read backup timestamp");
                    report.failures.push(RotationFailure { name, error: e.to_string() });
                    continue;
                }
            },
            AgeSource::Filename => match ArtifactName::parse(&name).and_then(|a| a.created_at()) {
                Some(time) => time,
                None => {
                    report.retained += 1;
                    continue;
                }
            },
        };

        let age_secs = reference.timestamp() - born.timestamp();
        if !policy.is_expired(age_secs) {
            report.retained += 1;
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::info!(file = %name, age_secs, "deleted expired backup");
                report.deleted.push(name);
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "failed to delete expired backup");
                report.failures.push(RotationFailure { name, error: e.to_string() });
            }
        }
    }

    Ok(report)
}
