pub mod artifact;
pub mod backup;
pub mod config;
pub mod dump;
pub mod error;
pub mod layout;
pub mod rotation;
pub mod scheduler;
pub mod updater;

pub use artifact::{list_artifacts, ArtifactName, BackupArtifact, CompressionMode};
pub use backup::{BackupExecutor, RunOutcome, SkipReason};
pub use config::{BackupConfig, DatabaseConfig, Settings};
pub use dump::{CredentialMode, DumpCommand, DumpOutcome};
pub use error::{BackupError, ConfigError};
pub use layout::{activate, Activation, FolderToken};
pub use rotation::{rotate_backups, AgeSource, RetentionPolicy, RotationReport};
pub use scheduler::Scheduler;
pub use updater::{GitHubReleases, ReleaseCache, UpdateChecker, VersionInfo};
