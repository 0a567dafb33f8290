/// Backup execution
///
/// One run: check preconditions, rotate old backups, dump the database into a
/// freshly named artifact. Rotation happens first so the new file is never
/// considered for deletion in the same run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::core::artifact::ArtifactName;
use crate::core::config::{BackupConfig, DatabaseConfig};
use crate::core::dump::{DumpCommand, DumpOutcome};
use crate::core::error::BackupError;
use crate::core::rotation::{rotate_backups, RotationReport};
use crate::utils::{find_program, format_bytes};

/// Why a run did nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingDirectory(String),
    DumpToolUnavailable(String),
    CompressorUnavailable(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingDirectory(dir) if dir.is_empty() => write!(f, "backup directory is not configured"),
            SkipReason::MissingDirectory(dir) => write!(f, "backup directory {} does not exist", dir),
            SkipReason::DumpToolUnavailable(tool) => write!(f, "{} cannot be executed", tool),
            SkipReason::CompressorUnavailable(tool) => write!(f, "compressor {} cannot be executed", tool),
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Completed {
        dump: DumpOutcome,
        /// `None` when the directory could not be scanned
        rotation: Option<RotationReport>,
    },
}

pub struct BackupExecutor {
    config: BackupConfig,
    database: DatabaseConfig,
}

impl BackupExecutor {
    pub fn new(config: BackupConfig, database: DatabaseConfig) -> Self {
        Self { config, database }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn check_preconditions(&self) -> Option<SkipReason> {
        self.check_preconditions_with(find_program)
    }

    fn check_preconditions_with<F>(&self, find: F) -> Option<SkipReason>
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        let dir = &self.config.backup_dir;
        if dir.as_os_str().is_empty() || !dir.is_dir() {
            return Some(SkipReason::MissingDirectory(dir.display().to_string()));
        }

        if find(&self.config.dump_tool).is_none() {
            return Some(SkipReason::DumpToolUnavailable(self.config.dump_tool.clone()));
        }

        if let Some(compressor) = self.config.compression.compressor() {
            if find(compressor).is_none() {
                return Some(SkipReason::CompressorUnavailable(compressor.to_string()));
            }
        }

        None
    }

    /// The dump command a run at `now` would execute
    pub fn plan(&self, now: DateTime<Local>) -> DumpCommand {
        let name = ArtifactName::new(now, self.config.compression);
        self.command_for(&self.config.backup_dir, &name)
    }

    fn command_for(&self, dir: &Path, name: &ArtifactName) -> DumpCommand {
        DumpCommand::new(
            self.config.dump_tool.clone(),
            self.database.clone(),
            self.config.compression,
            self.config.credentials,
            dir.join(name.file_name()),
        )
    }

    pub async fn run(&self) -> Result<RunOutcome, BackupError> {
        self.run_at(Local::now()).await
    }

    /// Run using `now` for both the artifact name and the rotation cutoff
    pub async fn run_at(&self, now: DateTime<Local>) -> Result<RunOutcome, BackupError> {
        if let Some(reason) = self.check_preconditions() {
            tracing::warn!(%reason, "skipping backup");
            return Ok(RunOutcome::Skipped(reason));
        }

        let dir = &self.config.backup_dir;
        let name = ArtifactName::new(now, self.config.compression);

        let rotation = match rotate_backups(dir, now, self.config.retention, self.config.age_source) {
            Ok(report) => {
                tracing::debug!(
                    deleted = report.deleted.len(),
                    retained = report.retained,
                    failures = report.failures.len(),
                    "rotation finished"
                );
                Some(report)
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "rotation failed, continuing with backup");
                None
            }
        };

        let command = self.command_for(dir, &name);
        tracing::info!(file = %name, command = %command.to_shell_string(false), "starting database dump");

        let dump = match command.run(self.config.dump_timeout).await {
            Ok(dump) => dump,
            Err(e) => {
                tracing::error!(file = %name, error = %e, "database dump did not complete");
                return Err(e);
            }
        };

        if !dump.success() {
            tracing::error!(
                file = %name,
                status = %dump.status_summary(),
                stderr = %dump.stderr.trim(),
                elapsed_ms = dump.elapsed.as_millis() as u64,
                "database dump failed"
            );
            return Err(BackupError::DumpFailed(Box::new(dump)));
        }

        tracing::info!(
            file = %name,
            size = %format_bytes(dump.bytes_written),
            elapsed_ms = dump.elapsed.as_millis() as u64,
            "backup created"
        );

        Ok(RunOutcome::Completed { dump, rotation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::CompressionMode;
    use crate::core::dump::CredentialMode;
    use crate::core::rotation::{AgeSource, RetentionPolicy};
    use crate::utils::{ACCESS_FILE, INDEX_FILE};
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    fn database() -> DatabaseConfig {
        DatabaseConfig {
            host: "localhost".to_string(),
            user: "root".to_string(),
            password: "secret".to_string(),
            name: "wp".to_string(),
        }
    }

    fn config(dir: &Path, tool: &str, compression: CompressionMode) -> BackupConfig {
        BackupConfig {
            backup_dir: dir.to_path_buf(),
            compression,
            retention: RetentionPolicy::ONE_WEEK,
            age_source: AgeSource::Filename,
            credentials: CredentialMode::Argument,
            dump_tool: tool.to_string(),
            dump_timeout: None,
        }
    }

    fn artifacts(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| ArtifactName::parse(n).is_some())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_missing_directory_skips() {
        let dir = TempDir::new().unwrap();
        let executor = BackupExecutor::new(config(&dir.path().join("gone"), "echo", CompressionMode::None), database());

        let outcome = executor.run().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped(SkipReason::MissingDirectory(_))));
    }

    #[tokio::test]
    async fn test_unavailable_dump_tool_skips_without_writing() {
        let dir = TempDir::new().unwrap();
        let executor = BackupExecutor::new(
            config(dir.path(), "flashbackup-no-such-mysqldump", CompressionMode::None),
            database(),
        );

        let outcome = executor.run().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped(SkipReason::DumpToolUnavailable(_))));
        assert!(artifacts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_run_writes_one_artifact() {
        let dir = TempDir::new().unwrap();
        let executor = BackupExecutor::new(config(dir.path(), "echo", CompressionMode::None), database());

        let outcome = executor.run().await.unwrap();
        let RunOutcome::Completed { dump, rotation } = outcome else {
            panic!("expected a completed run");
        };

        assert!(rotation.is_some());
        let names = artifacts(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".sql"));
        assert_eq!(dump.file, dir.path().join(&names[0]));
        assert_eq!(
            fs::read_to_string(&dump.file).unwrap(),
            "--complete-insert -u root -psecret wp -h localhost\n"
        );
    }

    #[tokio::test]
    async fn test_gzip_run_uses_gz_extension() {
        let dir = TempDir::new().unwrap();
        let executor = BackupExecutor::new(config(dir.path(), "echo", CompressionMode::Gzip), database());

        executor.run().await.unwrap();
        let names = artifacts(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".sql.gz"));
    }

    #[tokio::test]
    async fn test_same_second_runs_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let executor = BackupExecutor::new(config(dir.path(), "echo", CompressionMode::None), database());
        let now = Local::now();

        executor.run_at(now).await.unwrap();
        executor.run_at(now).await.unwrap();
        assert_eq!(artifacts(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_rotation_runs_before_dump() {
        let dir = TempDir::new().unwrap();
        let now = Local::now();
        let stale = ArtifactName::new(now - Duration::days(8), CompressionMode::None).file_name();
        let recent = ArtifactName::new(now - Duration::days(3), CompressionMode::None).file_name();
        for name in [&stale, &recent] {
            fs::write(dir.path().join(name), b"-- dump").unwrap();
        }
        fs::write(dir.path().join(INDEX_FILE), b"").unwrap();
        fs::write(dir.path().join(ACCESS_FILE), b"").unwrap();

        let executor = BackupExecutor::new(config(dir.path(), "echo", CompressionMode::None), database());
        let RunOutcome::Completed { rotation, .. } = executor.run_at(now).await.unwrap() else {
            panic!("expected a completed run");
        };

        assert_eq!(rotation.unwrap().deleted, vec![stale.clone()]);
        let names = artifacts(dir.path());
        assert_eq!(names.len(), 2);
        assert!(names.contains(&recent));
        assert!(!names.contains(&stale));
        assert!(dir.path().join(INDEX_FILE).exists());
        assert!(dir.path().join(ACCESS_FILE).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_dump_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let tools = TempDir::new().unwrap();
        let tool = tools.path().join("broken-dump");
        fs::write(&tool, "#!/bin/sh\necho 'Unknown database' >&2\nexit 3\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let dir = TempDir::new().unwrap();
        let executor = BackupExecutor::new(
            config(dir.path(), &tool.to_string_lossy(), CompressionMode::None),
            database(),
        );

        let err = executor.run().await.unwrap_err();
        let BackupError::DumpFailed(dump) = err else {
            panic!("expected DumpFailed, got {:?}", err);
        };
        assert_eq!(dump.dump.code, Some(3));
        assert!(dump.stderr.contains("Unknown database"));
        // The partial artifact is left for the operator
        assert_eq!(artifacts(dir.path()).len(), 1);
    }

    #[test]
    fn test_missing_compressor_skips() {
        let dir = TempDir::new().unwrap();
        let executor = BackupExecutor::new(config(dir.path(), "echo", CompressionMode::Gzip), database());

        let skip = executor.check_preconditions_with(|program| match program {
            "gzip" => None,
            other => Some(PathBuf::from("/usr/bin").join(other)),
        });
        assert_eq!(skip, Some(SkipReason::CompressorUnavailable("gzip".to_string())));

        let plain = BackupExecutor::new(config(dir.path(), "echo", CompressionMode::None), database());
        assert_eq!(
            plain.check_preconditions_with(|program| (program != "gzip").then(|| PathBuf::from(program))),
            None
        );
    }

    #[tokio::test]
    async fn test_default_age_source_rotates_by_metadata() {
        let dir = TempDir::new().unwrap();
        // Name says it was made today, but only the filesystem time counts
        let old = ArtifactName::new(Local::now(), CompressionMode::None).file_name();
        fs::write(dir.path().join(&old), b"-- old dump").unwrap();
        fs::write(dir.path().join("notes.txt"), b"operator file").unwrap();
        fs::write(dir.path().join(INDEX_FILE), b"").unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let executor = BackupExecutor::new(
            BackupConfig {
                retention: RetentionPolicy::from_secs(1).unwrap(),
                age_source: AgeSource::default(),
                ..config(dir.path(), "echo", CompressionMode::None)
            },
            database(),
        );
        let RunOutcome::Completed { dump, rotation } = executor.run().await.unwrap() else {
            panic!("expected a completed run");
        };

        let mut deleted = rotation.unwrap().deleted;
        deleted.sort();
        let mut expected = vec![old.clone(), "notes.txt".to_string()];
        expected.sort();
        assert_eq!(deleted, expected);

        assert!(dump.file.exists());
        assert_eq!(artifacts(dir.path()).len(), 1);
        assert!(dir.path().join(INDEX_FILE).exists());
    }

    #[test]
    fn test_plan_targets_backup_dir() {
        let dir = TempDir::new().unwrap();
        let executor = BackupExecutor::new(config(dir.path(), "mysqldump", CompressionMode::Zip), database());

        let command = executor.plan(Local::now());
        assert_eq!(command.target().parent().unwrap(), dir.path());
        assert!(command.to_shell_string(false).contains("| zip >"));
    }
}
