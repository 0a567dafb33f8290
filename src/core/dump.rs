/// mysqldump invocation
///
/// The pipeline `mysqldump ... [| gzip|zip] > target` is assembled from
/// processes directly instead of going through `sh -c`, so the exit status of
/// each stage and its stderr can be captured.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::core::artifact::CompressionMode;
use crate::core::config::DatabaseConfig;
use crate::core::error::{BackupError, ConfigError};

/// How the database password reaches mysqldump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    /// `MYSQL_PWD` in the child environment, kept off the process list
    #[default]
    Environment,
    /// `-p<password>` on the command line, visible to `ps`
    Argument,
}

impl FromStr for CredentialMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "environment" | "env" => Ok(CredentialMode::Environment),
            "argument" | "arg" => Ok(CredentialMode::Argument),
            _ => Err(ConfigError::InvalidCredentialMode(s.to_string())),
        }
    }
}

impl fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialMode::Environment => f.write_str("environment"),
            CredentialMode::Argument => f.write_str("argument"),
        }
    }
}

/// Quote `value` for a POSIX shell: wrap in single quotes, splice embedded ones
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Exit of one pipeline stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageExit {
    pub program: String,
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
}

impl StageExit {
    fn new(program: &str, status: ExitStatus) -> Self {
        Self {
            program: program.to_string(),
            code: status.code(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for StageExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} exited with {}", self.program, code),
            None => write!(f, "{} killed by signal", self.program),
        }
    }
}

/// Result of one dump run: exit codes, captured stderr and timing
#[derive(Debug, Clone)]
pub struct DumpOutcome {
    pub file: PathBuf,
    pub dump: StageExit,
    pub compressor: Option<StageExit>,
    pub stderr: String,
    pub elapsed: Duration,
    pub bytes_written: u64,
}

impl DumpOutcome {
    pub fn success(&self) -> bool {
        self.dump.success() && self.compressor.as_ref().map_or(true, StageExit::success)
    }

    /// First failing stage, or the dump stage when everything succeeded
    pub fn status_summary(&self) -> String {
        match &self.compressor {
            Some(compressor) if self.dump.success() && !compressor.success() => compressor.to_string(),
            _ => self.dump.to_string(),
        }
    }
}

/// A fully resolved dump pipeline for one target file
#[derive(Debug, Clone)]
pub struct DumpCommand {
    program: String,
    database: DatabaseConfig,
    compression: CompressionMode,
    credentials: CredentialMode,
    target: PathBuf,
}

impl DumpCommand {
    pub fn new(
        program: impl Into<String>,
        database: DatabaseConfig,
        compression: CompressionMode,
        credentials: CredentialMode,
        target: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            database,
            compression,
            credentials,
            target: target.into(),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Arguments in mysqldump order: flags, user, password, database, host
    pub fn dump_args(&self) -> Vec<String> {
        let mut args = vec![
            "--complete-insert".to_string(),
            "-u".to_string(),
            self.database.user.clone(),
        ];

        // An empty -p makes mysqldump prompt on the terminal
        if self.credentials == CredentialMode::Argument && !self.database.password.is_empty() {
            args.push(format!("-p{}", self.database.password));
        }

        args.push(self.database.name.clone());
        args.push("-h".to_string());
        args.push(self.database.host.clone());
        args
    }

    /// Equivalent shell command line, for logs and `--dry-run`
    pub fn to_shell_string(&self, reveal_password: bool) -> String {
        let mut line = format!(
            "{} --complete-insert -u {}",
            self.program, self.database.user
        );

        if self.credentials == CredentialMode::Argument && !self.database.password.is_empty() {
            let password = if reveal_password {
                self.database.password.as_str()
            } else {
                "****"
            };
            line.push_str(&format!(" -p{}", shell_quote(password)));
        }

        line.push_str(&format!(" {} -h {}", self.database.name, self.database.host));

        if let Some(compressor) = self.compression.compressor() {
            line.push_str(&format!(" | {}", compressor));
        }

        line.push_str(&format!(" > {}", shell_quote(&self.target.to_string_lossy())));
        line
    }

    fn dump_process(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.dump_args())
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.credentials == CredentialMode::Environment && !self.database.password.is_empty() {
            cmd.env("MYSQL_PWD", &self.database.password);
        }

        cmd
    }

    /// Run the pipeline to completion, or until `timeout` elapses.
    ///
    /// A non-zero exit is still `Ok`; callers decide what a failed
    /// [`DumpOutcome`] means. On timeout both children are killed and the
    /// partial file is left in place. If a stage cannot be started the
    /// target is removed again.
    pub async fn run(&self, timeout: Option<Duration>) -> Result<DumpOutcome, BackupError> {
        let started = Instant::now();

        let file = std::fs::File::create(&self.target).map_err(|source| BackupError::CreateFile {
            path: self.target.clone(),
            source,
        })?;

        let pipeline = self.run_pipeline(file);
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, pipeline)
                .await
                .unwrap_or_else(|_| {
                    Err(BackupError::TimedOut {
                        after: limit,
                        file: self.target.clone(),
                    })
                }),
            None => pipeline.await,
        };

        let (dump, compressor, stderr) = match result {
            Ok(stages) => stages,
            Err(e @ BackupError::Spawn { .. }) => {
                // Nothing was written, so the empty target must not look like a backup
                if let Err(remove) = std::fs::remove_file(&self.target) {
                    tracing::warn!(file = %self.target.display(), error = %remove, "could not remove empty backup file");
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let bytes_written = std::fs::metadata(&self.target).map(|m| m.len()).unwrap_or(0);

        Ok(DumpOutcome {
            file: self.target.clone(),
            dump,
            compressor,
            stderr,
            elapsed: started.elapsed(),
            bytes_written,
        })
    }

    async fn run_pipeline(
        &self,
        file: std::fs::File,
    ) -> Result<(StageExit, Option<StageExit>, String), BackupError> {
        let spawn_error = |program: &str| {
            let program = program.to_string();
            move |source| BackupError::Spawn { program, source }
        };
        let wait_error = |program: &str| {
            let program = program.to_string();
            move |source| BackupError::Wait { program, source }
        };

        let Some(compressor) = self.compression.compressor() else {
            let child = self
                .dump_process()
                .stdout(Stdio::from(file))
                .spawn()
                .map_err(spawn_error(&self.program))?;
            let output = child.wait_with_output().await.map_err(wait_error(&self.program))?;

            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Ok((StageExit::new(&self.program, output.status), None, stderr));
        };

        let mut dump_child = self
            .dump_process()
            .stdout(Stdio::piped())
            .spawn()
            .map_err(spawn_error(&self.program))?;

        let dump_stdout = dump_child.stdout.take().ok_or_else(|| BackupError::Spawn {
            program: self.program.clone(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "dump stdout not captured"),
        })?;
        let pipe: Stdio = dump_stdout.try_into().map_err(spawn_error(compressor))?;

        let compress_child = Command::new(compressor)
            .stdin(pipe)
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error(compressor))?;

        let (dump_output, compress_output) =
            tokio::join!(dump_child.wait_with_output(), compress_child.wait_with_output());
        let dump_output = dump_output.map_err(wait_error(&self.program))?;
        let compress_output = compress_output.map_err(wait_error(compressor))?;

        let mut stderr = String::from_utf8_lossy(&dump_output.stderr).into_owned();
        stderr.push_str(&String::from_utf8_lossy(&compress_output.stderr));

        Ok((
            StageExit::new(&self.program, dump_output.status),
            Some(StageExit::new(compressor, compress_output.status)),
            stderr,
        ))
    }
}
