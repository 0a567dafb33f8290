/// Backup directory layout and first-time activation
///
/// The directory lives at `<content-root>/flashbackup_<token>/`. The token is
/// random so the location can't be guessed, and it is persisted once: a new
/// token would point at an empty directory and strand every existing backup.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::utils::{
    generate_hex_string, AppState, ACCESS_FILE, ACCESS_MARKER, ACCESS_RULES, BACKUP_DIR_PREFIX, FOLDER_TOKEN_BYTES,
    INDEX_FILE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderToken(String);

impl FolderToken {
    pub fn generate() -> Self {
        Self(generate_hex_string(FOLDER_TOKEN_BYTES))
    }

    /// Accepts any non-empty alphanumeric token so hand-edited state still works
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn backup_dir(&self, content_root: &Path) -> PathBuf {
        content_root.join(format!("{}{}", BACKUP_DIR_PREFIX, self.0))
    }

    /// Persisted token, if activation has happened
    pub fn load(state_path: &Path) -> Result<Option<Self>> {
        let state = AppState::load_from(state_path)?;
        match state.folder_token.as_deref() {
            None => Ok(None),
            Some(raw) => FolderToken::parse(raw)
                .map(Some)
                .with_context(|| format!("Invalid folder_token in {}", state_path.display())),
        }
    }

    /// Persisted token, generating and saving one on first use.
    /// Returns whether a new token was created.
    pub fn load_or_create(state_path: &Path) -> Result<(Self, bool)> {
        if let Some(token) = Self::load(state_path)? {
            return Ok((token, false));
        }

        let token = Self::generate();
        let mut state = AppState::load_from(state_path)?;
        state.folder_token = Some(token.0.clone());
        state.save_to(state_path).context("Failed to persist folder token")?;

        tracing::info!(state = %state_path.display(), "generated new folder token");
        Ok((token, true))
    }
}

impl fmt::Display for FolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write `lines` between `# BEGIN <marker>` and `# END <marker>` in `path`.
///
/// An existing block is replaced in place, otherwise the block is appended.
/// Everything outside the markers is left untouched. Creates the file if needed.
pub fn insert_with_markers(path: &Path, marker: &str, lines: &[&str]) -> Result<()> {
    let begin = format!("# BEGIN {}", marker);
    let end = format!("# END {}", marker);

    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        String::new()
    };

    let mut block = vec![begin.clone()];
    block.extend(lines.iter().map(|l| l.to_string()));
    block.push(end.clone());

    let current: Vec<&str> = existing.lines().collect();
    let start = current.iter().position(|l| l.trim() == begin);
    let stop = start.and_then(|s| current[s..].iter().position(|l| l.trim() == end).map(|p| s + p));

    let mut output: Vec<String> = Vec::new();
    match (start, stop) {
        (Some(s), Some(e)) => {
            output.extend(current[..s].iter().map(|l| l.to_string()));
            output.extend(block);
            output.extend(current[e + 1..].iter().map(|l| l.to_string()));
        }
        _ => {
            output.extend(current.iter().map(|l| l.to_string()));
            output.extend(block);
        }
    }

    let mut contents = output.join("\n");
    contents.push('\n');
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

/// Create `path` if missing without truncating an existing file
fn touch(path: &Path) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Activation {
    pub token: FolderToken,
    pub backup_dir: PathBuf,
    pub token_created: bool,
    pub dir_created: bool,
}

/// Prepare the backup directory: token, folder, access rules and index file.
/// Safe to run repeatedly.
pub fn activate(state_path: &Path, content_root: &Path) -> Result<Activation> {
    let (token, token_created) = FolderToken::load_or_create(state_path)?;
    let backup_dir = token.backup_dir(content_root);

    let dir_created = !backup_dir.is_dir();
    if dir_created {
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("Failed to create backup directory {}", backup_dir.display()))?;
    }

    insert_with_markers(&backup_dir.join(ACCESS_FILE), ACCESS_MARKER, ACCESS_RULES)?;
    touch(&backup_dir.join(INDEX_FILE))?;

    tracing::info!(dir = %backup_dir.display(), token_created, dir_created, "backup directory ready");

    Ok(Activation {
        token,
        backup_dir,
        token_created,
        dir_created,
    })
}
