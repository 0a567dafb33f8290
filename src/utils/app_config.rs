/// Settings and persisted state files
/// Stored in ~/.config/flashbackup/{config.toml,state.toml}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{APP_DIR_NAME, CONFIG_FILE, STATE_FILE};

/// A duration written either as whole seconds or as a humantime string ("1week")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationSetting {
    Seconds(u64),
    Text(String),
}

/// Raw user settings. Values are validated in `core::config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Parent of the `flashbackup_<token>` directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_root: Option<String>,
    /// gz, zip or none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotate_time: Option<DurationSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_tool: Option<String>,
}

/// Get the flashbackup config directory
pub fn app_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Failed to get config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn read_toml<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_toml<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    let contents = toml::to_string_pretty(value).context("Failed to serialize config")?;
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

impl AppConfig {
    /// Get config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(app_config_dir()?.join(CONFIG_FILE))
    }

    /// Load settings; a missing file means all defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        read_toml(path)
    }
}

/// State written by flashbackup itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_token: Option<String>,
}

impl AppState {
    /// State lives next to the config file
    pub fn path_beside(config_path: &Path) -> PathBuf {
        config_path
            .parent()
            .map(|dir| dir.join(STATE_FILE))
            .unwrap_or_else(|| PathBuf::from(STATE_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        read_toml(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        write_toml(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.compression.is_none());
        assert!(config.rotate_time.is_none());
    }

    #[test]
    fn test_rotate_time_accepts_seconds_or_text() {
        let config: AppConfig = toml::from_str("rotate_time = 2592000\ncompression = \"zip\"").unwrap();
        assert_eq!(config.rotate_time, Some(DurationSetting::Seconds(2_592_000)));
        assert_eq!(config.compression.as_deref(), Some("zip"));

        let config: AppConfig = toml::from_str("rotate_time = \"2weeks\"").unwrap();
        assert_eq!(config.rotate_time, Some(DurationSetting::Text("2weeks".to_string())));
    }

    #[test]
    fn test_state_saved_beside_config() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("nested").join("config.toml");
        let state_path = AppState::path_beside(&config_path);
        assert_eq!(state_path, dir.path().join("nested").join("state.toml"));

        let state = AppState {
            folder_token: Some("0123456789abcdef".to_string()),
        };
        state.save_to(&state_path).unwrap();

        let loaded = AppState::load_from(&state_path).unwrap();
        assert_eq!(loaded.folder_token.as_deref(), Some("0123456789abcdef"));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "compression = [").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }
}
