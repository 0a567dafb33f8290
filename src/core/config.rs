/// Resolved configuration for backup runs
///
/// Raw values come from the settings file (`utils::AppConfig`) and the
/// environment; this module validates them into the typed structs that the
/// executor and rotator take as arguments.

use std::path::PathBuf;
use std::time::Duration;

use crate::core::artifact::CompressionMode;
use crate::core::dump::CredentialMode;
use crate::core::error::ConfigError;
use crate::core::layout::FolderToken;
use crate::core::rotation::{AgeSource, RetentionPolicy};
use crate::utils::{
    mask_sensitive, AppConfig, DurationSetting, APP_DIR_NAME, DAY_IN_SECONDS, DEFAULT_DB_HOST, DEFAULT_DUMP_TOOL,
    DEFAULT_INTERVAL,
};

/// Connection parameters handed to mysqldump
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"****")
            .field("name", &self.name)
            .finish()
    }
}

impl DatabaseConfig {
    /// Read `DB_HOST`, `DB_USER`, `DB_PASSWORD` and `DB_NAME` from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: non_empty("DB_HOST").unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
            user: non_empty("DB_USER").ok_or(ConfigError::MissingDatabaseSetting("DB_USER"))?,
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            name: non_empty("DB_NAME").ok_or(ConfigError::MissingDatabaseSetting("DB_NAME"))?,
        })
    }

    pub fn masked_password(&self) -> String {
        if self.password.is_empty() {
            "<empty>".to_string()
        } else {
            mask_sensitive(&self.password, 1)
        }
    }
}

/// Everything one backup run needs
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub backup_dir: PathBuf,
    pub compression: CompressionMode,
    pub retention: RetentionPolicy,
    pub age_source: AgeSource,
    pub credentials: CredentialMode,
    pub dump_tool: String,
    pub dump_timeout: Option<Duration>,
}

/// Validated settings, independent of the folder token
#[derive(Debug, Clone)]
pub struct Settings {
    pub content_root: PathBuf,
    pub compression: CompressionMode,
    pub retention: RetentionPolicy,
    pub interval: Duration,
    pub dump_timeout: Option<Duration>,
    pub age_source: AgeSource,
    pub credentials: CredentialMode,
    pub dump_tool: String,
}

impl Settings {
    /// Validate raw settings. `env` is consulted for the `FLASHBACKUP_*` overrides.
    pub fn resolve<F>(raw: &AppConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let compression = env("FLASHBACKUP_COMPRESSION")
            .or_else(|| raw.compression.clone())
            .unwrap_or_default()
            .parse::<CompressionMode>()?;

        let rotate_time = env("FLASHBACKUP_ROTATE_TIME")
            .map(DurationSetting::Text)
            .or_else(|| raw.rotate_time.clone());
        let retention = parse_retention(rotate_time.as_ref())?;

        let content_root = match env("FLASHBACKUP_CONTENT_ROOT").or_else(|| raw.content_root.clone()) {
            Some(root) if !root.trim().is_empty() => PathBuf::from(root),
            _ => default_content_root()?,
        };

        let interval_text = raw.interval.as_deref().unwrap_or(DEFAULT_INTERVAL);
        let interval = parse_duration("interval", interval_text)?
            .unwrap_or(Duration::from_secs(DAY_IN_SECONDS));

        let dump_timeout = match raw.dump_timeout.as_deref() {
            Some(text) => parse_duration("dump_timeout", text)?,
            None => None,
        };

        Ok(Self {
            content_root,
            compression,
            retention,
            interval,
            dump_timeout,
            age_source: raw.age_source.as_deref().unwrap_or_default().parse()?,
            credentials: raw.credentials.as_deref().unwrap_or_default().parse()?,
            dump_tool: raw
                .dump_tool
                .clone()
                .filter(|tool| !tool.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DUMP_TOOL.to_string()),
        })
    }

    pub fn backup_config(&self, token: &FolderToken) -> BackupConfig {
        BackupConfig {
            backup_dir: token.backup_dir(&self.content_root),
            compression: self.compression,
            retention: self.retention,
            age_source: self.age_source,
            credentials: self.credentials,
            dump_tool: self.dump_tool.clone(),
            dump_timeout: self.dump_timeout,
        }
    }
}

fn default_content_root() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or(ConfigError::NoContentRoot)
}

/// `Ok(None)` for an empty value, which means "use the default"
fn parse_duration(key: &'static str, text: &str) -> Result<Option<Duration>, ConfigError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let duration = match text.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(text).map_err(|_| ConfigError::InvalidDuration {
            key,
            value: text.to_string(),
        })?,
    };

    if duration.is_zero() {
        return Err(ConfigError::ZeroDuration { key });
    }
    Ok(Some(duration))
}

/// Retention from the `rotate_time` setting; unset or empty means one week
pub fn parse_retention(setting: Option<&DurationSetting>) -> Result<RetentionPolicy, ConfigError> {
    match setting {
        None => Ok(RetentionPolicy::default()),
        Some(DurationSetting::Seconds(secs)) => RetentionPolicy::from_secs(*secs),
        Some(DurationSetting::Text(text)) => match parse_duration("rotate_time", text)? {
            Some(duration) => RetentionPolicy::from_secs(duration.as_secs()),
            None => Ok(RetentionPolicy::default()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn raw_with_root() -> AppConfig {
        AppConfig {
            content_root: Some("/srv/content".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(&raw_with_root(), env_of(&[])).unwrap();
        assert_eq!(settings.compression, CompressionMode::Gzip);
        assert_eq!(settings.retention.as_secs(), 604_800);
        assert_eq!(settings.interval, Duration::from_secs(86_400));
        assert_eq!(settings.dump_tool, "mysqldump");
        assert_eq!(settings.credentials, CredentialMode::Environment);
        assert_eq!(settings.age_source, AgeSource::Metadata);
        assert!(settings.dump_timeout.is_none());
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let raw = AppConfig {
            compression: Some(String::new()),
            rotate_time: Some(DurationSetting::Text(String::new())),
            ..raw_with_root()
        };
        let settings = Settings::resolve(&raw, env_of(&[])).unwrap();
        assert_eq!(settings.compression, CompressionMode::Gzip);
        assert_eq!(settings.retention, RetentionPolicy::ONE_WEEK);
    }

    #[test]
    fn test_month_retention_and_overrides() {
        let raw = AppConfig {
            compression: Some("zip".to_string()),
            rotate_time: Some(DurationSetting::Seconds(2_592_000)),
            dump_timeout: Some("30min".to_string()),
            ..raw_with_root()
        };
        let settings = Settings::resolve(&raw, env_of(&[])).unwrap();
        assert_eq!(settings.compression, CompressionMode::Zip);
        assert_eq!(settings.retention, RetentionPolicy::ONE_MONTH);
        assert_eq!(settings.dump_timeout, Some(Duration::from_secs(1800)));

        let env = env_of(&[("FLASHBACKUP_COMPRESSION", "none"), ("FLASHBACKUP_ROTATE_TIME", "3600")]);
        let settings = Settings::resolve(&raw, env).unwrap();
        assert_eq!(settings.compression, CompressionMode::None);
        assert_eq!(settings.retention.as_secs(), 3600);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let raw = AppConfig {
            compression: Some("rar".to_string()),
            ..raw_with_root()
        };
        assert!(matches!(
            Settings::resolve(&raw, env_of(&[])),
            Err(ConfigError::InvalidCompression(_))
        ));

        let raw = AppConfig {
            rotate_time: Some(DurationSetting::Seconds(0)),
            ..raw_with_root()
        };
        assert!(Settings::resolve(&raw, env_of(&[])).is_err());

        let raw = AppConfig {
            interval: Some("sometimes".to_string()),
            ..raw_with_root()
        };
        assert!(matches!(
            Settings::resolve(&raw, env_of(&[])),
            Err(ConfigError::InvalidDuration { key: "interval", .. })
        ));
    }

    #[test]
    fn test_database_from_lookup() {
        let db = DatabaseConfig::from_lookup(env_of(&[
            ("DB_USER", "wp"),
            ("DB_NAME", "wordpress"),
            ("DB_PASSWORD", "pw"),
        ]))
        .unwrap();
        assert_eq!(db.host, "localhost");
        assert_eq!(db.password, "pw");
        assert!(!format!("{:?}", db).contains("pw\""));

        let missing = DatabaseConfig::from_lookup(env_of(&[("DB_USER", "wp")]));
        assert!(matches!(missing, Err(ConfigError::MissingDatabaseSetting("DB_NAME"))));
    }

    #[test]
    fn test_backup_dir_uses_token() {
        let settings = Settings::resolve(&raw_with_root(), env_of(&[])).unwrap();
        let token = FolderToken::parse("0011223344556677").unwrap();
        let config = settings.backup_config(&token);
        assert_eq!(config.backup_dir, PathBuf::from("/srv/content/flashbackup_0011223344556677"));
    }
}
