/// Names, formats and default values shared across flashbackup

/// Prefix of the per-installation backup directory, followed by the folder token
pub const BACKUP_DIR_PREFIX: &str = "flashbackup_";

/// Sentinel files kept in the backup directory
pub const INDEX_FILE: &str = "index.html";
pub const ACCESS_FILE: &str = ".htaccess";

/// Marker name wrapping our block inside `.htaccess`
pub const ACCESS_MARKER: &str = "FlashBackup";
pub const ACCESS_RULES: &[&str] = &["Require all denied"];

/// Artifact naming
pub const ARTIFACT_PREFIX: &str = "DB_Backup_";
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y.%m.%d-%H.%M.%S";
pub const DISAMBIGUATOR_BYTES: usize = 3;
pub const FOLDER_TOKEN_BYTES: usize = 8;

/// Retention presets
pub const DAY_IN_SECONDS: u64 = 86_400;
pub const WEEK_IN_SECONDS: u64 = 7 * DAY_IN_SECONDS;
pub const MONTH_IN_SECONDS: u64 = 30 * DAY_IN_SECONDS;

/// Defaults
pub const DEFAULT_DUMP_TOOL: &str = "mysqldump";
pub const DEFAULT_INTERVAL: &str = "1day";
pub const DEFAULT_DB_HOST: &str = "localhost";

/// Config and state files, under the user config dir
pub const APP_DIR_NAME: &str = "flashbackup";
pub const CONFIG_FILE: &str = "config.toml";
pub const STATE_FILE: &str = "state.toml";
pub const RELEASE_CACHE_FILE: &str = "release_check.json";

/// Release feed
pub const GITHUB_OWNER: &str = "samuelaguilera";
pub const GITHUB_REPOSITORY: &str = "flashbackup";
pub const RELEASE_CACHE_SECS: u64 = 3_600;
