/// Release checks against the GitHub releases feed
///
/// The feed is queried at most once an hour; the last answer (including "no
/// data" after a failed request) is cached on disk so repeated checks don't
/// run into the API rate limit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::utils::{APP_DIR_NAME, GITHUB_OWNER, GITHUB_REPOSITORY, RELEASE_CACHE_FILE, RELEASE_CACHE_SECS};

const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information for display in the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub current_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
    pub release_url: Option<String>,
    pub release_notes: Option<String>,
    pub published_at: Option<String>,
    pub package_url: Option<String>,
}

/// One entry of the GitHub releases API response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub zipball_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

/// Where release metadata comes from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Newest release, or `None` when the feed has nothing usable
    async fn latest_release(&self) -> Result<Option<Release>>;
}

pub struct GitHubReleases {
    client: reqwest::Client,
    url: String,
}

impl GitHubReleases {
    pub fn new(owner: &str, repository: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("flashbackup/{}", CURRENT_VERSION))
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url: format!("https://api.github.com/repos/{}/{}/releases", owner, repository),
        })
    }

    pub fn flashbackup() -> Result<Self> {
        Self::new(GITHUB_OWNER, GITHUB_REPOSITORY)
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleases {
    async fn latest_release(&self) -> Result<Option<Release>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch releases from GitHub")?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "release feed unavailable");
            return Ok(None);
        }

        let releases: Vec<Release> = response
            .json()
            .await
            .context("Failed to parse GitHub releases response")?;

        Ok(releases.into_iter().next())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedRelease {
    fetched_at: DateTime<Utc>,
    release: Option<Release>,
}

/// On-disk cache of the last feed answer
pub struct ReleaseCache {
    path: PathBuf,
    ttl: Duration,
}

impl ReleaseCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self { path: path.into(), ttl }
    }

    /// Cache in the user cache dir with the standard one-hour lifetime
    pub fn default_location() -> Result<Self> {
        let base = dirs::cache_dir().context("Failed to get cache directory")?;
        Ok(Self::new(
            base.join(APP_DIR_NAME).join(RELEASE_CACHE_FILE),
            Duration::from_secs(RELEASE_CACHE_SECS),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached answer if still fresh at `now`. The outer `None` means "ask the feed".
    fn load(&self, now: DateTime<Utc>) -> Option<Option<Release>> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let cached: CachedRelease = serde_json::from_str(&content).ok()?;

        let age = now.signed_duration_since(cached.fetched_at).to_std().ok()?;
        (age < self.ttl).then_some(cached.release)
    }

    fn store(&self, now: DateTime<Utc>, release: Option<&Release>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let cached = CachedRelease {
            fetched_at: now,
            release: release.cloned(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&cached)?)
            .context("Failed to write release cache")?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Strip the leading `v` from tags like `v1.2.0`
pub fn normalize_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}

/// Parse a dotted version, filling in missing components: `1.2` reads as `1.2.0`
pub fn parse_version(value: &str) -> Option<Version> {
    let value = normalize_tag(value);
    if let Ok(version) = Version::parse(value) {
        return Some(version);
    }

    let (core, suffix) = match value.find(['-', '+']) {
        Some(idx) => value.split_at(idx),
        None => (value, ""),
    };

    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.parse::<u64>().is_err()) {
        return None;
    }
    parts.resize(3, "0");

    Version::parse(&format!("{}{}", parts.join("."), suffix)).ok()
}

/// Whether `remote` is a newer version than `local`; unparseable versions never are
pub fn is_newer(remote: &str, local: &str) -> bool {
    match (parse_version(remote), parse_version(local)) {
        (Some(remote), Some(local)) => remote > local,
        _ => false,
    }
}

/// Get current version info without checking GitHub
pub fn get_current_version() -> VersionInfo {
    VersionInfo {
        current_version: CURRENT_VERSION.to_string(),
        latest_version: None,
        update_available: false,
        release_url: Some(format!("https://github.com/{}/{}/releases", GITHUB_OWNER, GITHUB_REPOSITORY)),
        release_notes: None,
        published_at: None,
        package_url: None,
    }
}

pub struct UpdateChecker<S> {
    source: S,
    cache: ReleaseCache,
    current_version: String,
}

impl<S: ReleaseSource> UpdateChecker<S> {
    pub fn new(source: S, cache: ReleaseCache) -> Self {
        Self::with_current_version(source, cache, CURRENT_VERSION)
    }

    pub fn with_current_version(source: S, cache: ReleaseCache, current_version: &str) -> Self {
        Self {
            source,
            cache,
            current_version: current_version.to_string(),
        }
    }

    pub fn cache(&self) -> &ReleaseCache {
        &self.cache
    }

    /// Latest release, from the cache when it is fresh
    pub async fn latest_release(&self, now: DateTime<Utc>) -> Option<Release> {
        if let Some(cached) = self.cache.load(now) {
            return cached;
        }

        let release = match self.source.latest_release().await {
            Ok(release) => release,
            Err(e) => {
                tracing::warn!(error = %e, "release check failed");
                None
            }
        };

        if let Err(e) = self.cache.store(now, release.as_ref()) {
            tracing::warn!(error = %e, "could not cache release check");
        }
        release
    }

    pub async fn check(&self, now: DateTime<Utc>) -> VersionInfo {
        let mut info = get_current_version();
        info.current_version = self.current_version.clone();

        let Some(release) = self.latest_release(now).await else {
            return info;
        };

        let latest = normalize_tag(&release.tag_name).to_string();
        info.update_available = is_newer(&latest, &self.current_version);
        info.latest_version = Some(latest);
        if release.html_url.is_some() {
            info.release_url = release.html_url;
        }
        info.release_notes = release.body;
        info.published_at = release.published_at;
        info.package_url = release.zipball_url;
        info
    }
}

/// Download the release package named in `info` to `destination`
pub async fn download_package(info: &VersionInfo, destination: &Path) -> Result<u64> {
    let url = info
        .package_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("No package URL found for latest release"))?;

    let client = reqwest::Client::builder()
        .user_agent(format!("flashbackup/{}", CURRENT_VERSION))
        .timeout(Duration::from_secs(300))
        .build()?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to download release")?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download release: HTTP {}", response.status());
    }

    let bytes = response.bytes().await.context("Failed to read release bytes")?;
    std::fs::write(destination, &bytes).context("Failed to write downloaded file")?;

    Ok(bytes.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn release(tag: &str) -> Release {
        Release {
            tag_name: tag.to_string(),
            body: Some("Fixes".to_string()),
            html_url: Some("https://github.com/samuelaguilera/flashbackup/releases/tag/v1.1".to_string()),
            zipball_url: Some("https://api.github.com/repos/samuelaguilera/flashbackup/zipball/v1.1".to_string()),
            published_at: None,
        }
    }

    fn cache(dir: &TempDir) -> ReleaseCache {
        ReleaseCache::new(dir.path().join("release_check.json"), Duration::from_secs(3600))
    }

    #[test]
    fn test_current_version_parsing() {
        assert!(Version::parse(CURRENT_VERSION).is_ok(), "crate version should be valid semver");
    }

    #[test]
    fn test_get_current_version() {
        let info = get_current_version();
        assert_eq!(info.current_version, CURRENT_VERSION);
        assert!(!info.update_available);
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("1.0"), Some(Version::new(1, 0, 0)));
        assert_eq!(parse_version("v2"), Some(Version::new(2, 0, 0)));
        assert_eq!(parse_version("V1.2.3"), Some(Version::new(1, 2, 3)));
        assert!(parse_version("1.2-beta.1").unwrap().pre.as_str() == "beta.1");
        assert!(parse_version("latest").is_none());
        assert!(parse_version("1.2.3.4").is_none());
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("v1.1", "1.0.0"));
        assert!(!is_newer("1.0", "1.0.0"));
        assert!(!is_newer("0.9.9", "1.0"));
        assert!(!is_newer("garbage", "1.0"));
    }

    #[tokio::test]
    async fn test_update_available() {
        let dir = TempDir::new().unwrap();
        let mut source = MockReleaseSource::new();
        source
            .expect_latest_release()
            .times(1)
            .returning(|| Ok(Some(release("v1.1"))));

        let checker = UpdateChecker::with_current_version(source, cache(&dir), "1.0");
        let info = checker.check(Utc::now()).await;

        assert!(info.update_available);
        assert_eq!(info.latest_version.as_deref(), Some("1.1"));
        assert_eq!(info.release_notes.as_deref(), Some("Fixes"));
        assert!(info.package_url.unwrap().ends_with("zipball/v1.1"));
    }

    #[tokio::test]
    async fn test_same_version_is_not_an_update() {
        let dir = TempDir::new().unwrap();
        let mut source = MockReleaseSource::new();
        source
            .expect_latest_release()
            .returning(|| Ok(Some(release("1.0.0"))));

        let checker = UpdateChecker::with_current_version(source, cache(&dir), "1.0");
        assert!(!checker.check(Utc::now()).await.update_available);
    }

    #[tokio::test]
    async fn test_cache_limits_fetches_to_once_an_hour() {
        let dir = TempDir::new().unwrap();
        let mut source = MockReleaseSource::new();
        source
            .expect_latest_release()
            .times(2)
            .returning(|| Ok(Some(release("v1.1"))));

        let checker = UpdateChecker::with_current_version(source, cache(&dir), "1.0");
        let now = Utc::now();

        checker.check(now).await;
        checker.check(now + chrono::Duration::minutes(59)).await;
        assert!(checker.cache().path().exists());

        let info = checker.check(now + chrono::Duration::minutes(61)).await;
        assert!(info.update_available);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_cached_as_no_data() {
        let dir = TempDir::new().unwrap();
        let mut source = MockReleaseSource::new();
        source
            .expect_latest_release()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("connection refused")));

        let checker = UpdateChecker::with_current_version(source, cache(&dir), "1.0");
        let now = Utc::now();

        let info = checker.check(now).await;
        assert!(info.latest_version.is_none());
        assert!(!info.update_available);

        let again = checker.check(now + chrono::Duration::minutes(5)).await;
        assert!(again.latest_version.is_none());
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let dir = TempDir::new().unwrap();
        let mut source = MockReleaseSource::new();
        source
            .expect_latest_release()
            .times(2)
            .returning(|| Ok(None));

        let checker = UpdateChecker::with_current_version(source, cache(&dir), "1.0");
        let now = Utc::now();

        checker.check(now).await;
        checker.cache().clear().unwrap();
        checker.check(now).await;
        checker.cache().clear().unwrap();
        checker.cache().clear().unwrap();
    }
}
