use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{DEFAULT_MAX_PAGES, DEFAULT_THRESHOLD};

/// Environment variable that overrides `remote.share_password`.
pub const SHARE_PASSWORD_ENV: &str = "SWIMSTATS_SHARE_PASSWORD";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    /// Absent for stores that are only queried locally.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// ownCloud/Nextcloud public share reachable over WebDAV.
///
/// Two URL shapes are common:
///
/// - `https://<host>/owncloud/public.php/webdav` with HTTP Basic auth
///   (username = share token, password = share password, often empty);
/// - `https://<host>/owncloud/remote.php/dav/public-files/<token>` where the
///   token is part of the URL and auth is usually unnecessary.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub share_token: String,
    #[serde(default)]
    pub share_password: String,
    #[serde(default = "default_public_share_auth")]
    pub public_share_auth: bool,
    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_public_share_auth() -> bool {
    true
}
fn default_list_timeout_secs() -> u64 {
    60
}
fn default_download_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_threshold")]
    pub threshold: i64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

fn default_threshold() -> i64 {
    DEFAULT_THRESHOLD
}
fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    /// Count per-document transport failures and continue instead of
    /// aborting the run.
    #[serde(default)]
    pub keep_going: bool,
    /// Remote paths (relative to the share root) never downloaded.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Config {
    /// Defaults for commands that only touch the local store.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            remote: None,
            detection: DetectionConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    /// The `[remote]` section, required by commands that talk to the share.
    pub fn remote(&self) -> Result<&RemoteConfig> {
        self.remote
            .as_ref()
            .context("config has no [remote] section; add base_url and share_token")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Some(remote) = config.remote.as_mut() {
        if let Ok(password) = std::env::var(SHARE_PASSWORD_ENV) {
            remote.share_password = password;
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if let Some(remote) = &config.remote {
        let url = reqwest::Url::parse(&remote.base_url)
            .with_context(|| format!("remote.base_url is not a valid URL: {}", remote.base_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("remote.base_url must be http or https, got '{}'", url.scheme());
        }
        if remote.share_token.trim().is_empty() {
            anyhow::bail!("remote.share_token must not be empty");
        }
        if remote.list_timeout_secs == 0 || remote.download_timeout_secs == 0 {
            anyhow::bail!("remote timeouts must be > 0");
        }
    }

    if config.detection.max_pages == 0 {
        anyhow::bail!("detection.max_pages must be >= 1");
    }

    for pattern in &config.sync.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("invalid sync.exclude_globs pattern: {}", pattern))?;
    }

    Ok(())
}
