//! Monitor configuration: built-in defaults, an optional TOML file, then CLI overrides.

use crate::model::JobKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5002/api";
const APP_DIR: &str = "bid-job-monitor";

/// Paths of one job kind, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEndpoints {
    pub start: String,
    pub status: String,
}

impl JobEndpoints {
    pub fn defaults_for(kind: JobKind) -> Self {
        let (start, status) = kind.default_paths();
        Self {
            start: start.to_string(),
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub notification_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub sync_on_start: bool,
    pub endpoints: BTreeMap<JobKind, JobEndpoints>,
    /// Collections re-fetched after a job finishes.
    pub collections: Vec<String>,
    pub user_agent: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_millis(2000),
            settle_delay: Duration::from_millis(2000),
            notification_ttl: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            sync_on_start: true,
            endpoints: JobKind::ALL
                .iter()
                .map(|&k| (k, JobEndpoints::defaults_for(k)))
                .collect(),
            collections: ["bids", "companies", "matches", "matches/by-company"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            user_agent: format!("bid-job-monitor/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl MonitorConfig {
    pub fn endpoints(&self, kind: JobKind) -> JobEndpoints {
        self.endpoints
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| JobEndpoints::defaults_for(kind))
    }

    /// Join a relative path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn apply(&mut self, file: FileConfig) {
        if let Some(v) = file.base_url {
            self.base_url = v;
        }
        if let Some(v) = file.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = file.settle_delay {
            self.settle_delay = v;
        }
        if let Some(v) = file.notification_ttl {
            self.notification_ttl = v;
        }
        if let Some(v) = file.request_timeout {
            self.request_timeout = v;
        }
        if let Some(v) = file.sync_on_start {
            self.sync_on_start = v;
        }
        if let Some(v) = file.collections {
            self.collections = v;
        }
        for (kind, ep) in file.endpoints {
            let entry = self
                .endpoints
                .entry(kind)
                .or_insert_with(|| JobEndpoints::defaults_for(kind));
            if let Some(start) = ep.start {
                entry.start = start;
            }
            if let Some(status) = ep.status {
                entry.status = status;
            }
        }
    }
}

/// On-disk shape: every key optional, layered over the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    base_url: Option<String>,
    #[serde(default, with = "humantime_serde")]
    poll_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    settle_delay: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    notification_ttl: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    request_timeout: Option<Duration>,
    sync_on_start: Option<bool>,
    collections: Option<Vec<String>>,
    #[serde(default)]
    endpoints: BTreeMap<JobKind, FileEndpoints>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileEndpoints {
    start: Option<String>,
    status: Option<String>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(APP_DIR))
}

pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

/// Load defaults overlaid with `path`, or with the default config file if it exists.
pub fn load(path: Option<&Path>) -> Result<MonitorConfig> {
    let mut cfg = MonitorConfig::default();
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };
    if let Some(p) = path {
        let text = std::fs::read_to_string(&p)
            .with_context(|| format!("read config {}", p.display()))?;
        let file: FileConfig =
            toml::from_str(&text).with_context(|| format!("parse config {}", p.display()))?;
        tracing::debug!(path = %p.display(), "loaded config file");
        cfg.apply(file);
    }
    Ok(cfg)
}
