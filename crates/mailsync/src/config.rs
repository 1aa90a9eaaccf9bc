//! Runtime settings for the sync worker
//!
//! Settings are resolved in this order (later wins):
//! 1. Built-in defaults
//! 2. JSON file (~/.config/echomail/settings.json)
//! 3. Environment variables (`ECHOMAIL_*`)

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::queue::JobOptions;
use crate::sync::SyncOptions;

/// Settings filename in the EchoMail config directory
const SETTINGS_FILE: &str = "settings.json";

/// Database filename in the EchoMail data directory
const DB_FILE: &str = "echomail.db";

/// One day
const MAX_JOB_BACKOFF_MS: u64 = 24 * 60 * 60 * 1000;

/// One year
const MAX_JOB_RETENTION_HOURS: u64 = 365 * 24;

/// Tunables for fetching, pacing, persistence, and the job queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Graph API root, e.g. https://graph.microsoft.com/v1.0
    pub graph_base_url: String,
    /// Messages requested per page (`$top`)
    pub page_size: usize,
    /// Soft cap on messages considered per job attempt
    pub max_messages: usize,
    /// Fixed pause between pages
    pub page_delay_ms: u64,
    /// Whole-request timeout for Graph calls
    pub http_timeout_secs: u64,
    /// Largest message page body read from Graph
    pub max_page_bytes: u64,
    /// SQLite database path; defaults to the data directory
    pub db_path: Option<PathBuf>,
    /// Total attempts per job, including the first
    pub job_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub job_backoff_ms: u64,
    /// How long finished job records are kept
    pub job_retention_hours: u64,
    /// Enqueue a resync when an existing user re-authorizes
    pub resync_on_reauthorization: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            graph_base_url: crate::graph::GraphClient::DEFAULT_BASE_URL.to_string(),
            page_size: 25,
            max_messages: 100,
            page_delay_ms: 1000,
            http_timeout_secs: 30,
            max_page_bytes: crate::graph::GraphClient::DEFAULT_MAX_PAGE_BYTES,
            db_path: None,
            job_attempts: 3,
            job_backoff_ms: 1000,
            job_retention_hours: 48,
            resync_on_reauthorization: true,
        }
    }
}

impl SyncSettings {
    /// Load settings from the config file (if present) and the environment
    pub fn load() -> Result<Self> {
        let settings = if config::config_exists(SETTINGS_FILE) {
            config::load_json(SETTINGS_FILE)?
        } else {
            Self::default()
        };

        settings.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Load settings from a specific JSON file, then apply the environment
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings: Self = config::load_json_file(path)?;
        settings.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Parse settings from a JSON string; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json).context("Failed to parse settings JSON")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `ECHOMAIL_*` overrides using `lookup` to read variables
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ECHOMAIL_GRAPH_BASE_URL") {
            self.graph_base_url = url;
        }
        if let Some(path) = lookup("ECHOMAIL_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(v) = lookup("ECHOMAIL_PAGE_SIZE") {
            self.page_size = parse_env("ECHOMAIL_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("ECHOMAIL_MAX_MESSAGES") {
            self.max_messages = parse_env("ECHOMAIL_MAX_MESSAGES", &v)?;
        }
        if let Some(v) = lookup("ECHOMAIL_PAGE_DELAY_MS") {
            self.page_delay_ms = parse_env("ECHOMAIL_PAGE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("ECHOMAIL_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_env("ECHOMAIL_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("ECHOMAIL_MAX_PAGE_BYTES") {
            self.max_page_bytes = parse_env("ECHOMAIL_MAX_PAGE_BYTES", &v)?;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        // Graph rejects $top above 1000
        if !(1..=1000).contains(&self.page_size) {
            bail!("page_size must be between 1 and 1000, got {}", self.page_size);
        }
        if self.job_attempts == 0 {
            bail!("job_attempts must be at least 1");
        }
        if self.max_page_bytes == 0 {
            bail!("max_page_bytes must be at least 1");
        }
        if self.job_backoff_ms > MAX_JOB_BACKOFF_MS {
            bail!(
                "job_backoff_ms must be at most {}, got {}",
                MAX_JOB_BACKOFF_MS,
                self.job_backoff_ms
            );
        }
        if self.job_retention_hours > MAX_JOB_RETENTION_HOURS {
            bail!(
                "job_retention_hours must be at most {}, got {}",
                MAX_JOB_RETENTION_HOURS,
                self.job_retention_hours
            );
        }
        url::Url::parse(&self.graph_base_url)
            .with_context(|| format!("Invalid graph_base_url: {}", self.graph_base_url))?;
        Ok(())
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Options for [`crate::sync::MailboxSyncJob`]
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_messages: self.max_messages,
            page_delay: self.page_delay(),
        }
    }

    /// Options for [`crate::queue::InMemoryJobQueue`]
    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            attempts: self.job_attempts,
            backoff_base: Duration::from_millis(self.job_backoff_ms),
            retention: Duration::from_secs(self.job_retention_hours.saturating_mul(60 * 60)),
        }
    }

    /// The configured database path, or the default in the data directory
    pub fn resolve_db_path(&self) -> Option<PathBuf> {
        self.db_path
            .clone()
            .or_else(|| config::data_dir().map(|dir| dir.join(DB_FILE)))
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} has an invalid value: {:?}", key, value))
}
