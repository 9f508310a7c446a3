//! Runtime configuration.
//!
//! Sources, later ones winning: built-in defaults, a TOML file (explicit
//! path or `config.toml` in the platform config directory), then
//! `BLACKLINE_*` environment variables.
//!
//! ```toml
//! [remote]
//! url = "https://xxxx.supabase.co"
//! api_key = "..."
//! timeout_secs = 30
//!
//! [sync]
//! poll_interval_secs = 15
//! live_collections = ["conversations", "messages"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::Collection;

pub const ENV_URL: &str = "BLACKLINE_SUPABASE_URL";
pub const ENV_KEY: &str = "BLACKLINE_SUPABASE_KEY";
pub const ENV_POLL_INTERVAL: &str = "BLACKLINE_POLL_INTERVAL_SECS";

// ── Sections ─────────────────────────────────────────────────────

/// `[remote]`: where the backend lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Project URL (e.g. https://xxxx.supabase.co).
    pub url: String,
    /// Project API key, sent as `apikey` and bearer token.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// `[sync]`: channel tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub poll_interval_secs: u64,
    /// Collections with a push subscription.
    pub live_collections: Vec<Collection>,
    /// Collections the polling backstop refreshes.
    pub poll_collections: Vec<Collection>,
    /// Wait before resubscribing after a feed drops.
    pub resubscribe_backoff_secs: u64,
    /// Newest analytics events kept in memory.
    pub analytics_window: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let volatile = vec![Collection::Conversations, Collection::Messages];
        Self {
            poll_interval_secs: 15,
            live_collections: volatile.clone(),
            poll_collections: volatile,
            resubscribe_backoff_secs: 5,
            analytics_window: 200,
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn resubscribe_backoff(&self) -> Duration {
        Duration::from_secs(self.resubscribe_backoff_secs)
    }
}

// ── SyncConfig ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// `config.toml` in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "metroblackline", "blackline-sync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow::anyhow!("Failed to parse config: {e}"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    /// Environment overrides are applied and the result validated.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply `BLACKLINE_*` overrides from `lookup` (the environment in
    /// production, a map in tests).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(url) = lookup(ENV_URL).filter(|v| !v.trim().is_empty()) {
            self.remote.url = url.trim().to_string();
        }
        if let Some(key) = lookup(ENV_KEY).filter(|v| !v.trim().is_empty()) {
            self.remote.api_key = key.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL) {
            self.sync.poll_interval_secs = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {ENV_POLL_INTERVAL}={raw}: {e}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.remote.url.trim().is_empty() {
            anyhow::bail!("remote.url is not set (config file or {ENV_URL})");
        }
        if !self.remote.url.starts_with("http://") && !self.remote.url.starts_with("https://") {
            anyhow::bail!("remote.url must be an http(s) URL: {}", self.remote.url);
        }
        if self.remote.timeout_secs == 0 {
            anyhow::bail!("remote.timeout_secs must be greater than zero");
        }
        if self.sync.poll_interval_secs == 0 {
            anyhow::bail!("sync.poll_interval_secs must be greater than zero");
        }
        if self.sync.analytics_window == 0 {
            anyhow::bail!("sync.analytics_window must be greater than zero");
        }
        Ok(())
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.remote.api_key.is_empty() {
            copy.remote.api_key = "***".into();
        }
        copy
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).map_err(|e| anyhow::anyhow!("Failed to render config: {e}"))
    }
}

// ── Tests ────────────────────────────────────────────────────────
