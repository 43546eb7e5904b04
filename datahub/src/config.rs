//! Client configuration.
//!
//! Configuration can be built in code (every struct implements `Default`) or
//! loaded from a YAML file with environment variable overrides:
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - variables prefixed with `DATAHUB_` override YAML values
//!
//! Nested values use double underscores, e.g. `DATAHUB_QUEUE__MAX_PENDING=500`.
//!
//! ```yaml
//! url: hub.example.com
//! encryption_password: s3cret
//! request_timeout: 30s
//! queue:
//!   enabled: true
//!   timer_interval: 10s
//!   max_pending: 1000
//! ```

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{DatahubError, Result};

/// Main client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatahubConfig {
    /// Base URL of the hub. A missing scheme gets `http://`.
    pub url: String,
    /// Enables the per-item encrypt/decrypt path when set
    pub encryption_password: Option<String>,
    /// Per-request timeout handed to the transport (no timeout when unset)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    /// Extra headers sent with every request
    pub headers: HashMap<String, String>,
    /// Write queue settings
    pub queue: QueueConfig,
}

impl Default for DatahubConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            encryption_password: None,
            request_timeout: None,
            headers: HashMap::new(),
            queue: QueueConfig::default(),
        }
    }
}

/// Batching queue settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Gate on whether timer ticks and threshold triggers actually flush
    pub enabled: bool,
    /// Period of the flush timer
    #[serde(with = "humantime_serde")]
    pub timer_interval: Duration,
    /// Pending item count that forces an immediate flush
    pub max_pending: usize,
    /// Maximum channel sends in flight at once
    pub max_concurrent_sends: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timer_interval: Duration::from_millis(10_000),
            max_pending: 1000,
            max_concurrent_sends: 10,
        }
    }
}

impl DatahubConfig {
    /// Config pointing at `url` with every other setting defaulted.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load from a YAML file plus `DATAHUB_` environment overrides, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Self::figment(path)
            .extract()
            .map_err(|e| DatahubError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Yaml::file(path.as_ref()))
            // DATAHUB_CONFIG names the file, DATAHUB_ENV the deployment environment
            .merge(Env::prefixed("DATAHUB_").ignore(&["config", "env"]).split("__"))
    }

    /// Check required fields and ranges.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(DatahubError::Config("Missing datahub URL".to_string()));
        }
        if self.queue.max_pending == 0 {
            return Err(DatahubError::Config(
                "queue.max_pending must be at least 1".to_string(),
            ));
        }
        if self.queue.max_concurrent_sends == 0 {
            return Err(DatahubError::Config(
                "queue.max_concurrent_sends must be at least 1".to_string(),
            ));
        }
        if self.queue.timer_interval.is_zero() {
            return Err(DatahubError::Config(
                "queue.timer_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The base URL as requests will use it.
    pub fn base_url(&self) -> String {
        sanitize_url(&self.url)
    }
}

/// Lowercase the URL, add `http://` when no scheme is given and drop any trailing slash.
pub fn sanitize_url(url: &str) -> String {
    let url = url.trim().to_lowercase();
    let url = if url.starts_with("http://") || url.starts_with("https://") {
        url
    } else {
        format!("http://{}", url)
    };
    url.trim_end_matches('/').to_string()
}

/// A host that is either fixed or chosen per deployment environment.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HostConfig {
    Single(String),
    PerEnvironment(HashMap<String, String>),
}

impl HostConfig {
    pub fn resolve(&self, environment: &str) -> Option<&str> {
        match self {
            HostConfig::Single(host) => Some(host.as_str()),
            HostConfig::PerEnvironment(hosts) => hosts.get(environment).map(String::as_str),
        }
    }
}

impl From<&str> for HostConfig {
    fn from(host: &str) -> Self {
        HostConfig::Single(host.to_string())
    }
}

/// `DATAHUB_ENV`, or "development" when unset.
pub fn default_environment() -> String {
    std::env::var("DATAHUB_ENV").unwrap_or_else(|_| "development".to_string())
}

/// Settings for [`crate::watcher::HubWatcher`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WatcherConfig {
    pub hub_host: HostConfig,
    /// Where the hub should deliver callbacks (this app)
    pub app_host: HostConfig,
    /// `parallelCalls` for the group callbacks created by the watcher
    #[serde(default)]
    pub hub_parallel_calls: Option<u32>,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Address substituted for `localhost` in callback URLs. Detected when unset.
    #[serde(default)]
    pub callback_ip: Option<String>,
}

impl WatcherConfig {
    pub fn new(hub_host: impl Into<HostConfig>, app_host: impl Into<HostConfig>) -> Self {
        Self {
            hub_host: hub_host.into(),
            app_host: app_host.into(),
            hub_parallel_calls: None,
            environment: default_environment(),
            callback_ip: None,
        }
    }
}

/// Settings for [`crate::forwarder::HubForwarder`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ForwarderConfig {
    pub hub_host: HostConfig,
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl ForwarderConfig {
    pub fn new(hub_host: impl Into<HostConfig>) -> Self {
        Self {
            hub_host: hub_host.into(),
            environment: default_environment(),
        }
    }
}
