//! Configuration management for Ratewindow.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RatewindowError, Result};

/// Main configuration for the Ratewindow service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Derive client addresses from `X-Real-IP` / `X-Forwarded-For`
    #[serde(default = "default_trust_proxy_headers")]
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_proxy_headers: default_trust_proxy_headers(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_trust_proxy_headers() -> bool {
    true
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests admitted per client per window
    #[serde(default = "default_limit")]
    pub limit: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            limit: default_limit(),
        }
    }
}

impl LimiterConfig {
    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_window_secs() -> u64 {
    crate::ratelimit::DEFAULT_WINDOW.as_secs()
}

fn default_limit() -> u64 {
    crate::ratelimit::DEFAULT_LIMIT
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How often expired entries are reclaimed, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl StoreConfig {
    /// Cleanup interval as a duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn default_cleanup_interval() -> u64 {
    60
}

impl ServiceConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RatewindowError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.limit == 0 {
            return Err(RatewindowError::Config(
                "limiter.limit must be at least 1".to_string(),
            ));
        }
        if self.limiter.window_secs == 0 {
            return Err(RatewindowError::Config(
                "limiter.window_secs must be at least 1".to_string(),
            ));
        }
        if self.store.cleanup_interval_secs == 0 {
            return Err(RatewindowError::Config(
                "store.cleanup_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
