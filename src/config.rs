//! Client configuration.
//!
//! All durations are expressed in seconds as floats so config files stay
//! readable (`timeout_secs = 2.5`). Configuration is validated once, when a
//! client is built; invalid values never reach a running request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

pub use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
pub use crate::rate_limiter::RateLimitConfig;
pub use crate::retry::RetryConfig;
pub use crate::robots::{RobotsConfig, RobotsEnforcement, UnknownPolicy};
use crate::transport::Timeouts;

/// Environment variable naming a config file for the CLI.
pub const CONFIG_PATH_ENV: &str = "LADON_NET_CONFIG";

/// Convert float seconds to a `Duration`, clamping invalid values.
pub(crate) fn duration_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Request timeouts.
///
/// `connect_timeout_secs` and `read_timeout_secs` are set together or not
/// at all; `timeout_secs` bounds the whole attempt including the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub timeout_secs: Option<f64>,
    pub connect_timeout_secs: Option<f64>,
    pub read_timeout_secs: Option<f64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(30.0),
            connect_timeout_secs: None,
            read_timeout_secs: None,
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;

        if let Some(total) = self.timeout_secs {
            if !positive(total) {
                return Err(ConfigError::invalid(
                    "timeouts.timeout_secs",
                    "must be greater than 0",
                ));
            }
        }
        match (self.connect_timeout_secs, self.read_timeout_secs) {
            (None, None) => Ok(()),
            (Some(connect), Some(read)) => {
                if !positive(connect) {
                    return Err(ConfigError::invalid(
                        "timeouts.connect_timeout_secs",
                        "must be greater than 0",
                    ));
                }
                if !positive(read) {
                    return Err(ConfigError::invalid(
                        "timeouts.read_timeout_secs",
                        "must be greater than 0",
                    ));
                }
                Ok(())
            }
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::invalid(
                "timeouts.connect_timeout_secs",
                "connect and read timeouts must be set together",
            )),
        }
    }

    pub fn total(&self) -> Option<Duration> {
        self.timeout_secs.map(duration_from_secs)
    }

    pub fn connect(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(duration_from_secs)
    }

    pub fn read(&self) -> Option<Duration> {
        self.read_timeout_secs.map(duration_from_secs)
    }

    /// Timeouts for one request. Values set in `overrides` win.
    pub fn resolve(&self, overrides: &Timeouts) -> Timeouts {
        Timeouts {
            connect: overrides.connect.or_else(|| self.connect()),
            read: overrides.read.or_else(|| self.read()),
            total: overrides.total.or_else(|| self.total()),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// User-Agent sent with every request. `None` uses the crate default.
    pub user_agent: Option<String>,
    /// Headers added to every request unless the request sets them.
    pub default_headers: BTreeMap<String, String>,
    /// Proxy URL for all requests (`http://`, `https://` or `socks5://`).
    pub proxy: Option<String>,
    pub verify_tls: bool,
    /// Maximum response body size in bytes.
    pub max_download_size: Option<u64>,
    /// Allowed response content types; empty allows any. `type/*` matches
    /// a whole family.
    pub allowed_content_types: Vec<String>,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub robots: RobotsConfig,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            default_headers: BTreeMap::new(),
            proxy: None,
            verify_tls: true,
            max_download_size: None,
            allowed_content_types: Vec::new(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            robots: RobotsConfig::default(),
        }
    }
}

impl HttpClientConfig {
    /// Check every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(user_agent) = &self.user_agent {
            if user_agent.trim().is_empty() || HeaderValue::from_str(user_agent).is_err() {
                return Err(ConfigError::invalid(
                    "user_agent",
                    "must be a non-empty header value",
                ));
            }
        }
        for (name, value) in &self.default_headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ConfigError::invalid(
                    "default_headers",
                    format!("invalid header name {:?}", name),
                ));
            }
            if HeaderValue::from_str(value).is_err() {
                return Err(ConfigError::invalid(
                    "default_headers",
                    format!("invalid value for header {:?}", name),
                ));
            }
        }
        if let Some(proxy) = &self.proxy {
            url::Url::parse(proxy)
                .map_err(|e| ConfigError::invalid("proxy", format!("invalid URL: {}", e)))?;
        }
        if self.max_download_size == Some(0) {
            return Err(ConfigError::invalid(
                "max_download_size",
                "must be greater than 0",
            ));
        }
        if let Some(bad) = self
            .allowed_content_types
            .iter()
            .find(|ct| !ct.contains('/'))
        {
            return Err(ConfigError::invalid(
                "allowed_content_types",
                format!("{:?} is not a media type", bad),
            ));
        }

        self.timeouts.validate()?;
        self.retry.validate()?;
        self.rate_limit.validate()?;
        self.circuit_breaker.validate()?;
        self.robots.validate()?;
        Ok(())
    }

    /// Parse TOML configuration.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a file.
    /// Supports TOML, YAML and JSON based on file extension.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?,
            _ => Self::from_toml_str(&contents)?,
        };
        Ok(config)
    }

    /// Config file named by [`CONFIG_PATH_ENV`], if set.
    pub fn path_from_env() -> Option<PathBuf> {
        std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from)
    }
}
