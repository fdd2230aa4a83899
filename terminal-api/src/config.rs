//! Server configuration
//!
//! Read from the process environment after `.env.local` has been loaded.

use std::env;
use std::time::Duration;

use terminal_ibkr::{FeedSessionConfig, ReconnectPolicy, DEFAULT_API_BASE, DEFAULT_WS_URL};

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Configuration for the API server
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Base URL of the IBKR bridge REST API
    pub ibkr_api_url: String,
    /// Tick stream endpoint of the IBKR bridge
    pub ibkr_ws_url: String,
    pub server_port: u16,
    pub auto_reconnect: bool,
    /// `0` retries forever
    pub max_reconnect_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ibkr_api_url: DEFAULT_API_BASE.to_string(),
            ibkr_ws_url: DEFAULT_WS_URL.to_string(),
            server_port: DEFAULT_PORT,
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Recognizes:
    /// - IBKR_API_URL
    /// - IBKR_WS_URL
    /// - SERVER_PORT
    /// - FEED_AUTO_RECONNECT (true/false)
    /// - FEED_MAX_RECONNECT_ATTEMPTS
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server_port = match var("SERVER_PORT") {
            Some(port) => port.parse().map_err(|_| ConfigError::Invalid {
                field: "SERVER_PORT",
                value: port,
            })?,
            None => defaults.server_port,
        };

        let auto_reconnect = match var("FEED_AUTO_RECONNECT") {
            Some(flag) => match flag.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        field: "FEED_AUTO_RECONNECT",
                        value: flag,
                    })
                }
            },
            None => defaults.auto_reconnect,
        };

        let max_reconnect_attempts = match var("FEED_MAX_RECONNECT_ATTEMPTS") {
            Some(attempts) => attempts.parse().map_err(|_| ConfigError::Invalid {
                field: "FEED_MAX_RECONNECT_ATTEMPTS",
                value: attempts,
            })?,
            None => defaults.max_reconnect_attempts,
        };

        Ok(Self {
            ibkr_api_url: var("IBKR_API_URL").unwrap_or(defaults.ibkr_api_url),
            ibkr_ws_url: var("IBKR_WS_URL").unwrap_or(defaults.ibkr_ws_url),
            server_port,
            auto_reconnect,
            max_reconnect_attempts,
        })
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        if !self.auto_reconnect {
            return ReconnectPolicy::disabled();
        }
        ReconnectPolicy {
            max_attempts: (self.max_reconnect_attempts > 0).then_some(self.max_reconnect_attempts),
            ..ReconnectPolicy::default()
        }
    }

    pub fn feed_config(&self) -> FeedSessionConfig {
        FeedSessionConfig::new(self.ibkr_ws_url.clone()).with_reconnect(self.reconnect_policy())
    }

    /// Upper bound on how long the feed keeps retrying before it parks
    pub fn max_reconnect_window(&self) -> Option<Duration> {
        let policy = self.reconnect_policy();
        let attempts = policy.max_attempts?;
        Some((1..=attempts).filter_map(|n| policy.backoff(n)).sum())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },
}
