//! Configuration types and shared defaults.
//!
//! Tunables live here so the cloud and device crates agree on timeouts
//! and intervals without each re-declaring its own constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default values shared across the workspace.
pub mod defaults {
    /// REST call timeout in seconds.
    pub const REST_TIMEOUT_SECS: u64 = 10;
    /// Cloud directory poll interval in seconds.
    pub const POLL_INTERVAL_SECS: u64 = 120;
    /// Window inside which a push update outranks a cloud value for the
    /// same wire key.
    pub const FRESHNESS_WINDOW_SECS: u64 = 90;
    /// Command response correlation timeout in seconds.
    pub const COMMAND_TIMEOUT_SECS: u64 = 10;
    /// Maximum retry attempts for transient REST failures.
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;
    /// Base delay for exponential backoff in milliseconds.
    pub const RETRY_BASE_DELAY_MS: u64 = 500;
    /// Topic namespace used by the vendor broker.
    pub const TOPIC_NAMESPACE: &str = "robo_home";
}

/// Environment variable names recognized by embedding applications.
pub mod env_vars {
    pub const USERNAME: &str = "ROBOCLEAN_USERNAME";
    pub const PASSWORD: &str = "ROBOCLEAN_PASSWORD";
    pub const LOCALE: &str = "ROBOCLEAN_LOCALE";
}

/// Vendor account credentials and client identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account email
    pub username: String,
    /// Account password
    pub password: String,
    /// Stable per-installation client identifier sent with every REST
    /// call; generated once and reused so the backend sees one client.
    pub client_udid: String,
    /// BCP-47 locale, e.g. "en-US"
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "en-US".to_string()
}

impl AccountConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            client_udid: uuid::Uuid::new_v4().to_string(),
            locale: default_locale(),
        }
    }

    /// Override the generated client identifier.
    pub fn with_client_udid(mut self, udid: impl Into<String>) -> Self {
        self.client_udid = udid.into();
        self
    }

    /// Language part of the locale ("en" for "en-US").
    pub fn language(&self) -> &str {
        self.locale.split('-').next().unwrap_or("en")
    }

    /// Country part of the locale ("US" for "en-US").
    pub fn country(&self) -> &str {
        match self.locale.split_once('-') {
            Some((_, country)) => country,
            None => "US",
        }
    }
}

/// Tunables for the device service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Cloud directory poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Freshness window for push-vs-cloud conflict resolution, seconds
    #[serde(default = "default_freshness_window")]
    pub freshness_window: u64,
    /// Command correlation timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    /// Broker topic namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_poll_interval() -> u64 {
    defaults::POLL_INTERVAL_SECS
}
fn default_freshness_window() -> u64 {
    defaults::FRESHNESS_WINDOW_SECS
}
fn default_command_timeout() -> u64 {
    defaults::COMMAND_TIMEOUT_SECS
}
fn default_namespace() -> String {
    defaults::TOPIC_NAMESPACE.to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            freshness_window: default_freshness_window(),
            command_timeout: default_command_timeout(),
            namespace: default_namespace(),
        }
    }
}

impl ServiceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_parts() {
        let config = AccountConfig::new("user@example.com", "secret");
        assert_eq!(config.language(), "en");
        assert_eq!(config.country(), "US");

        let config = AccountConfig {
            locale: "de-DE".into(),
            ..config
        };
        assert_eq!(config.language(), "de");
        assert_eq!(config.country(), "DE");

        let config = AccountConfig {
            locale: "fr".into(),
            ..config
        };
        assert_eq!(config.language(), "fr");
        assert_eq!(config.country(), "US");
    }

    #[test]
    fn test_service_config_defaults() {
        let config: ServiceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.poll_interval, defaults::POLL_INTERVAL_SECS);
        assert_eq!(config.namespace, defaults::TOPIC_NAMESPACE);
    }
}
