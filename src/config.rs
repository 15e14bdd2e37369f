//! Configuration management for the Google Analytics MCP Server.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_MANAGEMENT_URL: &str = "https://www.googleapis.com/analytics/v3/management";
const DEFAULT_REPORTING_URL: &str = "https://analyticsreporting.googleapis.com/v4";
const DEFAULT_METADATA_URL: &str = "https://www.googleapis.com/analytics/v3/metadata/ga/columns";
const DEFAULT_REALTIME_URL: &str = "https://www.googleapis.com/analytics/v3/data/realtime";
const DEFAULT_ADMIN_URL: &str = "https://analyticsadmin.googleapis.com/v1beta";
const DEFAULT_DATA_URL: &str = "https://analyticsdata.googleapis.com/v1beta";

/// Analytics API generation served by this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// Universal Analytics: Management API v3 + Reporting API v4.
    V3,
    /// GA4: Admin API + Data API.
    #[default]
    V4,
}

/// Retry policy for the profile fan-out.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl RetryConfig {
    /// Delay between profile-listing attempts.
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// API generation ("v3" or "v4")
    #[serde(default)]
    pub version: ApiVersion,

    /// Static bearer token. When set, OAuth2 credentials are not used.
    pub access_token: Option<String>,

    /// OAuth2 client ID
    pub client_id: Option<String>,

    /// OAuth2 client secret
    pub client_secret: Option<String>,

    /// OAuth2 refresh token with the analytics.readonly scope
    pub refresh_token: Option<String>,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Buffer before token expiration to refresh (seconds)
    #[serde(default = "default_token_buffer")]
    pub token_refresh_buffer_seconds: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Upper bound on pages stitched for a single listing or report
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_management_url")]
    pub management_base_url: String,

    #[serde(default = "default_reporting_url")]
    pub reporting_base_url: String,

    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,

    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,

    #[serde(default = "default_admin_url")]
    pub admin_base_url: String,

    #[serde(default = "default_data_url")]
    pub data_base_url: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_token_buffer() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_delay() -> u64 {
    500
}

fn default_max_pages() -> usize {
    1000
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_management_url() -> String {
    DEFAULT_MANAGEMENT_URL.to_string()
}

fn default_reporting_url() -> String {
    DEFAULT_REPORTING_URL.to_string()
}

fn default_metadata_url() -> String {
    DEFAULT_METADATA_URL.to_string()
}

fn default_realtime_url() -> String {
    DEFAULT_REALTIME_URL.to_string()
}

fn default_admin_url() -> String {
    DEFAULT_ADMIN_URL.to_string()
}

fn default_data_url() -> String {
    DEFAULT_DATA_URL.to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.uses_static_token() {
            require("client_id", &self.client_id)?;
            require("client_secret", &self.client_secret)?;
            require("refresh_token", &self.refresh_token)?;
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::Invalid(
                "max_pages must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Whether a static bearer token replaces the OAuth2 refresh flow.
    pub fn uses_static_token(&self) -> bool {
        matches!(&self.access_token, Some(token) if !token.is_empty())
    }

    /// Get timeout as Duration.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    /// Get token refresh buffer as chrono Duration.
    pub fn token_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_refresh_buffer_seconds as i64)
    }

}

fn require(field: &str, value: &Option<String>) -> Result<(), ConfigError> {
    match value {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(ConfigError::MissingField(format!(
            "{} (required unless access_token is set)",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_with_static_token() {
        let config = Config::from_json(r#"{"access_token": "ya29.test"}"#).unwrap();

        assert_eq!(config.version, ApiVersion::V4);
        assert!(config.uses_static_token());
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.delay(), std::time::Duration::from_millis(500));
        assert_eq!(config.max_pages, 1000);
        assert_eq!(config.token_url, "https://oauth2.googleapis.com/token");
        assert_eq!(
            config.data_base_url,
            "https://analyticsdata.googleapis.com/v1beta"
        );
    }

    #[test]
    fn test_oauth2_requires_all_credentials() {
        let err = Config::from_json(r#"{"version": "v3", "client_id": "id", "client_secret": "secret"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("refresh_token"));

        let config = Config::from_json(
            r#"{"version": "v3", "client_id": "id", "client_secret": "secret", "refresh_token": "1//r"}"#,
        )
        .unwrap();
        assert_eq!(config.version, ApiVersion::V3);
        assert!(!config.uses_static_token());
    }

    #[test]
    fn test_empty_access_token_falls_back_to_oauth2() {
        let err = Config::from_json(r#"{"access_token": ""}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn test_rejects_zero_retry_attempts() {
        let err = Config::from_json(r#"{"access_token": "t", "retry": {"max_attempts": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let err = Config::from_json(r#"{"access_token": "t", "version": "v5"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
