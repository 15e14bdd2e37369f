//! OAuth2 refresh-token authentication for the Google Analytics APIs.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::AuthError;

/// OAuth2 token response from Google.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Cached token with expiration tracking.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Check if token is expired (with buffer).
    fn is_expired(&self, buffer: Duration) -> bool {
        Utc::now() + buffer >= self.expires_at
    }
}

/// Bearer token provider shared by every API client of an instance.
/// Also supports a static access token from configuration.
#[derive(Clone)]
pub struct TokenProvider {
    config: Config,
    http_client: Client,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl TokenProvider {
    /// Create a new token provider.
    ///
    /// # Errors
    /// Returns `AuthError::HttpClientInit` if the HTTP client cannot be created.
    pub fn new(config: Config) -> Result<Self, AuthError> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AuthError::HttpClientInit(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        if self.config.uses_static_token() {
            return self.config.access_token.clone().ok_or(AuthError::NoToken);
        }

        {
            let cache = self.token_cache.read().await;
            if let Some(ref cached) = *cache {
                if !cached.is_expired(self.config.token_buffer()) {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        self.refresh_token().await
    }

    /// Exchange the configured refresh token for a new access token.
    async fn refresh_token(&self) -> Result<String, AuthError> {
        let client_id = self
            .config
            .client_id
            .as_ref()
            .ok_or_else(|| AuthError::TokenParse("Missing client_id".to_string()))?;
        let client_secret = self
            .config
            .client_secret
            .as_ref()
            .ok_or_else(|| AuthError::TokenParse("Missing client_secret".to_string()))?;
        let refresh_token = self
            .config
            .refresh_token
            .as_ref()
            .ok_or_else(|| AuthError::TokenParse("Missing refresh_token".to_string()))?;

        let credentials = format!("{}:{}", client_id, client_secret);
        let auth_header = format!("Basic {}", BASE64.encode(credentials.as_bytes()));
        let body = format!(
            "grant_type=refresh_token&refresh_token={}",
            urlencoding::encode(refresh_token)
        );

        tracing::debug!(url = %self.config.token_url, "Refreshing access token");

        let response = self
            .http_client
            .post(&self.config.token_url)
            .header("Authorization", &auth_header)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %body, "Token request failed");
            return Err(AuthError::TokenRequestFailed { status, body });
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            AuthError::TokenParse(format!("Failed to parse token response: {}", e))
        })?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        tracing::debug!(expires_at = %expires_at, "Access token acquired");

        let mut cache = self.token_cache.write().await;
        *cache = Some(CachedToken {
            access_token: token_response.access_token.clone(),
            expires_at,
        });

        Ok(token_response.access_token)
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = if self.config.uses_static_token() {
            "static"
        } else {
            "oauth2"
        };
        f.debug_struct("TokenProvider").field("mode", &mode).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_token_expiry_honours_buffer() {
        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: Utc::now() + Duration::seconds(30),
        };
        assert!(!token.is_expired(Duration::seconds(5)));
        assert!(token.is_expired(Duration::seconds(60)));
    }

    #[tokio::test]
    async fn test_static_token_is_returned_without_network() {
        let config = Config::from_json(r#"{"access_token": "ya29.static"}"#).unwrap();
        let provider = TokenProvider::new(config).unwrap();
        assert_eq!(provider.get_token().await.unwrap(), "ya29.static");
    }
}
