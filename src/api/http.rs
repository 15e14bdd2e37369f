//! Authenticated JSON transport shared by every Google API client.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::TokenProvider;
use crate::config::Config;
use crate::error::ApiError;

/// Google JSON error envelope: `{"error": {"code", "message", "status"}}`.
#[derive(Debug, Deserialize)]
struct GoogleErrorResponse {
    error: GoogleErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: Vec<GoogleErrorItem>,
}

/// Legacy per-error entries; Management API v3 reports quota errors only here.
#[derive(Debug, Deserialize)]
struct GoogleErrorItem {
    #[serde(default)]
    reason: String,
}

/// HTTP client that attaches a bearer token to every request and decodes
/// Google's JSON success and error bodies.
#[derive(Clone)]
pub struct GoogleHttp {
    http_client: Client,
    tokens: TokenProvider,
}

impl GoogleHttp {
    pub fn new(config: &Config, tokens: TokenProvider) -> Result<Self, ApiError> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::HttpClientInit(e.to_string()))?;

        Ok(Self {
            http_client,
            tokens,
        })
    }

    /// GET `url` with the given query parameters.
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        tracing::debug!(%url, ?params, "GET");

        let token = self.tokens.get_token().await?;
        let response = self
            .http_client
            .get(url)
            .query(params)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;

        self.handle_response(url, response).await
    }

    /// GET a public document that needs no credentials.
    pub async fn get_public<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        tracing::debug!(%url, "GET (public)");

        let response = self
            .http_client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        self.handle_response(url, response).await
    }

    /// POST a JSON body to `url`.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        tracing::debug!(%url, "POST");

        let token = self.tokens.get_token().await?;
        let response = self
            .http_client
            .post(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        self.handle_response(url, response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        url: &str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            tracing::trace!(%url, body = %truncate(&body, 500), "response");
            return serde_json::from_str(&body).map_err(|e| {
                tracing::error!(%url, error = %e, body = %truncate(&body, 200), "failed to decode response");
                ApiError::JsonParse(e)
            });
        }

        tracing::error!(%url, %status, body = %truncate(&body, 500), "request failed");
        Err(parse_error_response(status, &body))
    }
}

fn parse_error_response(status: StatusCode, body: &str) -> ApiError {
    match serde_json::from_str::<GoogleErrorResponse>(body) {
        Ok(envelope) => {
            let detail = envelope.error;
            let reason = if detail.status.is_empty() {
                detail
                    .errors
                    .into_iter()
                    .map(|item| item.reason)
                    .find(|reason| !reason.is_empty())
                    .unwrap_or_default()
            } else {
                detail.status
            };
            ApiError::Google {
                code: if detail.code == 0 {
                    status.as_u16()
                } else {
                    detail.code
                },
                reason,
                message: detail.message,
            }
        }
        Err(_) => ApiError::HttpError {
            status,
            body: body.to_string(),
        },
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

impl std::fmt::Debug for GoogleHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleHttp")
            .field("tokens", &self.tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_error_envelope_is_parsed() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#;
        match parse_error_response(StatusCode::TOO_MANY_REQUESTS, body) {
            ApiError::Google {
                code,
                reason,
                message,
            } => {
                assert_eq!(code, 429);
                assert_eq!(reason, "RESOURCE_EXHAUSTED");
                assert_eq!(message, "Quota exceeded");
            }
            other => panic!("expected Google error, got {:?}", other),
        }
    }

    #[test]
    fn test_v3_rate_limit_reason_is_transient() {
        let body = r#"{"error": {"errors": [{"domain": "usageLimits", "reason": "userRateLimitExceeded", "message": "User Rate Limit Exceeded"}], "code": 403, "message": "User Rate Limit Exceeded"}}"#;
        let err = parse_error_response(StatusCode::FORBIDDEN, body);
        match &err {
            ApiError::Google { code, reason, .. } => {
                assert_eq!(*code, 403);
                assert_eq!(reason, "userRateLimitExceeded");
            }
            other => panic!("expected Google error, got {:?}", other),
        }
        assert!(err.is_transient());
    }

    #[test]
    fn test_v3_permission_reason_is_permanent() {
        let body = r#"{"error": {"errors": [{"domain": "global", "reason": "insufficientPermissions"}], "code": 403, "message": "User does not have any Google Analytics account."}}"#;
        let err = parse_error_response(StatusCode::FORBIDDEN, body);
        assert!(matches!(&err, ApiError::Google { reason, .. } if reason == "insufficientPermissions"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_without_code_takes_http_status() {
        let body = r#"{"error": {"message": "Backend Error"}}"#;
        let err = parse_error_response(StatusCode::SERVICE_UNAVAILABLE, body);
        assert!(matches!(err, ApiError::Google { code: 503, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_non_json_error_keeps_raw_body() {
        let err = parse_error_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        match err {
            ApiError::HttpError { status, body } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert!(body.contains("bad gateway"));
            }
            other => panic!("expected HttpError, got {:?}", other),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
