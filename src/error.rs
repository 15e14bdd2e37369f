//! Unified error types for the Google Analytics MCP Server.

use reqwest::StatusCode;
use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Authentication-related errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Token request failed with status {status}: {body}")]
    TokenRequestFailed { status: StatusCode, body: String },

    #[error("Token parse error: {0}")]
    TokenParse(String),

    #[error("No token available")]
    NoToken,

    #[error("Failed to create HTTP client: {0}")]
    HttpClientInit(String),
}

/// Remote API request/response errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("Google API error [{code}] {reason}: {message}")]
    Google {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Failed to create HTTP client: {0}")]
    HttpClientInit(String),

    #[error("Pagination exceeded {max_pages} pages for {what}")]
    PageLimit { what: String, max_pages: usize },
}

impl ApiError {
    /// Whether a retry of the same call could plausibly succeed.
    ///
    /// Rate limits, timeouts and server-side failures are transient; bad
    /// credentials, malformed ids and decode failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Request(e) => e.is_timeout() || e.is_connect(),
            ApiError::HttpError { status, .. } => status_is_transient(*status),
            ApiError::Google { code, reason, .. } => {
                reason_is_transient(reason)
                    || StatusCode::from_u16(*code)
                        .map(status_is_transient)
                        .unwrap_or(false)
            }
            ApiError::Auth(AuthError::Request(e)) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

// Quota errors arrive as 403 on the Management API.
fn reason_is_transient(reason: &str) -> bool {
    matches!(
        reason,
        "userRateLimitExceeded" | "rateLimitExceeded" | "quotaExceeded" | "RESOURCE_EXHAUSTED"
    )
}

fn status_is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Query validation errors, raised before any remote call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("failed to read query: {0}")]
    Malformed(String),

    #[error("required {0}")]
    MissingField(&'static str),

    #[error("required dimensions or metrics")]
    NoDimensionsOrMetrics,

    #[error("time series query need time dimension")]
    MissingTimeDimension,

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("unknown query mode: {0}")]
    UnknownMode(String),

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),
}

/// A single cell that could not be converted to its column type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("column {column}: expected a timestamp, got {value:?}")]
    InvalidTime { column: String, value: String },

    #[error("column {column}: expected a number, got {value:?}")]
    InvalidNumber { column: String, value: String },
}

/// Hierarchy enumeration errors.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("enumeration incomplete: listing profiles of property {property_id} (account {account_id}) failed after {attempts} attempts: {source}")]
    RetryExhausted {
        account_id: String,
        property_id: String,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("enumeration cancelled")]
    Cancelled,

    #[error("enumeration task failed: {0}")]
    TaskFailed(String),
}

/// Top-level error surfaced to the MCP tool layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}
