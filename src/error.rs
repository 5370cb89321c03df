use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Type alias for Result with IngestError
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error types for the lead ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    /// Token exchange exhausted its retries; fatal for the whole invocation
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit or quota exceeded - retry after the given seconds when the provider said so
    #[error("Rate limit exceeded{}", .retry_after.map(|s| format!(", retry after {} seconds", s)).unwrap_or_default())]
    RateLimitExceeded { retry_after: Option<u64> },

    /// Network-related error (connection issues, TLS, resets)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A single call exceeded its fixed timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Non-2xx provider response that is not retried
    #[error("Gmail API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Forbidden (403) without rate-limit phrasing
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Message payload could not be decoded
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Parser could not find the required fields
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// Database write or lookup failed
    #[error("Persistence error: {0}")]
    PersistenceError(#[from] rusqlite::Error),

    /// The store connection is unusable (poisoned lock)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl IngestError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::RateLimitExceeded { .. }
                | IngestError::NetworkError(_)
                | IngestError::Timeout(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Expected backpressure rather than a defect
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, IngestError::RateLimitExceeded { .. })
    }
}

static RATE_LIMIT_PHRASING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(rate.?limit|quota|too many requests|concurrent requests|backenderror.?ratelimit)")
        .expect("rate limit regex is valid")
});

/// Whether a 403 body is Google's way of saying "slow down"
pub fn is_rate_limit_message(body: &str) -> bool {
    RATE_LIMIT_PHRASING.is_match(body)
}

/// Parse the Retry-After header from an HTTP response
///
/// Only the delay-seconds form is honoured; an HTTP-date or garbage value yields `None`
/// so the caller falls back to its own backoff ladder.
pub fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Map a JSON error body (`{"error": {"code": .., "message": .., "errors": [..]}}`)
fn from_error_body(body: &serde_json::Value) -> IngestError {
    let error = body.get("error").unwrap_or(body);
    let status = error
        .get("code")
        .and_then(|c| c.as_u64())
        .unwrap_or(400) as u16;
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("no message")
        .to_string();
    let reasons = error
        .get("errors")
        .and_then(|e| e.as_array())
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.get("reason").and_then(|r| r.as_str()))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    match status {
        429 => IngestError::RateLimitExceeded { retry_after: None },
        403 if is_rate_limit_message(&message) || is_rate_limit_message(&reasons) => {
            IngestError::RateLimitExceeded { retry_after: None }
        }
        403 => IngestError::Forbidden(message),
        404 => IngestError::MessageNotFound(message),
        _ => IngestError::ApiError { status, message },
    }
}

/// Map a non-success response whose body was not JSON
///
/// Gmail sometimes answers quota trouble with a plain-text 403, so the body text is read
/// before deciding between a rate limit and a hard refusal.
pub async fn from_failure_response(response: google_gmail1::common::Response) -> IngestError {
    if response.status().as_u16() != 403 {
        return IngestError::from(google_gmail1::Error::Failure(response));
    }

    let retry_after = parse_retry_after_header(&response);
    let body = response
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();
    let text = String::from_utf8_lossy(&body);

    if is_rate_limit_message(&text) {
        IngestError::RateLimitExceeded { retry_after }
    } else if text.trim().is_empty() {
        IngestError::Forbidden("HTTP 403: Forbidden".to_string())
    } else {
        IngestError::Forbidden(format!("HTTP 403: {}", text.trim()))
    }
}

impl From<google_gmail1::Error> for IngestError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // Non-success response whose body was not JSON
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => IngestError::RateLimitExceeded {
                        retry_after: parse_retry_after_header(response),
                    },
                    403 => IngestError::Forbidden(message),
                    404 => IngestError::MessageNotFound("Resource not found".to_string()),
                    _ => IngestError::ApiError {
                        status: status_code,
                        message,
                    },
                }
            }
            // Non-success response with a JSON error document
            google_gmail1::Error::BadRequest(ref body) => from_error_body(body),
            google_gmail1::Error::HttpError(ref err) => {
                IngestError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => IngestError::NetworkError(err.to_string()),
            _ => IngestError::Unknown(error.to_string()),
        }
    }
}
