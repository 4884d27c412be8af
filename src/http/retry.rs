//! Classification of HTTP failures into retryable and terminal ones.

use reqwest::StatusCode;
use thiserror::Error;

/// Default number of attempts for a network operation.
pub const MAX_RETRIES: usize = 3;

/// Default delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Failures that will not succeed on another attempt.
#[derive(Debug, Error)]
pub enum NonRetryableError {
    #[error("rate limit exceeded at {0}, try again later")]
    RateLimitExceeded(String),

    #[error("authentication required for {0}")]
    AuthenticationFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access forbidden: {0}")]
    Forbidden(String),

    #[error("HTTP {status} from {url}")]
    ClientError { status: u16, url: String },
}

fn error_url(error: &reqwest::Error) -> String {
    error
        .url()
        .map(|u| u.to_string())
        .unwrap_or_else(|| "<unknown url>".to_string())
}

/// Returns `Err` for failures that must not be retried.
///
/// 5xx responses, timeouts and connection errors are retryable.
pub fn classify_error(error: &reqwest::Error) -> Result<(), NonRetryableError> {
    let Some(status) = error.status() else {
        return Ok(());
    };
    let url = error_url(error);

    match status {
        StatusCode::UNAUTHORIZED => Err(NonRetryableError::AuthenticationFailed(url)),
        StatusCode::FORBIDDEN => {
            if error.to_string().contains("rate limit") {
                Err(NonRetryableError::RateLimitExceeded(url))
            } else {
                Err(NonRetryableError::Forbidden(url))
            }
        }
        StatusCode::TOO_MANY_REQUESTS => Err(NonRetryableError::RateLimitExceeded(url)),
        StatusCode::NOT_FOUND => Err(NonRetryableError::NotFound(url)),
        s if s.is_client_error() => Err(NonRetryableError::ClientError {
            status: s.as_u16(),
            url,
        }),
        _ => Ok(()),
    }
}

/// Map an `error_for_status()` failure to an `anyhow::Error`, replacing it
/// with a [`NonRetryableError`] when retrying is pointless.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match classify_error(&error) {
        Ok(()) => anyhow::Error::from(error),
        Err(non_retryable) => anyhow::Error::from(non_retryable),
    }
}
