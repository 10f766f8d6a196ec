//! Backend capability trait and the error taxonomy adapters must produce.
//!
//! Transport clients (HTTP/SDK wrappers) live outside this crate; an adapter
//! implements [`ModelBackend`] and normalizes its own transport errors into
//! [`BackendError`] variants so the retrying executor can classify them. The
//! helpers at the bottom cover the common HTTP cases.

pub mod mock;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::{BackendId, SchemaDescriptor};

/// Structured output produced by a backend call, pre-validation.
pub type ExtractOutput = serde_json::Value;

/// Failure of a single backend call, split into retryable and fatal halves.
///
/// Retryable variants are worth another attempt against the same backend;
/// fatal variants skip straight to the next backend in the chain.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// The call exceeded its per-call timeout.
    #[error("call timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Transient transport fault (connection reset, DNS hiccup, 5xx).
    #[error("transport error: {0}")]
    Transport(String),

    /// Server returned 429 Too Many Requests.
    #[error("rate limited (429)")]
    RateLimited { retry_after: Option<Duration> },

    /// The call succeeded but the output does not conform to the schema.
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    /// Authentication or authorization failure.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The backend rejected its own configuration (bad model name, missing
    /// endpoint, unsupported operation).
    #[error("backend misconfigured: {0}")]
    Misconfigured(String),

    /// The backend declared itself unavailable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether this failure is worth retrying the same backend.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout(_)
                | BackendError::Transport(_)
                | BackendError::RateLimited { .. }
                | BackendError::SchemaValidation(_)
        )
    }
}

/// A backend that can extract structured data from section content.
pub trait ModelBackend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Call the backend once. Implementations should honor `timeout` on their
    /// own transport; the executor additionally enforces it from outside.
    fn call<'a>(
        &'a self,
        content: &'a str,
        schema: &'a SchemaDescriptor,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<ExtractOutput, BackendError>> + Send + 'a>>;
}

/// Truncate `content` to `max_chars` at a valid UTF-8 boundary.
pub fn truncate_content(content: &str, max_chars: usize) -> &str {
    if content.len() <= max_chars {
        return content;
    }
    let mut end = max_chars;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

// ── HTTP normalization helpers for adapter implementations ──────────────

/// Check if an HTTP response is a 429 and extract Retry-After if present.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), BackendError> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(BackendError::RateLimited { retry_after })
    } else {
        Ok(())
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date form: fall back to a conservative fixed wait.
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// Map a non-success HTTP status into the taxonomy. Returns `None` for
/// success statuses.
pub fn classify_status(status: reqwest::StatusCode) -> Option<BackendError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        401 | 403 => BackendError::Auth(format!("HTTP {status}")),
        404 => BackendError::Misconfigured(format!("HTTP {status}")),
        429 => BackendError::RateLimited { retry_after: None },
        503 => BackendError::Unavailable(format!("HTTP {status}")),
        _ if status.is_server_error() => BackendError::Transport(format!("HTTP {status}")),
        _ => BackendError::Misconfigured(format!("HTTP {status}")),
    })
}

/// Map a reqwest transport error into the taxonomy.
pub fn classify_transport(err: &reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else {
        BackendError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BackendError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(BackendError::Transport("reset".into()).is_retryable());
        assert!(BackendError::RateLimited { retry_after: None }.is_retryable());
        assert!(BackendError::SchemaValidation("missing field".into()).is_retryable());

        assert!(!BackendError::Auth("bad key".into()).is_retryable());
        assert!(!BackendError::Misconfigured("no model".into()).is_retryable());
        assert!(!BackendError::Unavailable("maintenance".into()).is_retryable());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_content("hello", 10), "hello");
        assert_eq!(truncate_content("hello", 3), "hel");
        // "é" is two bytes; cutting at byte 1 must back off to 0.
        assert_eq!(truncate_content("é", 1), "");
        let s = "aé";
        assert_eq!(truncate_content(s, 2), "a");
    }

    #[test]
    fn parse_integer_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
    }

    #[test]
    fn parse_http_date_falls_back() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn parse_garbage_none() {
        assert_eq!(parse_retry_after("xyz"), None);
    }

    #[test]
    fn rate_limit_response_429_with_header() {
        let http_resp = http::Response::builder()
            .status(429)
            .header("retry-after", "10")
            .body("")
            .unwrap();
        let resp = reqwest::Response::from(http_resp);
        let err = check_rate_limit_response(&resp).unwrap_err();
        match err {
            BackendError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(10)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn rate_limit_response_ok_on_200() {
        let http_resp = http::Response::builder().status(200).body("").unwrap();
        let resp = reqwest::Response::from(http_resp);
        assert!(check_rate_limit_response(&resp).is_ok());
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            Some(BackendError::Auth(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(BackendError::RateLimited { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(BackendError::Unavailable(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            Some(BackendError::Transport(_))
        ));
    }
}
