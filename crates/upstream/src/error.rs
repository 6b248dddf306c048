//! Client error kinds and retryability classification.

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

/// Failure of a single upstream request, classified for the caller.
///
/// Clients do not retry; managers decide based on [`ClientError::is_retryable`]
/// whether the next tick should try again.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Non-2xx response that is not a rate limit.
    #[error("upstream returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Response body did not match the expected shape.
    #[error("response validation failed: {issues:?}")]
    Validation { issues: Vec<String> },

    /// Transport-level failure.
    #[error("network error (timeout: {is_timeout})")]
    Network { is_timeout: bool },

    /// 429 with optional server guidance on when to come back.
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit {
        retry_after: Option<u64>,
        reset_at: Option<DateTime<Utc>>,
    },
}

impl ClientError {
    /// Whether the same request may succeed on a later tick.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::RateLimit { .. } | ClientError::Network { .. } => true,
            ClientError::Api { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ClientError::Validation { .. } => false,
        }
    }

    /// Classifies a non-2xx response.
    #[must_use]
    pub fn from_status(status: u16, body: String, headers: &reqwest::header::HeaderMap) -> Self {
        if status == 429 {
            let retry_after = header_u64(headers, "retry-after");
            let reset_at = header_u64(headers, "x-ratelimit-reset")
                .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());
            return ClientError::RateLimit {
                retry_after,
                reset_at,
            };
        }
        ClientError::Api { status, body }
    }

    pub(crate) fn validation(issue: impl Into<String>) -> Self {
        ClientError::Validation {
            issues: vec![issue.into()],
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ClientError::Validation {
                issues: vec![err.to_string()],
            };
        }
        ClientError::Network {
            is_timeout: err.is_timeout(),
        }
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    #[test]
    fn rate_limit_and_network_are_retryable() {
        assert!(ClientError::RateLimit {
            retry_after: Some(5),
            reset_at: None
        }
        .is_retryable());
        assert!(ClientError::Network { is_timeout: true }.is_retryable());
        assert!(ClientError::Network { is_timeout: false }.is_retryable());
    }

    #[test]
    fn api_errors_retryable_only_for_5xx_408_429() {
        let api = |status| ClientError::Api {
            status,
            body: String::new(),
        };
        assert!(api(500).is_retryable());
        assert!(api(503).is_retryable());
        assert!(api(408).is_retryable());
        assert!(api(429).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(404).is_retryable());
        assert!(!api(403).is_retryable());
    }

    #[test]
    fn validation_is_never_retryable() {
        let err = ClientError::Validation {
            issues: vec!["missing field".to_string()],
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn status_429_maps_to_rate_limit_with_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "12".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1700000000".parse().unwrap());

        match ClientError::from_status(429, "slow down".to_string(), &headers) {
            ClientError::RateLimit {
                retry_after,
                reset_at,
            } => {
                assert_eq!(retry_after, Some(12));
                assert_eq!(reset_at.unwrap().timestamp(), 1_700_000_000);
            }
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[test]
    fn status_500_maps_to_api_error() {
        let headers = HeaderMap::new();
        match ClientError::from_status(500, "boom".to_string(), &headers) {
            ClientError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }
}
