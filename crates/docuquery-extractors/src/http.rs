//! Mapping of HTTP transport outcomes onto service errors.

use std::time::Duration;

use docuquery_core::error::{ServiceError, ServiceKind};
use reqwest::StatusCode;

/// Map a reqwest transport error.
pub(crate) fn transport_error(service: ServiceKind, err: reqwest::Error, timeout: Duration) -> ServiceError {
    if err.is_timeout() {
        ServiceError::timeout(service, timeout)
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ServiceError::transient(service, format!("request failed: {err}"))
    } else {
        ServiceError::permanent(service, format!("request failed: {err}"))
    }
}

/// Map a non-success status.
///
/// 408, 429 and 5xx are transient, 413 is a payload rejection, other 4xx are permanent.
pub(crate) fn status_error(
    service: ServiceKind,
    status: StatusCode,
    body: &str,
    payload_size: usize,
    limit: usize,
) -> ServiceError {
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", truncate(body, 200))
    };

    match status {
        StatusCode::PAYLOAD_TOO_LARGE => ServiceError::PayloadTooLarge {
            size: payload_size,
            limit,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ServiceError::transient(service, message)
        }
        s if s.is_server_error() => ServiceError::transient(service, message),
        _ => ServiceError::permanent(service, message),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
