//! Error taxonomy for sync runs.
//!
//! Every collaborator failure is classified exactly once, at the boundary
//! where the raw HTTP status or transport error is visible, into one of the
//! [`SyncError`] variants. The retry layer and the executor only look at
//! the variant, never at status codes or message text.
//!
//! | Variant | Meaning | Handling |
//! |---------|---------|----------|
//! | `Transient` | network blip, 429, 5xx, timeout | retried with backoff |
//! | `Permanent` | input rejected (4xx validation) | recorded per chunk |
//! | `Exhausted` | transient error that ran out of attempts | recorded per chunk |
//! | `Fatal` | auth failure, index missing, remote state unreadable | aborts the run |
//! | `Cancelled` | another worker hit a fatal error first | unit stops, run aborts |

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("transient failure: {reason}")]
    Transient {
        reason: String,
        /// Server-supplied wait before the next attempt.
        retry_after: Option<Duration>,
        /// Set when the remote explicitly signalled overload (HTTP 429).
        rate_limited: bool,
    },

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("fatal: {0}")]
    Fatal(String),

    /// The run was cancelled while this operation waited or retried.
    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn transient(reason: impl Into<String>) -> Self {
        SyncError::Transient {
            reason: reason.into(),
            retry_after: None,
            rate_limited: false,
        }
    }

    pub fn rate_limited(reason: impl Into<String>, retry_after: Option<Duration>) -> Self {
        SyncError::Transient {
            reason: reason.into(),
            retry_after,
            rate_limited: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }

    /// Whether the run must stop; cancellation included.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Fatal(_) | SyncError::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Promote a non-fatal error to fatal, keeping its message.
    ///
    /// Used where the run cannot continue without the operation, such as
    /// reading the remote projection.
    pub fn into_fatal(self, context: &str) -> Self {
        match self {
            SyncError::Fatal(_) | SyncError::Cancelled => self,
            other => SyncError::Fatal(format!("{}: {}", context, other)),
        }
    }

    /// Short reason string recorded in the run report.
    pub fn reason(&self) -> String {
        match self {
            SyncError::Transient { reason, .. } => reason.clone(),
            SyncError::Permanent(reason) | SyncError::Fatal(reason) => reason.clone(),
            SyncError::Exhausted { attempts, last } => {
                format!("{} (after {} attempts)", last, attempts)
            }
            SyncError::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Which remote endpoint produced a status, for 404 handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Index document operations: a 404 means the index does not exist.
    Index,
    /// Embedding provider: a 404 means the model deployment does not exist.
    Embedding,
}

/// Classify an HTTP error status into a [`SyncError`].
///
/// - 401, 403 → `Fatal` (credentials will not start working mid-run)
/// - 404 → `Fatal` (index or deployment missing)
/// - 408, 409, 423, 425, 429, 5xx → `Transient`
/// - any other 4xx → `Permanent`
pub fn classify_status(
    endpoint: Endpoint,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> SyncError {
    let detail = truncate(body, 300);
    match status {
        401 | 403 => SyncError::Fatal(format!("authentication failed (HTTP {}): {}", status, detail)),
        404 => {
            let what = match endpoint {
                Endpoint::Index => "index not found",
                Endpoint::Embedding => "embedding deployment not found",
            };
            SyncError::Fatal(format!("{} (HTTP 404): {}", what, detail))
        }
        429 => SyncError::rate_limited(format!("rate limited (HTTP 429): {}", detail), retry_after),
        408 | 409 | 423 | 425 => SyncError::Transient {
            reason: format!("HTTP {}: {}", status, detail),
            retry_after,
            rate_limited: false,
        },
        s if s >= 500 => SyncError::Transient {
            reason: format!("server error (HTTP {}): {}", status, detail),
            retry_after,
            rate_limited: false,
        },
        _ => SyncError::Permanent(format!("HTTP {}: {}", status, detail)),
    }
}

/// Classify a transport-level `reqwest` error.
///
/// Connection failures, timeouts, and body read errors are transient;
/// request-building errors are permanent.
pub fn classify_transport(err: &reqwest::Error) -> SyncError {
    if err.is_builder() {
        SyncError::Permanent(format!("invalid request: {}", err))
    } else {
        SyncError::transient(format!("network error: {}", err))
    }
}

/// Extract a retry hint from response headers.
///
/// Checks `retry-after-ms`, `x-ms-retry-after-ms`, then `retry-after`
/// (delta-seconds or HTTP-date).
pub fn retry_after_from_headers(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    for name in ["retry-after-ms", "x-ms-retry-after-ms"] {
        if let Some(ms) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
        {
            if ms.is_finite() && ms >= 0.0 {
                return Some(Duration::from_secs_f64(ms / 1000.0));
            }
        }
    }
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()))
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse::<u64>().ok().map(Duration::from_secs);
    }
    let when = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((when - now).to_std().unwrap_or(Duration::ZERO))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
