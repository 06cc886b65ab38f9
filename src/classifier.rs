//! Failure classification into retry-policy categories
//!
//! The retry engine treats classification as an external collaborator: a
//! fixed lookup that maps a failure to one of five [`ErrorCategory`] values.
//! [`DefaultClassifier`] covers the common HTTP/network vocabulary by
//! matching status codes and message patterns; callers with structured error
//! types implement [`Classifier`] themselves and classify precisely.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Failure category driving retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Temporary network issue, fast retry.
    Transient,
    /// Service overloaded, back off significantly.
    Overload,
    /// Request timed out, medium backoff.
    Timeout,
    /// Permanent error, never retried.
    Permanent,
    /// Unclassified, conservative retry.
    Unknown,
}

impl ErrorCategory {
    /// All categories, in a stable order.
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::Transient,
        ErrorCategory::Overload,
        ErrorCategory::Timeout,
        ErrorCategory::Permanent,
        ErrorCategory::Unknown,
    ];

    /// Whether this category is ever retried.
    pub fn is_retryable(self) -> bool {
        self != ErrorCategory::Permanent
    }

    /// Short human-readable description of the retry stance.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCategory::Transient => "temporary network issue - fast retry",
            ErrorCategory::Overload => "service overloaded - back off significantly",
            ErrorCategory::Timeout => "request timed out - medium backoff",
            ErrorCategory::Permanent => "permanent error - do not retry",
            ErrorCategory::Unknown => "unknown error - conservative retry",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "TRANSIENT"),
            ErrorCategory::Overload => write!(f, "OVERLOAD"),
            ErrorCategory::Timeout => write!(f, "TIMEOUT"),
            ErrorCategory::Permanent => write!(f, "PERMANENT"),
            ErrorCategory::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classifies an operation failure into an [`ErrorCategory`].
///
/// Implement this for error types that carry structured information (status
/// codes, error kinds) that the message-based default cannot see.
pub trait Classifier<E>: Send + Sync {
    /// Map a failure to its category.
    fn classify(&self, error: &E) -> ErrorCategory;
}

impl<E, F> Classifier<E> for F
where
    F: Fn(&E) -> ErrorCategory + Send + Sync,
{
    fn classify(&self, error: &E) -> ErrorCategory {
        self(error)
    }
}

/// Classify an HTTP status code.
///
/// Explicit entries take precedence, then 4xx maps to [`Permanent`] and 5xx
/// to [`Transient`]. Codes below 400 are [`Unknown`].
///
/// [`Permanent`]: ErrorCategory::Permanent
/// [`Transient`]: ErrorCategory::Transient
/// [`Unknown`]: ErrorCategory::Unknown
pub fn classify_status(status: u16) -> ErrorCategory {
    match status {
        429 => ErrorCategory::Overload,
        502 | 503 => ErrorCategory::Overload,
        504 => ErrorCategory::Timeout,
        400..=499 => ErrorCategory::Permanent,
        500..=599 => ErrorCategory::Transient,
        _ => ErrorCategory::Unknown,
    }
}

static STATUS_IN_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:HTTP|status(?:\s+code)?)[ :/]+([1-5]\d{2})\b")
        .expect("STATUS_IN_MESSAGE pattern is valid and well-formed")
});

static MESSAGE_PATTERNS: Lazy<Vec<(Regex, ErrorCategory)>> = Lazy::new(|| {
    // Ordered: first match wins.
    let table: &[(&str, ErrorCategory)] = &[
        (r"(?i)timeout|timed ?out|ETIMEDOUT|ESOCKETTIMEDOUT", ErrorCategory::Timeout),
        (
            concat!(
                r"(?i)ECONNRESET|ECONNREFUSED|ECONNABORTED|EPIPE|ENETUNREACH|EHOSTUNREACH",
                r"|EAI_AGAIN|connection reset|socket hang up|network error",
            ),
            ErrorCategory::Transient,
        ),
        (r"(?i)ENOTFOUND|getaddrinfo", ErrorCategory::Permanent),
        (r"(?i)rate limit|too many requests|throttl", ErrorCategory::Overload),
        (r"(?i)service unavailable|temporarily unavailable", ErrorCategory::Overload),
        (r"(?i)certificate|\bSSL\b|\bTLS\b", ErrorCategory::Permanent),
    ];
    table
        .iter()
        .map(|(pattern, category)| {
            (Regex::new(pattern).expect("message pattern should compile - this is a bug"), *category)
        })
        .collect()
});

/// Classify a failure by its rendered message.
///
/// A recognizable embedded status code (e.g. `"HTTP 503"`) wins over message
/// patterns; otherwise the first matching pattern decides. Falls back to
/// [`ErrorCategory::Unknown`].
pub fn classify_message(message: &str) -> ErrorCategory {
    if let Some(captures) = STATUS_IN_MESSAGE.captures(message) {
        if let Some(status) = captures.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) {
            let category = classify_status(status);
            if category != ErrorCategory::Unknown {
                return category;
            }
        }
    }

    for (pattern, category) in MESSAGE_PATTERNS.iter() {
        if pattern.is_match(message) {
            return *category;
        }
    }

    ErrorCategory::Unknown
}

/// Message-based classifier used when the caller supplies none.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<E: fmt::Display> Classifier<E> for DefaultClassifier {
    fn classify(&self, error: &E) -> ErrorCategory {
        classify_message(&error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the explicit status table plus the 4xx/5xx range fallbacks.
    #[test]
    fn test_classify_status_table() {
        assert_eq!(classify_status(404), ErrorCategory::Permanent);
        assert_eq!(classify_status(401), ErrorCategory::Permanent);
        assert_eq!(classify_status(422), ErrorCategory::Permanent);
        assert_eq!(classify_status(429), ErrorCategory::Overload);
        assert_eq!(classify_status(500), ErrorCategory::Transient);
        assert_eq!(classify_status(502), ErrorCategory::Overload);
        assert_eq!(classify_status(503), ErrorCategory::Overload);
        assert_eq!(classify_status(504), ErrorCategory::Timeout);
    }

    /// Validates range fallbacks for codes without explicit entries.
    #[test]
    fn test_classify_status_ranges() {
        assert_eq!(classify_status(418), ErrorCategory::Permanent);
        assert_eq!(classify_status(599), ErrorCategory::Transient);
        assert_eq!(classify_status(302), ErrorCategory::Unknown);
    }

    /// Validates message-pattern classification across the five categories.
    #[test]
    fn test_classify_message_patterns() {
        assert_eq!(classify_message("connect ETIMEDOUT 10.0.0.1:443"), ErrorCategory::Timeout);
        assert_eq!(classify_message("read ECONNRESET"), ErrorCategory::Transient);
        assert_eq!(classify_message("socket hang up"), ErrorCategory::Transient);
        assert_eq!(classify_message("getaddrinfo ENOTFOUND api.internal"), ErrorCategory::Permanent);
        assert_eq!(classify_message("rate limit exceeded, slow down"), ErrorCategory::Overload);
        assert_eq!(classify_message("service unavailable"), ErrorCategory::Overload);
        assert_eq!(classify_message("certificate has expired"), ErrorCategory::Permanent);
        assert_eq!(classify_message("something inexplicable"), ErrorCategory::Unknown);
    }

    /// Validates that an embedded status code wins over message patterns.
    #[test]
    fn test_embedded_status_takes_precedence() {
        // "unavailable" alone would classify as OVERLOAD, but the explicit
        // 404 decides first.
        assert_eq!(classify_message("HTTP 404: resource unavailable"), ErrorCategory::Permanent);
        assert_eq!(classify_message("status code 503"), ErrorCategory::Overload);
    }

    /// Validates `DefaultClassifier` over a plain error type.
    #[test]
    fn test_default_classifier_display_based() {
        let error = std::io::Error::new(std::io::ErrorKind::Other, "connection reset by peer");
        assert_eq!(DefaultClassifier.classify(&error), ErrorCategory::Transient);
    }

    /// Validates that closures act as classifiers.
    #[test]
    fn test_closure_classifier() {
        let classifier = |_: &String| ErrorCategory::Overload;
        assert_eq!(classifier.classify(&"anything".to_string()), ErrorCategory::Overload);
    }

    /// Validates retryability: everything except PERMANENT retries.
    #[test]
    fn test_is_retryable() {
        for category in ErrorCategory::ALL {
            assert_eq!(category.is_retryable(), category != ErrorCategory::Permanent);
        }
    }

    /// Validates the display form used in logs and serialized snapshots.
    #[test]
    fn test_display_screaming_case() {
        assert_eq!(ErrorCategory::Transient.to_string(), "TRANSIENT");
        assert_eq!(ErrorCategory::Permanent.to_string(), "PERMANENT");
    }
}
