//! Error taxonomy for retry execution
//!
//! Three terminal outcomes exist for a retry sequence: the circuit breaker
//! refused to attempt at all, the delay calculator (or a PERMANENT
//! classification) vetoed further retries, or the attempt budget ran out.
//! The last two carry the final underlying failure so callers can still see
//! exactly what went wrong.

use std::time::Duration;

use thiserror::Error;

use crate::classifier::ErrorCategory;

/// Boxed error type for adapter and bookkeeping errors.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a single failed attempt.
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    /// The operation itself returned an error.
    #[error("{0}")]
    Operation(E),

    /// The attempt exceeded the per-attempt timeout.
    #[error("attempt timed out after {limit:?}")]
    TimedOut {
        /// The configured per-attempt timeout.
        limit: Duration,
    },
}

impl<E> AttemptError<E> {
    /// True when the attempt failed by timing out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptError::TimedOut { .. })
    }

    /// Extract the underlying operation error, if there is one.
    pub fn into_operation(self) -> Option<E> {
        match self {
            AttemptError::Operation(error) => Some(error),
            AttemptError::TimedOut { .. } => None,
        }
    }
}

/// Terminal error of a retry sequence.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The circuit breaker is open; no attempt was made.
    ///
    /// Self-healing: once `retry_after` has elapsed the breaker will permit
    /// a probe attempt.
    #[error("circuit breaker is open for endpoint `{endpoint}`, retry in {retry_after:?}")]
    CircuitOpen {
        /// Endpoint whose breaker rejected the call.
        endpoint: String,
        /// Remaining cooldown before a probe is permitted.
        retry_after: Duration,
    },

    /// The failure was judged non-retryable, either by a PERMANENT
    /// classification or by the learned-futility probability floor.
    #[error("non-retryable {category} failure after {attempts} attempt(s): {source}")]
    Rejected {
        /// Attempts made before giving up.
        attempts: u32,
        /// Category of the final failure.
        category: ErrorCategory,
        /// The final underlying failure.
        source: AttemptError<E>,
    },

    /// Every allowed attempt failed.
    #[error("all {attempts} attempt(s) exhausted: {source}")]
    Exhausted {
        /// Attempts made, equal to the configured budget.
        attempts: u32,
        /// The final underlying failure.
        source: AttemptError<E>,
    },
}

impl<E> RetryError<E> {
    /// Number of operation invocations before this error, zero for
    /// [`RetryError::CircuitOpen`].
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::CircuitOpen { .. } => 0,
            RetryError::Rejected { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The final attempt failure, when one exists.
    pub fn into_source(self) -> Option<AttemptError<E>> {
        match self {
            RetryError::CircuitOpen { .. } => None,
            RetryError::Rejected { source, .. } | RetryError::Exhausted { source, .. } => {
                Some(source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom: {0}")]
    struct TestError(String);

    /// Validates display rendering of the three terminal variants.
    #[test]
    fn test_retry_error_display() {
        let err: RetryError<TestError> = RetryError::CircuitOpen {
            endpoint: "billing".to_string(),
            retry_after: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("billing"));
        assert!(err.to_string().contains("open"));

        let err: RetryError<TestError> = RetryError::Rejected {
            attempts: 1,
            category: ErrorCategory::Permanent,
            source: AttemptError::Operation(TestError("404".to_string())),
        };
        assert!(err.to_string().contains("PERMANENT"));
        assert!(err.to_string().contains("boom: 404"));

        let err: RetryError<TestError> = RetryError::Exhausted {
            attempts: 5,
            source: AttemptError::TimedOut { limit: Duration::from_secs(30) },
        };
        assert!(err.to_string().contains("5 attempt(s)"));
        assert!(err.to_string().contains("timed out"));
    }

    /// Validates accessor helpers on the terminal error.
    #[test]
    fn test_retry_error_accessors() {
        let err: RetryError<TestError> = RetryError::Exhausted {
            attempts: 3,
            source: AttemptError::Operation(TestError("x".to_string())),
        };
        assert_eq!(err.attempts(), 3);
        let source = err.into_source().expect("exhausted carries a source");
        assert!(!source.is_timeout());
        assert!(source.into_operation().is_some());

        let open: RetryError<TestError> = RetryError::CircuitOpen {
            endpoint: "ep".to_string(),
            retry_after: Duration::ZERO,
        };
        assert_eq!(open.attempts(), 0);
        assert!(open.into_source().is_none());
    }

    /// Validates timeout attempts have no operation error to extract.
    #[test]
    fn test_attempt_error_timeout() {
        let failure: AttemptError<TestError> =
            AttemptError::TimedOut { limit: Duration::from_millis(100) };
        assert!(failure.is_timeout());
        assert!(failure.into_operation().is_none());
    }
}
