//! Attempt-aware failure classification.

use crate::environ::Environ;
use crate::error::{Failure, RetryableError};
use crate::marker::is_type_marked;

/// Whether the request is on its last attempt.
///
/// Also true when no attempt is running, i.e. retries are inactive for the request.
pub fn is_last_attempt(environ: &Environ) -> bool {
    match environ.attempt_state() {
        Some(state) => state.is_last(),
        None => true,
    }
}

/// Whether `failure` should trigger another attempt.
///
/// Always false on the last attempt or when retries are inactive. Otherwise a
/// failure is retryable when it wraps [`RetryableError`], carries the instance
/// tag, or its error type was marked.
pub fn is_error_retryable(environ: &Environ, failure: &Failure) -> bool {
    if is_last_attempt(environ) {
        return false;
    }
    failure.is::<RetryableError>() || failure.is_marked() || is_type_marked(failure)
}
