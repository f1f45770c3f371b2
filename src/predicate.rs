//! View predicates keyed off the retry state.
//!
//! Hosts consult these while selecting a view or exception view, e.g. to route
//! the last attempt to a fallback view or to render retryable errors
//! differently.

use serde_json::Value;

use crate::classify::{is_error_retryable, is_last_attempt};
use crate::environ::Environ;
use crate::error::{ConfigError, Failure};

/// Name the retryable-error predicate is registered under.
pub const RETRYABLE_ERROR: &str = "retryable_error";
/// Name the last-attempt predicate is registered under.
pub const LAST_RETRY_ATTEMPT: &str = "last_retry_attempt";

/// A boolean predicate consulted during view selection.
pub trait ViewPredicate: Send + Sync + std::fmt::Debug {
    /// Stable description of the predicate and its declared value.
    fn text(&self) -> String;

    /// Identity used to de-duplicate view registrations.
    fn phash(&self) -> String {
        self.text()
    }

    /// Whether the view should be selected for this request.
    fn matches(&self, environ: &Environ, exception: Option<&Failure>) -> bool;
}

/// Builds a predicate from its declared value.
pub type PredicateFactory = fn(&Value) -> Result<Box<dyn ViewPredicate>, ConfigError>;

fn declared_bool(name: &'static str, value: &Value) -> Result<bool, ConfigError> {
    value
        .as_bool()
        .ok_or_else(|| ConfigError::PredicateNotBool { name, value: value.to_string() })
}

/// Matches when the request's exception is (or is not) retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryableErrorPredicate {
    val: bool,
}

impl RetryableErrorPredicate {
    pub fn new(value: &Value) -> Result<Self, ConfigError> {
        Ok(Self { val: declared_bool(RETRYABLE_ERROR, value)? })
    }

    pub fn factory(value: &Value) -> Result<Box<dyn ViewPredicate>, ConfigError> {
        Ok(Box::new(Self::new(value)?))
    }
}

impl ViewPredicate for RetryableErrorPredicate {
    fn text(&self) -> String {
        format!("{} = {}", RETRYABLE_ERROR, self.val)
    }

    fn matches(&self, environ: &Environ, exception: Option<&Failure>) -> bool {
        let retryable = exception.is_some_and(|failure| is_error_retryable(environ, failure));
        retryable == self.val
    }
}

/// Matches when the request is (or is not) on its last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastAttemptPredicate {
    val: bool,
}

impl LastAttemptPredicate {
    pub fn new(value: &Value) -> Result<Self, ConfigError> {
        Ok(Self { val: declared_bool(LAST_RETRY_ATTEMPT, value)? })
    }

    pub fn factory(value: &Value) -> Result<Box<dyn ViewPredicate>, ConfigError> {
        Ok(Box::new(Self::new(value)?))
    }
}

impl ViewPredicate for LastAttemptPredicate {
    fn text(&self) -> String {
        format!("{} = {}", LAST_RETRY_ATTEMPT, self.val)
    }

    fn matches(&self, environ: &Environ, _exception: Option<&Failure>) -> bool {
        is_last_attempt(environ) == self.val
    }
}
