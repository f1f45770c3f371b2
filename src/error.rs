//! Error types for the retry execution policy
use std::any::TypeId;
use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Built-in retryable error.
///
/// Raising (returning) this from a handler always asks the policy for another
/// attempt, unless the request is already on its last one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryableError {
    message: String,
}

impl RetryableError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "retryable error")
        } else {
            write!(f, "retryable error: {}", self.message)
        }
    }
}

impl StdError for RetryableError {}

/// Error raised by a request handler, hook or exception view.
///
/// Wraps any `std::error::Error` while remembering its concrete type, so the
/// classifier can match registered retryable types, and an instance-level
/// retryable tag.
pub struct Failure {
    inner: Box<dyn StdError + Send + Sync + 'static>,
    type_id: TypeId,
    type_name: &'static str,
    marked: bool,
}

impl Failure {
    /// Wrap an error without marking it.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            marked: false,
        }
    }

    /// Wrap an error and tag this instance as retryable.
    pub fn retryable<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let mut failure = Self::new(error);
        failure.mark_retryable();
        failure
    }

    /// Tag this instance as retryable.
    pub fn mark_retryable(&mut self) {
        self.marked = true;
    }

    /// Whether this instance carries the retryable tag.
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    /// Whether the wrapped error is of type `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// `TypeId` of the wrapped error.
    pub fn error_type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the wrapped error type, for diagnostics.
    pub fn error_type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrow the wrapped error.
    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }

    /// Unwrap into the boxed error, dropping the tag.
    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync + 'static> {
        self.inner
    }
}

impl<E> From<E> for Failure
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Failure::new(error)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("type", &self.type_name)
            .field("error", &self.inner)
            .field("marked", &self.marked)
            .finish()
    }
}

impl AsRef<dyn StdError + Send + Sync> for Failure {
    fn as_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

/// Errors surfaced by [`RetryableExecutionPolicy::execute`](crate::RetryableExecutionPolicy::execute).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum PolicyError {
    /// A handler, hook or exception view failed; the original failure, unchanged.
    #[error("{0}")]
    Failure(Failure),
    /// The request body could not be buffered for re-reading.
    #[error("request body could not be buffered: {0}")]
    Body(#[from] io::Error),
    /// The activation hook asked for a non-positive attempt budget.
    #[error("activation hook returned an invalid attempt count ({0}); must be >= 1")]
    InvalidAttempts(usize),
}

impl PolicyError {
    /// Borrow the propagated failure, if this is one.
    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    /// Take the propagated failure, if this is one.
    pub fn into_failure(self) -> Option<Failure> {
        match self {
            Self::Failure(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<Failure> for PolicyError {
    fn from(failure: Failure) -> Self {
        PolicyError::Failure(failure)
    }
}

/// Outcome of a failed exception-view lookup.
#[derive(thiserror::Error, Debug)]
pub enum ExceptionViewError {
    /// No exception view matched the failure.
    #[error("no exception view matched")]
    NotFound,
    /// An exception view matched but failed itself.
    #[error("exception view failed: {0}")]
    Failed(Failure),
}

/// Configuration-time errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A view predicate was declared with a non-boolean value.
    #[error("the \"{name}\" view predicate value must be true or false (got {value})")]
    PredicateNotBool {
        /// Predicate name.
        name: &'static str,
        /// The declared value, rendered as JSON.
        value: String,
    },
    /// `retry.attempts` could not be coerced to a positive integer.
    #[error("retry.attempts must be a positive integer (got {0})")]
    InvalidAttempts(String),
    /// `retry.activate_hook` was not a string.
    #[error("retry.activate_hook must name a hook (got {0})")]
    InvalidHook(String),
    /// `retry.activate_hook` named a hook that is not registered.
    #[error("activation hook '{0}' could not be resolved")]
    UnknownHook(String),
    /// A view declared a predicate that was never registered.
    #[error("unknown view predicate '{0}'")]
    UnknownPredicate(String),
}

/// Errors from marking values retryable.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkError {
    /// The target was neither a failure nor an error type.
    #[error("{0} is not an error instance or error type")]
    InvalidArgument(&'static str),
}
