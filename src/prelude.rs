//! Convenient re-exports for common reissue types.
pub use crate::{
    classify::{is_error_retryable, is_last_attempt},
    config::{include, Configurator},
    environ::{AttemptState, Body, Environ},
    error::{ExceptionViewError, Failure, PolicyError, RetryableError},
    host::{BeforeRetry, HostRequest, Router},
    marker::{mark_error_retryable, mark_type_retryable, ErrorType},
    policy::RetryableExecutionPolicy,
    predicate::{LastAttemptPredicate, RetryableErrorPredicate, ViewPredicate},
};
