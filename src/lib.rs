#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # reissue
//!
//! Request-retry execution policy for web frameworks: when a handler fails with
//! a retryable error, the request is discarded and executed again from scratch,
//! up to a bounded number of attempts.
//!
//! ## Features
//!
//! - **Retry loop** over a host [`Router`], rebuilding the request on each attempt
//! - **Retryable markers** for error instances and error types
//! - **Squashed errors**: failures already rendered by an exception view are retried too
//! - **View predicates** `retryable_error` and `last_retry_attempt`
//! - **Activation hook** to override the attempt budget per request
//! - **Tower integration** via [`Layer`](tower_layer::Layer) / [`Service`](tower_service::Service)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reissue::{Environ, RetryableExecutionPolicy};
//!
//! let policy = RetryableExecutionPolicy::builder().attempts(3).build()?;
//! let mut environ = Environ::blank("/orders");
//! let response = policy.execute(&mut environ, &router).await?;
//! ```

pub mod classify;
pub mod config;
pub mod environ;
pub mod error;
pub mod host;
pub mod marker;
pub mod policy;
pub mod predicate;
pub mod prelude;

// Re-exports
pub use classify::{is_error_retryable, is_last_attempt};
pub use config::{include, BasicConfigurator, Configurator, RetrySettings, Settings};
pub use environ::{AttemptState, Body, Environ};
pub use error::{ConfigError, ExceptionViewError, Failure, MarkError, PolicyError, RetryableError};
pub use host::{BeforeRetry, HostRequest, Router};
pub use marker::{mark_error_retryable, mark_type_retryable, ErrorType};
pub use policy::{
    ActivateHook, BuildError, ExecutionService, RetryableExecutionPolicy,
    RetryableExecutionPolicyBuilder, DEFAULT_ATTEMPTS,
};
pub use predicate::{LastAttemptPredicate, RetryableErrorPredicate, ViewPredicate};
