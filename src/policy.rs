//! Retryable execution policy.
//!
//! Runs one incoming request through the host router, re-executing it from a
//! fresh request object whenever it fails with a retryable error.
//!
//! Semantics:
//! - `attempts` counts total attempts (initial try + retries).
//! - An activation hook may override `attempts` per request; it sees the first
//!   request object before any attempt starts.
//! - With more than one attempt the body is buffered up front so every attempt
//!   reads the same payload.
//! - A failure returned by the router is retried when it classifies retryable;
//!   otherwise it is rendered through the host's exception views, and
//!   re-raised unchanged if none match.
//! - A failure an exception view already rendered ("squashed") is retried too
//!   when it classifies retryable; the rendered response is discarded.
//! - `BeforeRetry` is dispatched once per abandoned attempt.
//!
//! Invariants:
//! - Attempts never exceed `attempts`.
//! - Attempt state is visible in the environment only while an attempt runs,
//!   and is cleared on every exit path, including a dropped future.
//!
//! Example
//! ```rust,ignore
//! let policy = RetryableExecutionPolicy::builder().attempts(3).build()?;
//! let response = policy.execute(&mut environ, &router).await?;
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, warn};

use crate::classify::is_error_retryable;
use crate::environ::{AttemptState, Environ};
use crate::error::{ExceptionViewError, Failure, PolicyError};
use crate::host::{BeforeRetry, HostRequest, Router};

/// Attempt budget used when nothing else is configured.
pub const DEFAULT_ATTEMPTS: usize = 3;

/// Per-request override of the attempt budget.
///
/// `Ok(None)` keeps the configured default; `Ok(Some(n))` uses `n` attempts.
pub type ActivateHook =
    Arc<dyn Fn(&Environ, &dyn HostRequest) -> Result<Option<usize>, Failure> + Send + Sync>;

/// Execution policy that retries requests failing with retryable errors.
#[derive(Clone)]
pub struct RetryableExecutionPolicy {
    attempts: usize,
    activate_hook: Option<ActivateHook>,
}

impl fmt::Debug for RetryableExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryableExecutionPolicy")
            .field("attempts", &self.attempts)
            .field("activate_hook", &self.activate_hook.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

impl Default for RetryableExecutionPolicy {
    fn default() -> Self {
        Self { attempts: DEFAULT_ATTEMPTS, activate_hook: None }
    }
}

impl RetryableExecutionPolicy {
    pub fn builder() -> RetryableExecutionPolicyBuilder {
        RetryableExecutionPolicyBuilder::new()
    }

    /// Default attempt budget.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn has_activate_hook(&self) -> bool {
        self.activate_hook.is_some()
    }

    /// Produce a response for the request described by `environ`.
    pub async fn execute<R>(
        &self,
        environ: &mut Environ,
        router: &R,
    ) -> Result<R::Response, PolicyError>
    where
        R: Router,
    {
        let mut request = router.make_request(environ);
        let attempts = self.resolve_attempts(environ, &request)?;

        if attempts != 1 {
            environ.make_body_seekable().await?;
        }

        for number in 0..attempts {
            let mut scope =
                AttemptScope::enter(environ, AttemptState { attempt: number, attempts });

            // later attempts start from a clean request object
            if number > 0 {
                request = router.make_request(&scope);
            }

            match router.invoke_request(&mut scope, &mut request).await {
                Ok(response) => {
                    if let Some(squashed) = request.exception() {
                        if is_error_retryable(&scope, squashed) {
                            debug!(
                                target: "reissue::policy",
                                attempt = number + 1,
                                attempts,
                                squashed = true,
                                error = %squashed,
                                "retrying request"
                            );
                            router.notify_before_retry(&BeforeRetry {
                                request: &request,
                                environ: &*scope,
                                exception: squashed,
                                response: Some(&response),
                            });
                            continue;
                        }
                    }
                    return Ok(response);
                }
                Err(failure) => {
                    if is_error_retryable(&scope, &failure) {
                        debug!(
                            target: "reissue::policy",
                            attempt = number + 1,
                            attempts,
                            squashed = false,
                            error = %failure,
                            "retrying request"
                        );
                        router.notify_before_retry(&BeforeRetry {
                            request: &request,
                            environ: &*scope,
                            exception: &failure,
                            response: None,
                        });
                        continue;
                    }

                    // last-ditch rendering before the failure leaves the policy
                    let rendered =
                        router.invoke_exception_view(&mut scope, &mut request, &failure).await;
                    let failure = match rendered {
                        Ok(response) => return Ok(response),
                        Err(ExceptionViewError::NotFound) => failure,
                        Err(ExceptionViewError::Failed(other)) => other,
                    };
                    if attempts > 1 && number + 1 == attempts {
                        warn!(
                            target: "reissue::policy",
                            attempts,
                            error = %failure,
                            "request failed on its last attempt"
                        );
                    }
                    return Err(PolicyError::Failure(failure));
                }
            }
        }

        // the last attempt never classifies retryable, so it always returns above
        unreachable!("retry loop should have returned; this indicates a logic bug")
    }

    fn resolve_attempts<Req>(&self, environ: &Environ, request: &Req) -> Result<usize, PolicyError>
    where
        Req: HostRequest,
    {
        let Some(hook) = &self.activate_hook else {
            return Ok(self.attempts);
        };
        let request: &dyn HostRequest = request;
        match hook(environ, request)? {
            None => Ok(self.attempts),
            Some(0) => Err(PolicyError::InvalidAttempts(0)),
            Some(attempts) => {
                debug!(
                    target: "reissue::policy",
                    attempts,
                    default = self.attempts,
                    "activation hook overrode attempt budget"
                );
                Ok(attempts)
            }
        }
    }
}

/// Keeps the attempt state in the environment for the lifetime of one attempt.
struct AttemptScope<'a> {
    environ: &'a mut Environ,
}

impl<'a> AttemptScope<'a> {
    fn enter(environ: &'a mut Environ, state: AttemptState) -> Self {
        environ.set_attempt_state(state);
        Self { environ }
    }
}

impl Deref for AttemptScope<'_> {
    type Target = Environ;

    fn deref(&self) -> &Environ {
        self.environ
    }
}

impl DerefMut for AttemptScope<'_> {
    fn deref_mut(&mut self) -> &mut Environ {
        self.environ
    }
}

impl Drop for AttemptScope<'_> {
    fn drop(&mut self) {
        self.environ.clear_attempt_state();
    }
}

/// Builder for `RetryableExecutionPolicy`.
#[derive(Clone)]
pub struct RetryableExecutionPolicyBuilder {
    attempts: usize,
    activate_hook: Option<ActivateHook>,
}

/// Errors produced while building a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// `attempts` must be > 0.
    InvalidAttempts(usize),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::InvalidAttempts(n) => write!(f, "attempts must be > 0 (got {})", n),
        }
    }
}

impl std::error::Error for BuildError {}

impl RetryableExecutionPolicyBuilder {
    pub fn new() -> Self {
        Self { attempts: DEFAULT_ATTEMPTS, activate_hook: None }
    }

    /// Set the default attempt budget (initial + retries). Must be > 0.
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// Install a per-request override of the attempt budget.
    pub fn activate_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Environ, &dyn HostRequest) -> Result<Option<usize>, Failure> + Send + Sync + 'static,
    {
        self.activate_hook = Some(Arc::new(hook));
        self
    }

    /// Install an already shared hook.
    pub fn shared_activate_hook(mut self, hook: Option<ActivateHook>) -> Self {
        self.activate_hook = hook;
        self
    }

    pub fn build(self) -> Result<RetryableExecutionPolicy, BuildError> {
        if self.attempts == 0 {
            return Err(BuildError::InvalidAttempts(0));
        }
        Ok(RetryableExecutionPolicy { attempts: self.attempts, activate_hook: self.activate_hook })
    }
}

impl Default for RetryableExecutionPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Tower service running a router behind the retry policy.
///
/// Each call owns its environment; use [`RetryableExecutionPolicy::execute`]
/// directly to keep the environment after the call.
pub struct ExecutionService<R> {
    router: Arc<R>,
    policy: RetryableExecutionPolicy,
}

impl<R> Clone for ExecutionService<R> {
    fn clone(&self) -> Self {
        Self { router: self.router.clone(), policy: self.policy.clone() }
    }
}

impl<R> ExecutionService<R> {
    pub fn new(router: Arc<R>, policy: RetryableExecutionPolicy) -> Self {
        Self { router, policy }
    }

    pub fn router(&self) -> &R {
        &self.router
    }
}

impl<R> Service<Environ> for ExecutionService<R>
where
    R: Router + 'static,
    R::Response: 'static,
{
    type Response = R::Response;
    type Error = PolicyError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut environ: Environ) -> Self::Future {
        let router = self.router.clone();
        let policy = self.policy.clone();
        Box::pin(async move { policy.execute(&mut environ, &*router).await })
    }
}

impl<R> Layer<R> for RetryableExecutionPolicy {
    type Service = ExecutionService<R>;

    fn layer(&self, router: R) -> Self::Service {
        ExecutionService::new(Arc::new(router), self.clone())
    }
}
