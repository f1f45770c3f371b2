//! Seams to the host framework.
//!
//! The policy never parses requests, dispatches views or renders errors itself;
//! it drives a [`Router`] supplied by the host.

use std::any::Any;
use std::fmt;

use async_trait::async_trait;

use crate::environ::Environ;
use crate::error::{ExceptionViewError, Failure};

/// Per-attempt request object built by the host.
pub trait HostRequest: Send + Sync + 'static {
    /// Failure that an exception view caught and rendered during this attempt.
    fn exception(&self) -> Option<&Failure>;

    /// Access to the concrete request, for activation hooks and subscribers.
    fn as_any(&self) -> &dyn Any;
}

/// Host dispatch entry points used by the retry loop.
#[async_trait]
pub trait Router: Send + Sync {
    type Request: HostRequest;
    type Response: Send + Sync;

    /// Build a fresh request object from the environment.
    fn make_request(&self, environ: &Environ) -> Self::Request;

    /// Run the request through the host's view pipeline.
    async fn invoke_request(
        &self,
        environ: &mut Environ,
        request: &mut Self::Request,
    ) -> Result<Self::Response, Failure>;

    /// Render `failure` through the host's exception views.
    async fn invoke_exception_view(
        &self,
        environ: &mut Environ,
        request: &mut Self::Request,
        failure: &Failure,
    ) -> Result<Self::Response, ExceptionViewError>;

    /// Dispatch a [`BeforeRetry`] notification to the host's subscribers.
    fn notify_before_retry(&self, _event: &BeforeRetry<'_, Self::Request, Self::Response>) {}
}

/// Emitted once per abandoned attempt, before the next request is built.
pub struct BeforeRetry<'a, Req, Resp> {
    /// The request being discarded.
    pub request: &'a Req,
    /// Environment of the request, still carrying the attempt state.
    pub environ: &'a Environ,
    /// Failure that triggered the retry.
    pub exception: &'a Failure,
    /// Response rendered by an exception view, when the failure was squashed.
    pub response: Option<&'a Resp>,
}

impl<Req, Resp> BeforeRetry<'_, Req, Resp> {
    /// Whether the failure had already been rendered into a response.
    pub fn was_squashed(&self) -> bool {
        self.response.is_some()
    }
}

impl<Req, Resp> fmt::Debug for BeforeRetry<'_, Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeforeRetry")
            .field("attempt", &self.environ.attempt_state())
            .field("exception", &self.exception)
            .field("squashed", &self.was_squashed())
            .finish()
    }
}

impl<Req, Resp> fmt::Display for BeforeRetry<'_, Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.environ.attempt_state() {
            Some(state) => write!(
                f,
                "BeforeRetry(#{}/{}, squashed={}, error={})",
                state.attempt + 1,
                state.attempts,
                self.was_squashed(),
                self.exception
            ),
            None => write!(f, "BeforeRetry(squashed={}, error={})", self.was_squashed(), self.exception),
        }
    }
}
