//! In-memory host used by the integration tests.
//!
//! Views and exception views are selected like a typical host would: the
//! candidates with the most predicates are tried first, and the first one whose
//! predicates all match wins.
#![allow(dead_code)]

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reissue::{
    include, AttemptState, BasicConfigurator, BeforeRetry, ConfigError, Environ,
    ExceptionViewError, Failure, HostRequest, PolicyError, RetryableExecutionPolicy, Router,
    Settings, ViewPredicate,
};
use serde_json::Value;

pub type Handler = Arc<dyn Fn(&Environ) -> Result<String, Failure> + Send + Sync>;
pub type ExceptionHandler = Arc<dyn Fn(&Failure) -> Result<String, Failure> + Send + Sync>;

/// Raised when no view matches the request.
#[derive(Debug)]
pub struct HttpNotFound;

impl fmt::Display for HttpNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "404 Not Found")
    }
}

impl std::error::Error for HttpNotFound {}

/// Plain application error that is never retryable unless marked.
#[derive(Debug)]
pub struct AppError(pub &'static str);

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AppError {}

/// Shared, ordered log of what the handlers did.
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn push(&self, call: &str) {
        self.0.lock().unwrap().push(call.to_string());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// What a `BeforeRetry` subscriber saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    pub exception: String,
    pub response: Option<String>,
    pub attempt: Option<AttemptState>,
}

pub struct TestRequest {
    exception: Option<Failure>,
}

impl HostRequest for TestRequest {
    fn exception(&self) -> Option<&Failure> {
        self.exception.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct View {
    predicates: Vec<Box<dyn ViewPredicate>>,
    handler: Handler,
}

struct ExceptionView {
    context: Option<fn(&Failure) -> bool>,
    predicates: Vec<Box<dyn ViewPredicate>>,
    handler: ExceptionHandler,
}

pub struct TestApp {
    config: BasicConfigurator,
    views: Vec<View>,
    exception_views: Vec<ExceptionView>,
    requests_made: AtomicUsize,
    retries: Mutex<Vec<RetryRecord>>,
    read_bodies: bool,
}

pub fn settings(value: Value) -> Settings {
    match value {
        Value::Object(map) => map,
        other => panic!("settings must be an object, got {}", other),
    }
}

impl TestApp {
    /// Run `include` on `config` and build an app around it.
    pub fn new(mut config: BasicConfigurator) -> Self {
        include(&mut config).expect("include");
        Self {
            config,
            views: Vec::new(),
            exception_views: Vec::new(),
            requests_made: AtomicUsize::new(0),
            retries: Mutex::new(Vec::new()),
            read_bodies: false,
        }
    }

    /// Read the request payload before dispatching to a view, like a host
    /// that parses form bodies up front.
    pub fn read_bodies(&mut self) {
        self.read_bodies = true;
    }

    pub fn with_attempts(attempts: usize) -> Self {
        Self::new(BasicConfigurator::new(settings(serde_json::json!({ "retry.attempts": attempts }))))
    }

    fn predicates(&self, declared: &[(&str, Value)]) -> Result<Vec<Box<dyn ViewPredicate>>, ConfigError> {
        declared.iter().map(|(name, value)| self.config.view_predicate(name, value)).collect()
    }

    pub fn add_view<F>(&mut self, declared: &[(&str, Value)], handler: F) -> Result<(), ConfigError>
    where
        F: Fn(&Environ) -> Result<String, Failure> + Send + Sync + 'static,
    {
        let predicates = self.predicates(declared)?;
        self.views.push(View { predicates, handler: Arc::new(handler) });
        self.views.sort_by_key(|v| std::cmp::Reverse(v.predicates.len()));
        Ok(())
    }

    pub fn add_exception_view<F>(
        &mut self,
        context: Option<fn(&Failure) -> bool>,
        declared: &[(&str, Value)],
        handler: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&Failure) -> Result<String, Failure> + Send + Sync + 'static,
    {
        let predicates = self.predicates(declared)?;
        self.exception_views.push(ExceptionView { context, predicates, handler: Arc::new(handler) });
        self.exception_views.sort_by_key(|v| {
            std::cmp::Reverse(v.predicates.len() + usize::from(v.context.is_some()))
        });
        Ok(())
    }

    pub fn policy(&self) -> RetryableExecutionPolicy {
        self.config.execution_policy().cloned().expect("policy installed by include")
    }

    pub async fn get(&self, environ: &mut Environ) -> Result<String, PolicyError> {
        self.policy().execute(environ, self).await
    }

    pub fn requests_made(&self) -> usize {
        self.requests_made.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> Vec<RetryRecord> {
        self.retries.lock().unwrap().clone()
    }

    fn render_exception(&self, environ: &Environ, failure: &Failure) -> Option<Result<String, Failure>> {
        self.exception_views
            .iter()
            .find(|view| {
                view.context.map_or(true, |accepts| accepts(failure))
                    && view.predicates.iter().all(|p| p.matches(environ, Some(failure)))
            })
            .map(|view| (view.handler)(failure))
    }
}

#[async_trait]
impl Router for TestApp {
    type Request = TestRequest;
    type Response = String;

    fn make_request(&self, _environ: &Environ) -> TestRequest {
        self.requests_made.fetch_add(1, Ordering::SeqCst);
        TestRequest { exception: None }
    }

    async fn invoke_request(
        &self,
        environ: &mut Environ,
        request: &mut TestRequest,
    ) -> Result<String, Failure> {
        if self.read_bodies {
            environ.read_body().await.map_err(Failure::new)?;
        }
        let result = match self
            .views
            .iter()
            .find(|view| view.predicates.iter().all(|p| p.matches(environ, None)))
        {
            Some(view) => (view.handler)(environ),
            None => Err(Failure::new(HttpNotFound)),
        };

        match result {
            Ok(body) => Ok(body),
            Err(failure) => match self.render_exception(environ, &failure) {
                Some(Ok(body)) => {
                    request.exception = Some(failure);
                    Ok(body)
                }
                Some(Err(other)) => Err(other),
                None => Err(failure),
            },
        }
    }

    async fn invoke_exception_view(
        &self,
        environ: &mut Environ,
        _request: &mut TestRequest,
        failure: &Failure,
    ) -> Result<String, ExceptionViewError> {
        match self.render_exception(environ, failure) {
            Some(Ok(body)) => Ok(body),
            Some(Err(other)) => Err(ExceptionViewError::Failed(other)),
            None => Err(ExceptionViewError::NotFound),
        }
    }

    fn notify_before_retry(&self, event: &BeforeRetry<'_, TestRequest, String>) {
        self.retries.lock().unwrap().push(RetryRecord {
            exception: event.exception.to_string(),
            response: event.response.cloned(),
            attempt: event.environ.attempt_state(),
        });
    }
}
