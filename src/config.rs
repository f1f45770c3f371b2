//! Configuration-time registration with the host.
//!
//! [`include`] reads the retry settings, installs the execution policy and
//! registers the two view predicates on anything implementing [`Configurator`].
//!
//! Settings:
//! - `retry.attempts`: default attempt budget. Missing, `null`, `false`, `0`
//!   and `""` fall back to 3; integers and numeric strings are accepted. The
//!   coerced value is written back.
//! - `retry.activate_hook`: name of a hook registered with the configurator.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::environ::Environ;
use crate::error::{ConfigError, Failure};
use crate::host::HostRequest;
use crate::policy::{ActivateHook, RetryableExecutionPolicy, DEFAULT_ATTEMPTS};
use crate::predicate::{
    LastAttemptPredicate, PredicateFactory, RetryableErrorPredicate, ViewPredicate,
    LAST_RETRY_ATTEMPT, RETRYABLE_ERROR,
};

/// Settings key for the default attempt budget.
pub const ATTEMPTS_KEY: &str = "retry.attempts";
/// Settings key for the activation hook name.
pub const ACTIVATE_HOOK_KEY: &str = "retry.activate_hook";

/// Host settings mapping.
pub type Settings = Map<String, Value>;

/// Retry settings after coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub attempts: usize,
    pub activate_hook: Option<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { attempts: DEFAULT_ATTEMPTS, activate_hook: None }
    }
}

impl RetrySettings {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            attempts: coerce_attempts(settings.get(ATTEMPTS_KEY))?,
            activate_hook: coerce_hook(settings.get(ACTIVATE_HOOK_KEY))?,
        })
    }
}

fn coerce_attempts(value: Option<&Value>) -> Result<usize, ConfigError> {
    let invalid = |v: &Value| ConfigError::InvalidAttempts(v.to_string());
    let parsed = match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => return Ok(DEFAULT_ATTEMPTS),
        Some(Value::Bool(true)) => 1,
        Some(v @ Value::Number(n)) => n.as_i64().ok_or_else(|| invalid(v))?,
        Some(Value::String(s)) if s.is_empty() => return Ok(DEFAULT_ATTEMPTS),
        Some(v @ Value::String(s)) => s.trim().parse::<i64>().map_err(|_| invalid(v))?,
        Some(v) => return Err(invalid(v)),
    };
    match parsed {
        // a literal zero is falsy and means "use the default"
        0 if matches!(value, Some(Value::Number(_))) => Ok(DEFAULT_ATTEMPTS),
        n if n >= 1 => usize::try_from(n).map_err(|_| ConfigError::InvalidAttempts(n.to_string())),
        n => Err(ConfigError::InvalidAttempts(n.to_string())),
    }
}

fn coerce_hook(value: Option<&Value>) -> Result<Option<String>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(ConfigError::InvalidHook(other.to_string())),
    }
}

/// Host configuration surface used by [`include`].
pub trait Configurator {
    fn settings(&self) -> &Settings;

    fn settings_mut(&mut self) -> &mut Settings;

    /// Resolve a hook name to a callable.
    fn resolve_hook(&self, name: &str) -> Result<ActivateHook, ConfigError>;

    fn set_execution_policy(&mut self, policy: RetryableExecutionPolicy);

    fn add_view_predicate(&mut self, name: &'static str, factory: PredicateFactory);
}

/// Activate the retry execution policy on `config`.
///
/// Installs a [`RetryableExecutionPolicy`] built from the settings and registers
/// the `last_retry_attempt` and `retryable_error` view predicates.
pub fn include<C>(config: &mut C) -> Result<RetrySettings, ConfigError>
where
    C: Configurator + ?Sized,
{
    let retry = RetrySettings::from_settings(config.settings())?;
    let hook = match &retry.activate_hook {
        Some(name) => Some(config.resolve_hook(name)?),
        None => None,
    };
    let policy = RetryableExecutionPolicy::builder()
        .attempts(retry.attempts)
        .shared_activate_hook(hook)
        .build()
        .map_err(|e| ConfigError::InvalidAttempts(e.to_string()))?;

    // settings change only once nothing else can fail
    config.settings_mut().insert(ATTEMPTS_KEY.to_string(), Value::from(retry.attempts));

    info!(
        target: "reissue::config",
        attempts = retry.attempts,
        activate_hook = retry.activate_hook.as_deref().unwrap_or("<none>"),
        "retry execution policy installed"
    );
    config.set_execution_policy(policy);
    config.add_view_predicate(LAST_RETRY_ATTEMPT, LastAttemptPredicate::factory);
    config.add_view_predicate(RETRYABLE_ERROR, RetryableErrorPredicate::factory);
    Ok(retry)
}

/// In-memory [`Configurator`] with a table of named hooks.
#[derive(Default)]
pub struct BasicConfigurator {
    settings: Settings,
    hooks: HashMap<String, ActivateHook>,
    policy: Option<RetryableExecutionPolicy>,
    predicates: BTreeMap<&'static str, PredicateFactory>,
}

impl fmt::Debug for BasicConfigurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicConfigurator")
            .field("settings", &self.settings)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BasicConfigurator {
    pub fn new(settings: Settings) -> Self {
        Self { settings, ..Self::default() }
    }

    /// Make `hook` resolvable under `name`.
    pub fn register_hook<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn(&Environ, &dyn HostRequest) -> Result<Option<usize>, Failure> + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(hook));
        self
    }

    /// The installed execution policy, once [`include`] has run.
    pub fn execution_policy(&self) -> Option<&RetryableExecutionPolicy> {
        self.policy.as_ref()
    }

    /// Build the predicate registered under `name` from its declared value.
    pub fn view_predicate(
        &self,
        name: &str,
        value: &Value,
    ) -> Result<Box<dyn ViewPredicate>, ConfigError> {
        let factory =
            self.predicates.get(name).ok_or_else(|| ConfigError::UnknownPredicate(name.to_string()))?;
        factory(value)
    }
}

impl Configurator for BasicConfigurator {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    fn resolve_hook(&self, name: &str) -> Result<ActivateHook, ConfigError> {
        self.hooks.get(name).cloned().ok_or_else(|| ConfigError::UnknownHook(name.to_string()))
    }

    fn set_execution_policy(&mut self, policy: RetryableExecutionPolicy) {
        self.policy = Some(policy);
    }

    fn add_view_predicate(&mut self, name: &'static str, factory: PredicateFactory) {
        self.predicates.insert(name, factory);
    }
}
