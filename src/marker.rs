//! Retryable markers for failures and error types.
//!
//! A failure is retryable when it wraps [`RetryableError`](crate::RetryableError),
//! when the instance was tagged, or when its concrete error type was registered
//! here. Type registration is process-wide and affects every later instance.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::{OnceLock, RwLock};

use tracing::debug;

use crate::error::{Failure, MarkError};

fn registry() -> &'static RwLock<HashSet<TypeId>> {
    static MARKED: OnceLock<RwLock<HashSet<TypeId>>> = OnceLock::new();
    MARKED.get_or_init(|| RwLock::new(HashSet::new()))
}

/// Descriptor for an error type, used to mark the type rather than an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorType {
    id: TypeId,
    name: &'static str,
}

impl ErrorType {
    pub fn of<E: std::error::Error + 'static>() -> Self {
        Self { id: TypeId::of::<E>(), name: std::any::type_name::<E>() }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Register `E` as retryable for all present and future failures wrapping it.
pub fn mark_type_retryable<E: std::error::Error + 'static>() {
    register(ErrorType::of::<E>());
}

/// Mark a failure instance or an [`ErrorType`] as retryable.
///
/// Any other value is rejected with [`MarkError::InvalidArgument`].
pub fn mark_error_retryable<T: Any>(target: &mut T) -> Result<(), MarkError> {
    let any = target as &mut dyn Any;
    if let Some(failure) = any.downcast_mut::<Failure>() {
        failure.mark_retryable();
        return Ok(());
    }
    if let Some(error_type) = any.downcast_ref::<ErrorType>() {
        register(*error_type);
        return Ok(());
    }
    Err(MarkError::InvalidArgument(std::any::type_name::<T>()))
}

/// Whether the failure's concrete type was registered as retryable.
pub fn is_type_marked(failure: &Failure) -> bool {
    let set = registry().read().expect("retryable type registry poisoned");
    set.contains(&failure.error_type_id())
}

fn register(error_type: ErrorType) {
    let mut set = registry().write().expect("retryable type registry poisoned");
    if set.insert(error_type.id) {
        debug!(target: "reissue::marker", error_type = error_type.name, "error type marked retryable");
    }
}
