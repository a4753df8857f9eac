//! Error types shared by the marshalling engine and its callers.

use std::error;

use thiserror::Error;

use crate::CallIndex;

/// Type-erased error raised by a wrapped target on the owner thread.
pub type TargetError = Box<dyn error::Error + Send + Sync + 'static>;

/// Protocol and plumbing failures of the marshalling engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// The owner thread popped a call scheduled after the one it was told
    /// to run. Notifications were delivered out of order.
    #[error("ordering violation: expected call {expected}, queue head is {found}")]
    OrderingViolation {
        expected: CallIndex,
        found: CallIndex,
    },
    /// The queue ran dry before the notified call was found.
    #[error("call {index} is not pending")]
    MissingCall { index: CallIndex },
    /// The owner-thread run-loop no longer accepts notifications.
    #[error("run-loop is closed")]
    LoopClosed,
    /// A payload delivered on the call event was not a marshalled call.
    #[error("payload of call {index} is not a marshalled call")]
    ForeignPayload { index: CallIndex },
    /// The return cell carried a value of an unexpected type.
    #[error("reply does not match the type the caller is waiting for")]
    ReplyMismatch,
    /// A named method was not found on the wrapped target at call time.
    #[error("target has no method named '{name}'")]
    UnknownMethod { name: String },
    /// A named method was invoked with fewer arguments than it takes.
    #[error("missing argument {position}")]
    MissingArgument { position: usize },
    /// A named method argument had the wrong type.
    #[error("argument {position} is not a {expected}")]
    ArgumentType {
        position: usize,
        expected: &'static str,
    },
}

/// A panic raised by owner-thread work, captured as a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("target panicked: {message}")]
pub struct TargetPanic {
    message: String,
}

impl TargetPanic {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure of a synchronous marshalled call, as seen by the calling thread.
///
/// `Target` holds the very error value the target returned on the owner
/// thread; it is moved across threads, never rebuilt.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("target failed: {0}")]
    Target(E),
    #[error(transparent)]
    Panicked(TargetPanic),
    /// The scheduled call was dropped without running, e.g. because the
    /// run-loop was torn down.
    #[error("call was dropped before the owner thread ran it")]
    Abandoned,
    #[error(transparent)]
    Marshal(MarshalError),
}

impl<E> CallError<E> {
    #[must_use]
    pub fn target(&self) -> Option<&E> {
        match self {
            Self::Target(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_target(self) -> Option<E> {
        match self {
            Self::Target(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }

    pub fn map_target<F, T>(self, f: F) -> CallError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::Target(err) => CallError::Target(f(err)),
            Self::Panicked(panic) => CallError::Panicked(panic),
            Self::Abandoned => CallError::Abandoned,
            Self::Marshal(err) => CallError::Marshal(err),
        }
    }
}

impl<E> From<MarshalError> for CallError<E> {
    fn from(value: MarshalError) -> Self {
        Self::Marshal(value)
    }
}
