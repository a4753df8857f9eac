//! Call dispatch policies.
//!
//! A [`Dispatcher`] turns a bound call into scheduled owner-thread work and
//! decides what the caller gets back: nothing ([`FireAndForget`]) or the
//! call's result ([`Synchronous`]).

use std::sync::Arc;

use marshal_types::{CallError, ContextId, TargetError};

use crate::handlers;
use crate::marshal::Marshal;

/// Receives errors raised by fire-and-forget calls, on the owner thread.
pub type ExceptionHandler = Arc<dyn Fn(TargetError) + Send + Sync + 'static>;

pub trait Dispatcher: Send + Sync {
    /// What the calling thread receives for a call returning `Result<R, E>`.
    type Output<R, E>;

    fn dispatch<R, E, F>(
        &self,
        marshal: &Marshal,
        context: ContextId,
        call: F,
    ) -> Self::Output<R, E>
    where
        F: FnOnce() -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<TargetError> + Send + 'static;
}

/// Queue the call and return immediately.
///
/// Calls from the owner thread are queued too, so they stay ordered with
/// everything else already scheduled.
#[derive(Clone, Default)]
pub struct FireAndForget {
    on_error: Option<ExceptionHandler>,
}

impl FireAndForget {
    #[must_use]
    pub fn new() -> Self {
        Self { on_error: None }
    }

    #[must_use]
    pub fn with_handler(on_error: ExceptionHandler) -> Self {
        Self {
            on_error: Some(on_error),
        }
    }

    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.on_error.is_some()
    }
}

impl Dispatcher for FireAndForget {
    type Output<R, E> = ();

    fn dispatch<R, E, F>(
        &self,
        marshal: &Marshal,
        context: ContextId,
        call: F,
    ) -> Self::Output<R, E>
    where
        F: FnOnce() -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<TargetError> + Send + 'static,
    {
        let payload = handlers::mute_payload(call, self.on_error.clone());
        if let Err(err) = marshal.schedule_call(context, payload) {
            tracing::warn!(context = %context, "Dropping mute call: {err}");
        }
    }
}

/// Run the call on the owner thread and block until it returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synchronous;

impl Dispatcher for Synchronous {
    type Output<R, E> = Result<R, CallError<E>>;

    fn dispatch<R, E, F>(
        &self,
        marshal: &Marshal,
        context: ContextId,
        call: F,
    ) -> Result<R, CallError<E>>
    where
        F: FnOnce() -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<TargetError> + Send + 'static,
    {
        // The owner thread would wait on itself forever; run in place.
        if marshal.is_owner_thread() {
            tracing::trace!(context = %context, "Running synchronous call in place");
            return call().map_err(CallError::Target);
        }

        let cell = marshal.return_cell();
        cell.arm();
        let scheduled =
            marshal.schedule_call(context, handlers::sync_payload(Arc::clone(&cell), call));
        if let Err(err) = scheduled {
            // The retracted payload already published `Abandoned`; clear it.
            let _ = cell.wait_and_consume();
            return Err(CallError::Marshal(err));
        }
        let (reply, err_flag) = cell.wait_and_consume();
        handlers::decode_reply(reply, err_flag)
    }
}
