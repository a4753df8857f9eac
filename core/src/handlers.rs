//! Owner-thread side of marshalled calls.
//!
//! Every proxy call travels through the queue as a [`CallPayload`]: a boxed
//! zero-argument closure that already knows how to run the target and what
//! to do with its outcome (drop it, hand it to an error handler, or publish
//! it into the caller's return cell).

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use marshal_types::{CallError, MarshalError, TargetError, TargetPanic};

use crate::cell::ReturnCell;
use crate::dispatch::ExceptionHandler;
use crate::event::Event;

pub(crate) struct CallPayload {
    work: Box<dyn FnOnce() + Send>,
}

impl CallPayload {
    fn new(work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            work: Box::new(work),
        }
    }

    fn run(self) {
        (self.work)();
    }
}

/// Handler bound to the call event on every context a proxy targets.
pub(crate) fn handle_call(event: Event) {
    let index = event.index();
    match event.downcast::<CallPayload>() {
        Ok(call) => call.run(),
        Err(event) => {
            tracing::error!(
                context = %event.context(),
                "{}",
                MarshalError::ForeignPayload { index }
            );
        }
    }
}

/// Fire-and-forget payload. Errors and panics go to `on_error` when set and
/// are dropped otherwise.
pub(crate) fn mute_payload<R, E, F>(call: F, on_error: Option<ExceptionHandler>) -> CallPayload
where
    F: FnOnce() -> Result<R, E> + Send + 'static,
    E: Into<TargetError>,
{
    CallPayload::new(move || {
        let err: TargetError = match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(_)) => return,
            Ok(Err(err)) => err.into(),
            Err(payload) => Box::new(TargetPanic::new(panic_payload_to_string(&*payload))),
        };
        match on_error {
            Some(handler) => handler(err),
            None => tracing::debug!(error = %err, "Discarding error from mute call"),
        }
    })
}

/// Synchronous payload. The outcome is published into `cell`; if the
/// payload is dropped unexecuted the caller is woken with
/// [`CallError::Abandoned`].
pub(crate) fn sync_payload<R, E, F>(cell: Arc<ReturnCell>, call: F) -> CallPayload
where
    F: FnOnce() -> Result<R, E> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    let reply = ReplyGuard::<E>::new(cell);
    CallPayload::new(move || match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => reply.publish(Box::new(value), false),
        Ok(Err(err)) => reply.publish(Box::new(CallError::Target(err)), true),
        Err(payload) => {
            let panic = TargetPanic::new(panic_payload_to_string(&*payload));
            tracing::warn!(error = %panic, "Synchronous call panicked on owner thread");
            reply.publish(Box::new(CallError::<E>::Panicked(panic)), true);
        }
    })
}

/// Guarantees exactly one publish into the caller's cell.
struct ReplyGuard<E: Send + 'static> {
    cell: Option<Arc<ReturnCell>>,
    _error: PhantomData<fn() -> E>,
}

impl<E: Send + 'static> ReplyGuard<E> {
    fn new(cell: Arc<ReturnCell>) -> Self {
        Self {
            cell: Some(cell),
            _error: PhantomData,
        }
    }

    fn publish(mut self, value: Box<dyn Any + Send>, err_flag: bool) {
        if let Some(cell) = self.cell.take() {
            cell.publish(value, err_flag);
        }
    }
}

impl<E: Send + 'static> Drop for ReplyGuard<E> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            tracing::debug!("Synchronous call dropped before running");
            cell.publish(Box::new(CallError::<E>::Abandoned), true);
        }
    }
}

/// Decode a reply read out of a return cell on the calling thread.
pub(crate) fn decode_reply<R, E>(
    reply: Option<Box<dyn Any + Send>>,
    err_flag: bool,
) -> Result<R, CallError<E>>
where
    R: 'static,
    E: 'static,
{
    let Some(reply) = reply else {
        return Err(MarshalError::ReplyMismatch.into());
    };
    if err_flag {
        match reply.downcast::<CallError<E>>() {
            Ok(err) => Err(*err),
            Err(_) => Err(MarshalError::ReplyMismatch.into()),
        }
    } else {
        match reply.downcast::<R>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(MarshalError::ReplyMismatch.into()),
        }
    }
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
