//! Ordered cross-thread call marshalling onto a single owner thread.
//!
//! # Architecture
//!
//! ```text
//! worker thread                         owner thread (RunLoop)
//! -------------                         ----------------------
//! proxy.call(|t| ..)
//!   -> Dispatcher
//!      -> Marshal::schedule  [generation lock]
//!           issue CallIndex
//!           queue.push(index, payload)
//!           bridge.notify(index)  ----->  handler(index)
//!                                           queue.take(index)
//!                                           run payload
//!   (sync) cell.wait_and_consume  <-----    cell.publish(reply)
//! ```
//!
//! Issuing the index, enqueueing and notifying happen under one lock, so
//! the owner thread always sees notifications in queue order. Synchronous
//! calls made on the owner thread itself run in place.

mod bridge;
mod cell;
mod dispatch;
mod event;
mod handlers;
mod marshal;
mod methods;
mod proxy;
mod queue;
mod run_loop;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use dispatch::{Dispatcher, ExceptionHandler, FireAndForget, Synchronous};
pub use event::{Event, EventDispatcher, NotifyHandler};
pub use marshal::{Marshal, MarshalOptions};
pub use methods::{Args, Method, MethodTable, Value};
pub use proxy::{Forwarder, MuteProxy, Proxy, ProxyBuilder, SyncProxy};
pub use run_loop::{LoopHandle, RunLoop};

pub use marshal_types::{
    CallError, CallIndex, CallbackToken, ContextId, EventName, MarshalError, TargetError,
    TargetPanic,
};

/// No user code runs while these locks are held, so a poisoned lock still
/// guards consistent data.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
