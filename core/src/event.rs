//! The owner-thread event dispatcher seam and the events it delivers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use marshal_types::{CallIndex, CallbackToken, ContextId, EventName, MarshalError};

/// Callback run on the owner thread with the index of a pending call.
pub type NotifyHandler = Arc<dyn Fn(CallIndex) + Send + Sync + 'static>;

/// The run-loop collaborator that owns the owner thread.
///
/// Implementations must run every registered callback on the owner thread
/// and deliver notifications in the order `notify` was called, behind any
/// owner-thread work already pending.
pub trait EventDispatcher: Send + Sync {
    /// The thread that runs callbacks.
    fn owner_thread(&self) -> ThreadId;

    fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner_thread()
    }

    /// Register `handler` for `context`. The returned token is attached to
    /// symbolic events with [`EventDispatcher::bind`].
    fn register_callback(&self, context: ContextId, handler: NotifyHandler) -> CallbackToken;

    /// Route `event` on `context` to the callback behind `token`, replacing
    /// any previous binding.
    fn bind(&self, context: ContextId, event: &EventName, token: CallbackToken);

    /// Queue a notification for `event` on `context` carrying `index`.
    fn notify(
        &self,
        context: ContextId,
        event: &EventName,
        index: CallIndex,
    ) -> Result<(), MarshalError>;
}

/// A scheduled event as seen by an owner-thread handler.
pub struct Event {
    data: Box<dyn Any + Send>,
    context: ContextId,
    index: CallIndex,
}

impl Event {
    pub(crate) fn new(data: Box<dyn Any + Send>, context: ContextId, index: CallIndex) -> Self {
        Self {
            data,
            context,
            index,
        }
    }

    /// The context the event was scheduled on.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    #[must_use]
    pub fn index(&self) -> CallIndex {
        self.index
    }

    /// Borrow the data if it is a `T`.
    #[must_use]
    pub fn data_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    /// Take the data as a `T`, or get the event back unchanged.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        let Self {
            data,
            context,
            index,
        } = self;
        match data.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(data) => Err(Self {
                data,
                context,
                index,
            }),
        }
    }

    #[must_use]
    pub fn into_data(self) -> Box<dyn Any + Send> {
        self.data
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("context", &self.context)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
