//! Notification bridge between the generation lock and the event dispatcher.

use std::sync::{Arc, MutexGuard};

use marshal_types::{CallIndex, ContextId, EventName, MarshalError};

use crate::event::EventDispatcher;
use crate::queue::Sequencer;

pub(crate) struct NotificationBridge {
    dispatcher: Arc<dyn EventDispatcher>,
}

impl NotificationBridge {
    pub(crate) fn new(dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub(crate) fn dispatcher(&self) -> &Arc<dyn EventDispatcher> {
        &self.dispatcher
    }

    /// Notify the owner thread of `index`.
    ///
    /// Borrowing the generation guard ties every notification to the
    /// critical section that issued its index, so notification order always
    /// equals queue order.
    pub(crate) fn notify(
        &self,
        _generation: &MutexGuard<'_, Sequencer>,
        context: ContextId,
        event: &EventName,
        index: CallIndex,
    ) -> Result<(), MarshalError> {
        self.dispatcher.notify(context, event, index)
    }
}
