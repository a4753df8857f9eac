//! The marshalling context: one per owner thread.

use std::any::Any;
use std::sync::{Arc, Mutex};

use marshal_config::MarshalSection;
use marshal_types::{CallIndex, CallbackToken, ContextId, EventName, MarshalError};

use crate::bridge::NotificationBridge;
use crate::cell::{ReturnCell, ReturnCells};
use crate::event::{Event, EventDispatcher, NotifyHandler};
use crate::handlers::CallPayload;
use crate::lock_unpoisoned;
use crate::proxy::ProxyBuilder;
use crate::queue::{Payload, PendingCallQueue, Sequencer};

/// Engine settings derived from the `[marshal]` config section.
#[derive(Debug, Clone)]
pub struct MarshalOptions {
    pub call_event: EventName,
    /// Warn once each time the pending queue grows past this depth.
    /// 0 disables the warning.
    pub queue_warn_depth: usize,
}

impl Default for MarshalOptions {
    fn default() -> Self {
        Self::from_config(&MarshalSection::default())
    }
}

impl MarshalOptions {
    #[must_use]
    pub fn from_config(section: &MarshalSection) -> Self {
        Self {
            call_event: section.call_event.clone(),
            queue_warn_depth: section.queue_warn_depth,
        }
    }
}

struct Shared {
    /// Generation lock. Held across "issue index + enqueue + notify".
    generation: Mutex<Sequencer>,
    queue: PendingCallQueue,
    cells: ReturnCells,
    bridge: NotificationBridge,
    options: MarshalOptions,
}

/// Owns the sequencer, pending queue and return cells for one owner thread.
///
/// Cheap to clone; clones share state. Proxies and worker threads hold
/// clones.
#[derive(Clone)]
pub struct Marshal {
    shared: Arc<Shared>,
}

impl Marshal {
    #[must_use]
    pub fn new(dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self::with_options(dispatcher, MarshalOptions::default())
    }

    #[must_use]
    pub fn with_options(dispatcher: Arc<dyn EventDispatcher>, options: MarshalOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                generation: Mutex::new(Sequencer::new()),
                queue: PendingCallQueue::new(),
                cells: ReturnCells::new(),
                bridge: NotificationBridge::new(dispatcher),
                options,
            }),
        }
    }

    #[must_use]
    pub fn options(&self) -> &MarshalOptions {
        &self.shared.options
    }

    #[must_use]
    pub fn is_owner_thread(&self) -> bool {
        self.shared.bridge.dispatcher().is_owner_thread()
    }

    /// Enqueue `data` and notify `event` on `context`. The bound handler
    /// receives it as an [`Event`] on the owner thread.
    pub fn schedule_event<T>(
        &self,
        context: ContextId,
        event: &EventName,
        data: T,
    ) -> Result<CallIndex, MarshalError>
    where
        T: Any + Send,
    {
        self.schedule(context, event, Box::new(data))
    }

    pub(crate) fn schedule_call(
        &self,
        context: ContextId,
        payload: CallPayload,
    ) -> Result<CallIndex, MarshalError> {
        self.schedule(context, &self.shared.options.call_event, Box::new(payload))
    }

    fn schedule(
        &self,
        context: ContextId,
        event: &EventName,
        payload: Payload,
    ) -> Result<CallIndex, MarshalError> {
        let shared = &*self.shared;
        let mut generation = lock_unpoisoned(&shared.generation);
        let index = generation.issue();
        let depth = shared.queue.push(index, payload);
        if let Err(err) = shared.bridge.notify(&generation, context, event, index) {
            let orphan = shared.queue.retract(index);
            drop(generation);
            tracing::warn!(
                index = %index,
                context = %context,
                event = %event,
                "Notification failed: {err}"
            );
            drop(orphan);
            return Err(err);
        }
        drop(generation);

        tracing::debug!(index = %index, context = %context, event = %event, depth, "Scheduled");
        let warn_depth = shared.options.queue_warn_depth;
        if warn_depth > 0 && depth == warn_depth + 1 {
            tracing::warn!(
                depth,
                "Pending call queue exceeded {warn_depth} entries; is the owner loop running?"
            );
        }
        Ok(index)
    }

    /// Route `event` on `context` to `handler`, run on the owner thread.
    ///
    /// The handler holds only a weak reference to this context, so binding
    /// does not keep the marshal alive through the dispatcher.
    pub fn bind<F>(&self, context: ContextId, event: &EventName, handler: F) -> CallbackToken
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let shared = Arc::downgrade(&self.shared);
        let notify: NotifyHandler = Arc::new(move |index: CallIndex| {
            let Some(shared) = shared.upgrade() else {
                tracing::debug!(index = %index, "Notification after marshal was dropped");
                return;
            };
            match shared.queue.take(index) {
                Ok(data) => handler(Event::new(data, context, index)),
                Err(err @ MarshalError::OrderingViolation { .. }) => {
                    tracing::error!(index = %index, context = %context, "{err}");
                }
                Err(err) => {
                    tracing::warn!(index = %index, context = %context, "{err}");
                }
            }
        });

        let dispatcher = self.shared.bridge.dispatcher();
        let token = dispatcher.register_callback(context, notify);
        dispatcher.bind(context, event, token);
        tracing::debug!(context = %context, event = %event, token = %token, "Bound handler");
        token
    }

    /// Bind the call event on `context` and return a builder for proxies
    /// whose calls run there.
    #[must_use]
    pub fn build_proxy(&self, context: ContextId) -> ProxyBuilder {
        ProxyBuilder::new(self.clone(), context)
    }

    pub(crate) fn return_cell(&self) -> Arc<ReturnCell> {
        self.shared.cells.for_current_thread()
    }

    /// Forget the calling thread's return cell now rather than when the
    /// thread exits.
    pub fn release_return_cell(&self) -> bool {
        self.shared.cells.release_current_thread()
    }

    /// Drop every pending call without running it. Blocked synchronous
    /// callers wake with `CallError::Abandoned`.
    pub fn abandon_pending(&self) -> usize {
        let drained = self.shared.queue.drain();
        let count = drained.len();
        if count > 0 {
            tracing::info!(count, "Abandoning pending calls");
        }
        drop(drained);
        count
    }

    /// Calls scheduled but not yet taken by the owner thread.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Total indices issued since creation.
    #[must_use]
    pub fn scheduled_count(&self) -> u64 {
        lock_unpoisoned(&self.shared.generation).issued()
    }

    /// Threads that currently own a return cell.
    #[must_use]
    pub fn return_cell_count(&self) -> usize {
        self.shared.cells.len()
    }
}
