//! A minimal cooperative run-loop that implements [`EventDispatcher`].
//!
//! The thread that creates the [`RunLoop`] becomes the owner thread. Other
//! threads reach it through cloned [`LoopHandle`]s; notifications travel over
//! an unbounded channel, so they are handled in exactly the order they were
//! sent, behind anything already queued.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;

use marshal_types::{CallIndex, CallbackToken, ContextId, EventName, MarshalError};

use crate::event::{EventDispatcher, NotifyHandler};
use crate::lock_unpoisoned;

enum LoopMsg {
    Notify {
        context: ContextId,
        event: EventName,
        index: CallIndex,
    },
    Quit,
}

struct LoopShared {
    owner: ThreadId,
    tx: mpsc::UnboundedSender<LoopMsg>,
    callbacks: Mutex<HashMap<CallbackToken, NotifyHandler>>,
    bindings: Mutex<HashMap<(ContextId, EventName), CallbackToken>>,
    next_token: AtomicU64,
}

/// Thread-safe handle to a [`RunLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// Ask the loop to stop once everything queued before this call has
    /// been handled.
    pub fn quit(&self) {
        if self.shared.tx.send(LoopMsg::Quit).is_err() {
            tracing::debug!("Quit sent to a closed run-loop");
        }
    }

    fn handler_for(&self, context: ContextId, event: EventName) -> Option<NotifyHandler> {
        let token = lock_unpoisoned(&self.shared.bindings)
            .get(&(context, event))
            .copied()?;
        lock_unpoisoned(&self.shared.callbacks).get(&token).cloned()
    }
}

impl EventDispatcher for LoopHandle {
    fn owner_thread(&self) -> ThreadId {
        self.shared.owner
    }

    fn register_callback(&self, context: ContextId, handler: NotifyHandler) -> CallbackToken {
        let token = CallbackToken::new(self.shared.next_token.fetch_add(1, Ordering::Relaxed));
        lock_unpoisoned(&self.shared.callbacks).insert(token, handler);
        tracing::trace!(context = %context, token = %token, "Registered callback");
        token
    }

    fn bind(&self, context: ContextId, event: &EventName, token: CallbackToken) {
        let previous =
            lock_unpoisoned(&self.shared.bindings).insert((context, event.clone()), token);
        if let Some(previous) = previous
            && previous != token
        {
            lock_unpoisoned(&self.shared.callbacks).remove(&previous);
        }
    }

    fn notify(
        &self,
        context: ContextId,
        event: &EventName,
        index: CallIndex,
    ) -> Result<(), MarshalError> {
        self.shared
            .tx
            .send(LoopMsg::Notify {
                context,
                event: event.clone(),
                index,
            })
            .map_err(|_| MarshalError::LoopClosed)
    }
}

/// Owner-thread run-loop. Not `Send`: it stays on the thread that built it.
pub struct RunLoop {
    rx: mpsc::UnboundedReceiver<LoopMsg>,
    handle: LoopHandle,
    quit: bool,
    _owner: PhantomData<*const ()>,
}

impl RunLoop {
    /// Create a loop owned by the current thread.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = LoopShared {
            owner: thread::current().id(),
            tx,
            callbacks: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        };
        Self {
            rx,
            handle: LoopHandle {
                shared: Arc::new(shared),
            },
            quit: false,
            _owner: PhantomData,
        }
    }

    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Whether a quit request has been handled.
    #[must_use]
    pub fn is_quit(&self) -> bool {
        self.quit
    }

    /// Handle up to `budget` queued notifications without blocking.
    ///
    /// Returns how many were handled. Stops early at a quit request.
    pub fn poll(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget && !self.quit {
            match self.rx.try_recv() {
                Ok(msg) => {
                    self.handle_msg(msg);
                    count += 1;
                }
                Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {
                    break;
                }
            }
        }
        count
    }

    /// Block handling notifications until [`LoopHandle::quit`] is processed.
    pub fn run(&mut self) {
        self.quit = false;
        tracing::debug!("Run-loop started");
        while !self.quit {
            match self.rx.blocking_recv() {
                Some(msg) => self.handle_msg(msg),
                None => break,
            }
        }
        tracing::debug!("Run-loop stopped");
    }

    /// Block handling notifications until `done` holds or a quit request is
    /// processed. `done` is checked before waiting and after every message.
    ///
    /// Returns whether `done` was satisfied.
    pub fn run_until(&mut self, mut done: impl FnMut() -> bool) -> bool {
        self.quit = false;
        loop {
            if done() {
                return true;
            }
            if self.quit {
                return false;
            }
            match self.rx.blocking_recv() {
                Some(msg) => self.handle_msg(msg),
                None => return done(),
            }
        }
    }

    fn handle_msg(&mut self, msg: LoopMsg) {
        match msg {
            LoopMsg::Quit => self.quit = true,
            LoopMsg::Notify {
                context,
                event,
                index,
            } => match self.handle.handler_for(context, event.clone()) {
                // Invoked with no loop lock held; handlers may bind or notify.
                Some(handler) => handler(index),
                None => {
                    tracing::warn!(
                        context = %context,
                        event = %event,
                        index = %index,
                        "No handler bound; dropping notification"
                    );
                }
            },
        }
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}
