//! Sequencer and pending call queue.
//!
//! The sequencer lives behind the generation lock owned by `Marshal`; the
//! queue has its own short lock so the owner thread can dequeue without
//! contending with producers for longer than a pop.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Mutex;

use marshal_types::{CallIndex, MarshalError};

use crate::lock_unpoisoned;

/// Type-erased unit of work or event data waiting for the owner thread.
pub(crate) type Payload = Box<dyn Any + Send>;

/// Issues strictly increasing call indices.
#[derive(Debug)]
pub(crate) struct Sequencer {
    next: CallIndex,
}

impl Sequencer {
    pub(crate) fn new() -> Self {
        Self {
            next: CallIndex::new(0),
        }
    }

    pub(crate) fn issue(&mut self) -> CallIndex {
        let index = self.next;
        self.next = index.next();
        index
    }

    /// Number of indices handed out so far.
    pub(crate) fn issued(&self) -> u64 {
        self.next.value()
    }
}

struct ScheduledCall {
    index: CallIndex,
    payload: Payload,
}

#[derive(Default)]
struct Entries {
    calls: VecDeque<ScheduledCall>,
    /// Highest index removed by `drain`. Notifications still in flight for
    /// those calls are missing, not out of order.
    drained_through: Option<CallIndex>,
}

/// FIFO of scheduled calls awaiting the owner thread.
pub(crate) struct PendingCallQueue {
    entries: Mutex<Entries>,
}

impl PendingCallQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Append at the tail. Returns the queue depth after the push.
    pub(crate) fn push(&self, index: CallIndex, payload: Payload) -> usize {
        let mut entries = lock_unpoisoned(&self.entries);
        entries.calls.push_back(ScheduledCall { index, payload });
        entries.calls.len()
    }

    /// Remove the tail entry if it is `index`. Used to retract a call whose
    /// notification could not be delivered.
    pub(crate) fn retract(&self, index: CallIndex) -> Option<Payload> {
        let mut entries = lock_unpoisoned(&self.entries);
        if entries.calls.back().is_some_and(|call| call.index == index) {
            entries.calls.pop_back().map(|call| call.payload)
        } else {
            None
        }
    }

    /// Dequeue the payload for `expected`.
    ///
    /// Entries older than `expected` are discarded. An entry newer than
    /// `expected` at the head means notifications arrived out of order; it
    /// stays queued and the violation is reported, unless `expected` was
    /// already drained.
    pub(crate) fn take(&self, expected: CallIndex) -> Result<Payload, MarshalError> {
        let mut skipped = Vec::new();
        let result = {
            let mut entries = lock_unpoisoned(&self.entries);
            let drained = entries.drained_through.is_some_and(|through| expected <= through);
            loop {
                let Some(call) = entries.calls.pop_front() else {
                    break Err(MarshalError::MissingCall { index: expected });
                };
                if call.index < expected {
                    skipped.push(call);
                    continue;
                }
                if call.index > expected {
                    let found = call.index;
                    entries.calls.push_front(call);
                    if drained {
                        break Err(MarshalError::MissingCall { index: expected });
                    }
                    break Err(MarshalError::OrderingViolation { expected, found });
                }
                break Ok(call.payload);
            }
        };

        for call in &skipped {
            tracing::warn!(
                index = %call.index,
                expected = %expected,
                "Discarding stale pending call"
            );
        }
        // Skipped payloads drop here, outside the queue lock.
        drop(skipped);
        result
    }

    /// Remove every pending entry, returning them in index order.
    pub(crate) fn drain(&self) -> Vec<Payload> {
        let mut entries = lock_unpoisoned(&self.entries);
        if let Some(last) = entries.calls.back().map(|call| call.index) {
            entries.drained_through = Some(last);
        }
        entries.calls.drain(..).map(|call| call.payload).collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).calls.len()
    }
}
