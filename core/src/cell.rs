//! Return cells: the rendezvous that carries a synchronous call's reply from
//! the owner thread back to the blocked caller.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};

use crate::lock_unpoisoned;

/// Type-erased reply: the call's value, or its `CallError` when `err_flag`
/// is set.
pub(crate) type Reply = Box<dyn Any + Send>;

#[derive(Default)]
struct Slot {
    value: Option<Reply>,
    err_flag: bool,
    ready: bool,
}

/// Single-producer/single-consumer handoff between the owner thread and one
/// calling thread.
///
/// The cell is reused across every blocking call its thread makes. Only the
/// `ready` flag (with the condvar) orders the owner's write before the
/// caller's read.
pub(crate) struct ReturnCell {
    slot: Mutex<Slot>,
    bell: Condvar,
}

impl ReturnCell {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            bell: Condvar::new(),
        }
    }

    /// Reset before dispatching a new call.
    pub(crate) fn arm(&self) {
        let mut slot = lock_unpoisoned(&self.slot);
        slot.value = None;
        slot.err_flag = false;
        slot.ready = false;
    }

    /// Store the reply, then signal. Called once per armed call.
    pub(crate) fn publish(&self, value: Reply, err_flag: bool) {
        let mut slot = lock_unpoisoned(&self.slot);
        slot.value = Some(value);
        slot.err_flag = err_flag;
        slot.ready = true;
        drop(slot);
        self.bell.notify_one();
    }

    /// Block until the reply is published, then take it, leaving the cell
    /// empty for the next call.
    pub(crate) fn wait_and_consume(&self) -> (Option<Reply>, bool) {
        let mut slot = lock_unpoisoned(&self.slot);
        while !slot.ready {
            slot = self
                .bell
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slot.ready = false;
        (slot.value.take(), slot.err_flag)
    }
}

type CellMap = Mutex<HashMap<ThreadId, Arc<ReturnCell>>>;

/// Removes a thread's cell from one `ReturnCells` when that thread exits.
struct ExitGuard {
    cells: Weak<CellMap>,
    id: ThreadId,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(cells) = self.cells.upgrade()
            && lock_unpoisoned(&*cells).remove(&self.id).is_some()
        {
            tracing::trace!(thread = ?self.id, "Released return cell on thread exit");
        }
    }
}

thread_local! {
    static EXIT_GUARDS: RefCell<Vec<ExitGuard>> = const { RefCell::new(Vec::new()) };
}

/// Cells keyed by calling thread, created lazily on first blocking call and
/// removed when the thread exits.
pub(crate) struct ReturnCells {
    cells: Arc<CellMap>,
}

impl ReturnCells {
    pub(crate) fn new() -> Self {
        Self {
            cells: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn for_current_thread(&self) -> Arc<ReturnCell> {
        let id = thread::current().id();
        let mut cells = lock_unpoisoned(&*self.cells);
        if let Some(cell) = cells.get(&id) {
            return Arc::clone(cell);
        }
        tracing::debug!(thread = ?id, "Allocating return cell");
        let cell = Arc::new(ReturnCell::new());
        cells.insert(id, Arc::clone(&cell));
        drop(cells);
        self.guard_current_thread(id);
        cell
    }

    /// One guard per (thread, cell map). Guards for dropped maps are pruned.
    fn guard_current_thread(&self, id: ThreadId) {
        let weak = Arc::downgrade(&self.cells);
        // Fails only while this thread's locals are being torn down; the
        // cell then stays until released explicitly.
        let _ = EXIT_GUARDS.try_with(|guards| {
            let mut guards = guards.borrow_mut();
            guards.retain(|guard| guard.cells.strong_count() > 0);
            if !guards.iter().any(|guard| Weak::ptr_eq(&guard.cells, &weak)) {
                guards.push(ExitGuard { cells: weak, id });
            }
        });
    }

    /// Drop the current thread's cell, if any.
    pub(crate) fn release_current_thread(&self) -> bool {
        let id = thread::current().id();
        lock_unpoisoned(&*self.cells).remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&*self.cells).len()
    }
}
