//! Bookkeeping of in-flight loads and saves.

use std::{collections::HashMap, time::Duration};

use futures::future::{BoxFuture, Shared};
use log::trace;
use parking_lot::{Condvar, Mutex};
use strata_core::ChunkPos;

use super::{WorldError, chunk::ChunkHandle, storage::record::ChunkRecord};

/// The shared result of loading or generating a single column.
pub type ChunkFuture = Shared<BoxFuture<'static, Result<ChunkHandle, WorldError>>>;

/// Deduplicates concurrent requests for the same column into a single shared future.
///
/// The registry is only accessed under the world lock. The load task removes its own entry once
/// it's done, so each entry is removed exactly once.
#[derive(Default)]
pub struct AsyncLoadRegistry {
    pending: HashMap<ChunkPos, ChunkFuture>,
}

impl AsyncLoadRegistry {
    /// Returns the pending request for the given column.
    #[must_use]
    pub fn get(&self, pos: ChunkPos) -> Option<ChunkFuture> {
        self.pending.get(&pos).cloned()
    }

    /// Registers a new pending request.
    ///
    /// # Panics
    ///
    /// Panics if a request for this column is already pending.
    pub fn register(&mut self, pos: ChunkPos, future: ChunkFuture) {
        let previous = self.pending.insert(pos, future);
        assert!(
            previous.is_none(),
            "a second load of chunk {pos} has been started"
        );
    }

    /// Removes the request of a finished load.
    ///
    /// # Panics
    ///
    /// Panics if no request for this column is pending.
    pub fn complete(&mut self, pos: ChunkPos) {
        assert!(
            self.pending.remove(&pos).is_some(),
            "load of chunk {pos} completed twice"
        );
    }

    /// Returns whether a request for the given column is pending.
    #[must_use]
    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.pending.contains_key(&pos)
    }

    /// Snapshots all pending requests.
    #[must_use]
    pub fn futures(&self) -> Vec<ChunkFuture> {
        self.pending.values().cloned().collect()
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Save bookkeeping of a single column.
#[derive(Debug, Default)]
struct SaveSlot {
    /// a newer record waiting for the running write to finish
    queued: Option<ChunkRecord>,
}

#[derive(Debug, Default)]
struct SaveState {
    /// columns with a running write
    running: HashMap<ChunkPos, SaveSlot>,
    /// columns whose most recent write failed
    failures: HashMap<ChunkPos, WorldError>,
}

/// Serializes the saves of each column and collects their outcome.
///
/// At most one write per column is in flight. Records submitted meanwhile replace each other, so
/// only the newest one is written once the running write finished; an older record can never
/// overwrite a newer one. Loads of a column wait for its pending saves so they never read stale
/// data.
#[derive(Debug, Default)]
pub struct PendingSaves {
    state: Mutex<SaveState>,
    finished: Condvar,
}

impl PendingSaves {
    /// Submits a record for writing.
    ///
    /// Returns the record if the caller has to start writing it. Otherwise a write of this column
    /// is running and the record will be handed out by [`Self::next`].
    #[must_use]
    pub fn submit(&self, pos: ChunkPos, record: ChunkRecord) -> Option<ChunkRecord> {
        let mut state = self.state.lock();
        if let Some(slot) = state.running.get_mut(&pos) {
            if slot.queued.replace(record).is_some() {
                trace!("chunk {pos}: superseded a queued save");
            }
            return None;
        }
        state.running.insert(pos, SaveSlot::default());
        Some(record)
    }

    /// Records the outcome of a write.
    ///
    /// A successful write supersedes earlier failures of the same column.
    pub fn complete(&self, pos: ChunkPos, result: Result<(), WorldError>) {
        let mut state = self.state.lock();
        match result {
            Ok(()) => {
                state.failures.remove(&pos);
            }
            Err(error) => {
                state.failures.insert(pos, error);
            }
        }
    }

    /// Hands out the record queued behind the write which just completed. Returns `None` and
    /// ends the save of this column if nothing is queued.
    #[must_use]
    pub fn next(&self, pos: ChunkPos) -> Option<ChunkRecord> {
        let mut state = self.state.lock();
        let queued = state
            .running
            .get_mut(&pos)
            .and_then(|slot| slot.queued.take());
        if queued.is_none() {
            state.running.remove(&pos);
            self.finished.notify_all();
        }
        queued
    }

    /// Number of pending saves of the given column, counting the running and the queued one.
    #[must_use]
    pub fn count(&self, pos: ChunkPos) -> usize {
        self.state
            .lock()
            .running
            .get(&pos)
            .map_or(0, |slot| 1 + usize::from(slot.queued.is_some()))
    }

    /// Number of pending saves of all columns.
    #[must_use]
    pub fn total(&self) -> usize {
        self.state
            .lock()
            .running
            .values()
            .map(|slot| 1 + usize::from(slot.queued.is_some()))
            .sum()
    }

    /// Removes and returns all failures recorded so far.
    pub fn take_failures(&self) -> Vec<(ChunkPos, WorldError)> {
        self.state.lock().failures.drain().collect()
    }

    /// Blocks until no save of the given column is pending.
    pub fn wait_for(&self, pos: ChunkPos) {
        let mut state = self.state.lock();
        while state.running.contains_key(&pos) {
            self.finished.wait(&mut state);
        }
    }

    /// Blocks until no save is pending at all.
    ///
    /// Returns `false` if saves are still pending after `timeout`.
    pub fn wait_all(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        while !state.running.is_empty() {
            if self.finished.wait_for(&mut state, timeout).timed_out() {
                return state.running.is_empty();
            }
        }
        true
    }
}
