//! Per-chunk queues of scheduled block and liquid ticks.

use std::{cmp::Reverse, collections::BinaryHeap};

use strata_core::BlockPos;

/// Selects one of the two queues of a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TickKind {
    /// regular block update
    Block,
    /// liquid flow update
    Liquid,
}

/// A single scheduled tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledTick {
    /// the block to be ticked
    pub pos: BlockPos,
    /// the world tick this entry becomes due
    pub due_tick: u64,
    /// ordering among entries due at the same tick
    pub priority: i8,
}

/// Ordering key of a queued entry.
///
/// Priorities are ranked by their magnitude: `-2` and `2` are serviced at the same rank, after
/// `-1` and `1`, which follow `0`. Entries of equal rank are serviced in insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TickKey {
    due_tick: u64,
    rank: u8,
    sequence: u64,
}

#[derive(Clone, Debug)]
struct Entry {
    key: TickKey,
    tick: ScheduledTick,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// A priority queue of ticks ordered by due tick and priority rank.
#[derive(Clone, Debug, Default)]
pub struct TickQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_sequence: u64,
}

impl TickQueue {
    /// Adds an entry to the queue.
    pub fn schedule(&mut self, tick: ScheduledTick) {
        let key = TickKey {
            due_tick: tick.due_tick,
            rank: tick.priority.unsigned_abs(),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.heap.push(Reverse(Entry { key, tick }));
    }

    /// Removes and returns all entries with `due_tick <= current_tick` in service order.
    pub fn drain_due(&mut self, current_tick: u64) -> Vec<ScheduledTick> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.key.due_tick > current_tick {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry.tick);
            }
        }
        due
    }

    /// Removes all entries for the given block. Returns the number of removed entries.
    pub fn remove_at(&mut self, pos: BlockPos) -> usize {
        let before = self.heap.len();
        self.heap.retain(|Reverse(entry)| entry.tick.pos != pos);
        before - self.heap.len()
    }

    /// Returns whether an entry for the given block is queued.
    #[must_use]
    pub fn contains(&self, pos: BlockPos) -> bool {
        self.heap.iter().any(|Reverse(entry)| entry.tick.pos == pos)
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Iterates all queued entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &ScheduledTick> {
        self.heap.iter().map(|Reverse(entry)| &entry.tick)
    }
}

/// The block and liquid queues of a single chunk.
#[derive(Clone, Debug, Default)]
pub struct TickScheduler {
    block: TickQueue,
    liquid: TickQueue,
}

impl TickScheduler {
    /// Returns the queue for the given kind.
    #[must_use]
    pub fn queue(&self, kind: TickKind) -> &TickQueue {
        match kind {
            TickKind::Block => &self.block,
            TickKind::Liquid => &self.liquid,
        }
    }

    /// Returns the queue for the given kind.
    pub fn queue_mut(&mut self, kind: TickKind) -> &mut TickQueue {
        match kind {
            TickKind::Block => &mut self.block,
            TickKind::Liquid => &mut self.liquid,
        }
    }

    /// Removes the entries of both queues for the given block.
    pub fn clear_at(&mut self, pos: BlockPos) -> usize {
        self.block.remove_at(pos) + self.liquid.remove_at(pos)
    }

    /// Drains both queues; block ticks are serviced before liquid ticks.
    pub fn drain_due(&mut self, current_tick: u64) -> Vec<(TickKind, ScheduledTick)> {
        let mut due: Vec<_> = self
            .block
            .drain_due(current_tick)
            .into_iter()
            .map(|tick| (TickKind::Block, tick))
            .collect();
        due.extend(
            self.liquid
                .drain_due(current_tick)
                .into_iter()
                .map(|tick| (TickKind::Liquid, tick)),
        );
        due
    }

    /// Total number of entries in both queues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.block.len() + self.liquid.len()
    }

    /// Returns `true` if both queues are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.is_empty() && self.liquid.is_empty()
    }
}
