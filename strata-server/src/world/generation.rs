//! The generation pipeline: pluggable generators and the barriers between synchronized stages.

pub mod flat;

use std::{cell::Cell, collections::HashMap};

use anyhow::{Result, bail};
use log::trace;
use parking_lot::{Condvar, Mutex};
use strata_core::{ChunkPos, SubChunkPos};

use super::{World, chunk::ChunkData, guarded, sub_chunk::SubChunkData};

/// How the chunks taking part in a generation stage are synchronized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageMode {
    /// Every chunk runs the stage as soon as it reaches it.
    Parallel,
    /// All participating chunks finish the stage before any of them proceeds.
    Sync,
}

/// Produces the content of new chunk columns.
///
/// A generator drives a column through a sequence of stages. `process_chunk` is called once per
/// stage and must move [`ChunkData::generator_stage`] forward; the last stage sets
/// [`GENERATION_COMPLETE`](super::chunk::GENERATION_COMPLETE).
pub trait ChunkGenerator: Send + Sync {
    /// Synchronization mode of the given stage.
    fn stage_mode(&self, stage: u8) -> StageMode;

    /// Creates a brand-new column, usually at stage `0`.
    fn generate_chunk(&self, world: &World, pos: ChunkPos) -> Result<ChunkData>;

    /// Runs the stage the column is currently at.
    ///
    /// Must not block on other columns: a neighbour may be held back at the entry of the pipeline
    /// until this column finished its synchronized stage. Blocking requests made from here fail
    /// with [`WorldError::LoadFailure`](super::WorldError::LoadFailure); resident columns can be
    /// read through the weak requests.
    fn process_chunk(&self, world: &World, chunk: &mut ChunkData) -> Result<()>;

    /// Materializes a single section which hasn't been populated by the stages.
    fn generate_sub_chunk(&self, world: &World, pos: SubChunkPos) -> Result<SubChunkData>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Progress {
    /// working on (or about to work on) the given stage
    Running(u8),
    /// finished the given synchronized stage and waiting for the others
    Waiting(u8),
}

impl Progress {
    /// Returns whether an entry in this state still holds back chunks waiting at `stage`.
    fn holds_back(self, stage: u8) -> bool {
        match self {
            Self::Running(current) => current <= stage,
            Self::Waiting(current) => current < stage,
        }
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    participants: HashMap<u64, Progress>,
    next_id: u64,
}

/// Tracks all chunks currently in the generation pipeline of a world.
///
/// A chunk which finished a synchronized stage waits until no other participant is still at or
/// below that stage. While any chunk is waiting, new participants are held back at the entry of
/// the pipeline so a steady stream of new chunks can't starve the waiting ones.
#[derive(Debug, Default)]
pub struct StageBarriers {
    state: Mutex<BarrierState>,
    changed: Condvar,
}

impl StageBarriers {
    /// Enters the pipeline with a chunk at the given stage.
    pub fn join(&self, stage: u8) -> StageTicket<'_> {
        let mut state = self.state.lock();
        while state
            .participants
            .values()
            .any(|progress| matches!(progress, Progress::Waiting(_)))
        {
            self.changed.wait(&mut state);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.participants.insert(id, Progress::Running(stage));
        StageTicket { barriers: self, id }
    }

    /// The lowest stage any participant is at.
    #[must_use]
    pub fn frontier(&self) -> Option<u8> {
        self.state
            .lock()
            .participants
            .values()
            .map(|progress| match *progress {
                Progress::Running(stage) | Progress::Waiting(stage) => stage,
            })
            .min()
    }

    /// Number of chunks currently in the pipeline.
    #[must_use]
    pub fn participants(&self) -> usize {
        self.state.lock().participants.len()
    }

    fn update(&self, id: u64, progress: Progress) {
        if let Some(entry) = self.state.lock().participants.get_mut(&id) {
            *entry = progress;
        }
        self.changed.notify_all();
    }

    fn wait(&self, id: u64, stage: u8) {
        let mut state = self.state.lock();
        if let Some(entry) = state.participants.get_mut(&id) {
            *entry = Progress::Waiting(stage);
        }
        self.changed.notify_all();
        while state
            .participants
            .iter()
            .any(|(&other, progress)| other != id && progress.holds_back(stage))
        {
            self.changed.wait(&mut state);
        }
        if let Some(entry) = state.participants.get_mut(&id) {
            *entry = Progress::Running(stage.saturating_add(1));
        }
        self.changed.notify_all();
    }

    fn leave(&self, id: u64) {
        self.state.lock().participants.remove(&id);
        self.changed.notify_all();
    }
}

/// Membership of a single chunk in the generation pipeline. Dropping it leaves the pipeline.
#[derive(Debug)]
pub struct StageTicket<'barriers> {
    barriers: &'barriers StageBarriers,
    id: u64,
}

impl StageTicket<'_> {
    /// Announces that the chunk starts working on the given stage.
    pub fn start(&self, stage: u8) {
        self.barriers.update(self.id, Progress::Running(stage));
    }

    /// Blocks until every participant finished the given synchronized stage.
    pub fn finish_sync(&self, stage: u8) {
        self.barriers.wait(self.id, stage);
    }
}

impl Drop for StageTicket<'_> {
    fn drop(&mut self) {
        self.barriers.leave(self.id);
    }
}

thread_local! {
    static IN_PIPELINE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running generation stages until dropped.
struct PipelineScope {
    outer: bool,
}

impl PipelineScope {
    fn enter() -> Self {
        Self {
            outer: IN_PIPELINE.replace(true),
        }
    }
}

impl Drop for PipelineScope {
    fn drop(&mut self) {
        IN_PIPELINE.set(self.outer);
    }
}

/// Returns whether the current thread is running generation stages.
pub(crate) fn in_pipeline() -> bool {
    IN_PIPELINE.get()
}

/// Runs the remaining stages of a column until it is complete.
///
/// Panics of the generator are converted into errors. A stage which doesn't move the column
/// forward is reported as an error as well.
pub(crate) fn run_stages(
    generator: &dyn ChunkGenerator,
    world: &World,
    barriers: &StageBarriers,
    chunk: &mut ChunkData,
) -> Result<()> {
    if chunk.is_generated() {
        return Ok(());
    }
    let ticket = barriers.join(chunk.generator_stage());
    let _scope = PipelineScope::enter();
    while !chunk.is_generated() {
        let stage = chunk.generator_stage();
        ticket.start(stage);
        trace!("chunk {pos}: running stage {stage}", pos = chunk.pos());
        let result = guarded(|| generator.process_chunk(world, chunk));
        // a failed chunk leaves the pipeline when the ticket drops
        result?;
        if chunk.generator_stage() <= stage {
            bail!(
                "generator didn't advance chunk {pos} beyond stage {stage}",
                pos = chunk.pos()
            );
        }
        if generator.stage_mode(stage) == StageMode::Sync {
            ticket.finish_sync(stage);
        }
    }
    Ok(())
}
