//! Instrumented plugins and helpers shared by the world tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Result, bail};
use flexstr::SharedStr;
use parking_lot::Mutex;
use strata_core::{BlockId, BlockPos, ChunkPos, EntityId, SubChunkPos};

use super::{
    World, WorldPlugins, WorldSettings,
    block_registry::{BlockInfo, BlockRegistry, StaticBlockRegistry},
    chunk::ChunkData,
    generation::{ChunkGenerator, StageMode, flat::FlatGenerator},
    lighting::LightProcessor,
    metadata::WorldMetadata,
    observer::WorldObserver,
    storage::{WorldStorage, memory::MemoryStorage, record::ChunkRecord},
    sub_chunk::{BlockEntity, SubChunkData},
    tick_schedule::TickKind,
};

/// Everything the instrumented plugins report.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Event {
    ChunkLoaded(ChunkPos),
    ChunkUnloaded(ChunkPos),
    BlockChange(BlockPos, BlockId),
    DestroyChange(BlockPos, BlockId),
    BlockEntityDestroyed(BlockPos),
    Destroyed(BlockPos, BlockId),
    LightUpdate(BlockPos),
    ScheduledTick(BlockPos, TickKind),
    RandomTick(BlockPos),
    EntityInit(EntityId),
    EntityDeinit(EntityId),
}

/// A shared, ordered log of events.
#[derive(Clone, Debug, Default)]
pub(crate) struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    pub(crate) fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub(crate) fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.lock())
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }
}

impl WorldObserver for Recorder {
    fn notify_chunk(&self, pos: ChunkPos) {
        self.push(Event::ChunkLoaded(pos));
    }

    fn notify_chunk_unload(&self, pos: ChunkPos) {
        self.push(Event::ChunkUnloaded(pos));
    }

    fn notify_block_change(&self, pos: BlockPos, block: BlockId) {
        self.push(Event::BlockChange(pos, block));
    }

    fn notify_block_destroy_change(&self, pos: BlockPos, old: BlockId) {
        self.push(Event::DestroyChange(pos, old));
    }

    fn notify_block_entity_change_destroy(&self, pos: BlockPos) {
        self.push(Event::BlockEntityDestroyed(pos));
    }

    fn entity_init(&self, id: EntityId) {
        self.push(Event::EntityInit(id));
    }

    fn entity_deinit(&self, id: EntityId) {
        self.push(Event::EntityDeinit(id));
    }
}

/// The basic block registry reporting all hooks to a [`Recorder`].
pub(crate) struct RecordingBlocks {
    pub(crate) inner: StaticBlockRegistry,
    pub(crate) recorder: Recorder,
    /// scheduled ticks at this position fail
    pub(crate) failing: Option<BlockPos>,
}

impl BlockRegistry for RecordingBlocks {
    fn block_info(&self, block: BlockId) -> BlockInfo {
        self.inner.block_info(block)
    }

    fn scheduled_tick(
        &self,
        _world: &World,
        pos: BlockPos,
        _block: BlockId,
        kind: TickKind,
    ) -> Result<()> {
        self.recorder.push(Event::ScheduledTick(pos, kind));
        if self.failing == Some(pos) {
            bail!("tick handler failed at {pos}");
        }
        Ok(())
    }

    fn random_tick(&self, _world: &World, pos: BlockPos, _block: BlockId) -> Result<()> {
        self.recorder.push(Event::RandomTick(pos));
        Ok(())
    }

    fn block_destroyed(
        &self,
        _world: &World,
        pos: BlockPos,
        block: BlockId,
        _block_entity: Option<&BlockEntity>,
    ) -> Result<()> {
        self.recorder.push(Event::Destroyed(pos, block));
        Ok(())
    }
}

/// A light processor which only reports block changes.
pub(crate) struct RecordingLight(pub(crate) Recorder);

impl LightProcessor for RecordingLight {
    fn block_changed(&self, _world: &World, pos: BlockPos) -> Result<()> {
        self.0.push(Event::LightUpdate(pos));
        Ok(())
    }

    fn process_sub_chunk(&self, _world: &World, _pos: SubChunkPos) -> Result<()> {
        Ok(())
    }

    fn process_chunk(&self, _world: &World, _chunk: &mut ChunkData) -> Result<()> {
        Ok(())
    }
}

/// How a [`TestGenerator`] misbehaves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum Failure {
    #[default]
    None,
    Error,
    Panic,
}

/// Wraps the flat generator, counts generated columns and optionally slows down or fails.
#[derive(Default)]
pub(crate) struct TestGenerator {
    pub(crate) inner: FlatGenerator,
    pub(crate) generated: AtomicUsize,
    pub(crate) delay: Duration,
    pub(crate) failure: Failure,
}

impl TestGenerator {
    pub(crate) fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

impl ChunkGenerator for TestGenerator {
    fn stage_mode(&self, stage: u8) -> StageMode {
        self.inner.stage_mode(stage)
    }

    fn generate_chunk(&self, world: &World, pos: ChunkPos) -> Result<ChunkData> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        match self.failure {
            Failure::None => self.inner.generate_chunk(world, pos),
            Failure::Error => bail!("no terrain for {pos}"),
            Failure::Panic => panic!("generator exploded at {pos}"),
        }
    }

    fn process_chunk(&self, world: &World, chunk: &mut ChunkData) -> Result<()> {
        self.inner.process_chunk(world, chunk)
    }

    fn generate_sub_chunk(&self, world: &World, pos: SubChunkPos) -> Result<SubChunkData> {
        self.inner.generate_sub_chunk(world, pos)
    }
}

/// In-memory storage whose column writes can be slowed down or made to fail.
#[derive(Debug, Default)]
pub(crate) struct FlakyStorage {
    pub(crate) inner: MemoryStorage,
    /// column writes fail while set
    pub(crate) failing: AtomicBool,
    /// the first column write sleeps this long before it's stored
    pub(crate) first_store_delay: Duration,
    pub(crate) attempts: AtomicUsize,
}

impl FlakyStorage {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl WorldStorage for FlakyStorage {
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<ChunkRecord>> {
        self.inner.load_chunk(pos)
    }

    fn store_chunk(&self, pos: ChunkPos, record: &ChunkRecord) -> Result<()> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::sleep(self.first_store_delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("no space left for chunk {pos}");
        }
        self.inner.store_chunk(pos, record)
    }

    fn load_metadata(&self) -> Result<Option<WorldMetadata>> {
        self.inner.load_metadata()
    }

    fn store_metadata(&self, metadata: &WorldMetadata) -> Result<()> {
        self.inner.store_metadata(metadata)
    }
}

/// A multi-threaded runtime for the blocking load and save tasks.
pub(crate) fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Settings with a fixed seed and immediate eviction.
pub(crate) fn settings() -> WorldSettings {
    WorldSettings {
        chunk_lifetime: Duration::ZERO,
        seed: Some(42),
        ..WorldSettings::default()
    }
}

/// Plugins without instrumentation.
pub(crate) fn plain_plugins() -> WorldPlugins {
    WorldPlugins {
        generator: Arc::new(FlatGenerator::default()),
        light: Arc::new(super::lighting::NoLight),
        blocks: Arc::new(StaticBlockRegistry::basic()),
    }
}

/// Plugins reporting block hooks and light updates to `recorder`.
pub(crate) fn recording_plugins(recorder: &Recorder) -> WorldPlugins {
    WorldPlugins {
        generator: Arc::new(FlatGenerator::default()),
        light: Arc::new(RecordingLight(recorder.clone())),
        blocks: Arc::new(RecordingBlocks {
            inner: StaticBlockRegistry::basic(),
            recorder: recorder.clone(),
            failing: None,
        }),
    }
}

/// Opens a world named "test".
pub(crate) fn open_world(
    runtime: &tokio::runtime::Runtime,
    plugins: WorldPlugins,
    storage: Arc<dyn WorldStorage>,
) -> Arc<World> {
    World::open(
        SharedStr::from_borrowed("test"),
        settings(),
        plugins,
        storage,
        runtime.handle().clone(),
    )
    .unwrap()
}

/// Opens a world on fresh in-memory storage.
pub(crate) fn memory_world(
    runtime: &tokio::runtime::Runtime,
    plugins: WorldPlugins,
) -> (Arc<World>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::default());
    let world = open_world(runtime, plugins, Arc::clone(&storage) as Arc<dyn WorldStorage>);
    (world, storage)
}
