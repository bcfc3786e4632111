//! A single world: resident chunk columns, entities, scheduled ticks and their life cycle.
//!
//! All state of a world lives behind one reentrant lock. Interior borrows of that state are kept
//! short and are always released before any plugin or observer is called, so callbacks may
//! re-enter the world API on the same thread.

pub mod block_registry;
pub mod chunk;
pub mod column_map;
pub mod entity;
mod error;
pub mod generation;
pub mod lighting;
pub mod load_registry;
pub mod metadata;
pub mod observer;
mod settings;
pub mod storage;
pub mod sub_chunk;
#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;
pub mod tick_schedule;
pub mod ticket;

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    ops::RangeInclusive,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use anyhow::anyhow;
use flexstr::SharedStr;
use futures::{FutureExt, future};
use glam::DVec3;
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rand::Rng;
use strata_core::{
    Aabb, BiomeId, BlockId, BlockPos, ChunkLayout, ChunkPos, EntityId, EntityKind, LocalIndex,
    Shape, SubChunkPos,
};

use block_registry::BlockRegistry;
use chunk::{Chunk, ChunkData, ChunkHandle};
use column_map::ChunkColumnMap;
pub use entity::{EntityHandle, EntityState};
use entity::EntityIndex;
pub use error::WorldError;
use generation::{ChunkGenerator, StageBarriers};
use lighting::LightProcessor;
use load_registry::{AsyncLoadRegistry, ChunkFuture, PendingSaves};
use metadata::{WorldMetadata, WorldSeed};
use observer::WorldObserver;
pub use settings::WorldSettings;
use storage::{
    WorldStorage,
    record::{ChunkRecord, EntityRecord},
};
use sub_chunk::BlockEntity;
use tick_schedule::{ScheduledTick, TickKind};
use ticket::{LoadingTicket, TicketSet};

/// Runs a plugin operation and converts a panic into an error.
pub(crate) fn guarded<R>(operation: impl FnOnce() -> anyhow::Result<R>) -> anyhow::Result<R> {
    catch_unwind(AssertUnwindSafe(operation)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_owned());
        Err(anyhow!("panicked: {message}"))
    })
}

/// Defines what happens to the block which is about to be replaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockSetMode {
    /// Overwrite the block silently.
    #[default]
    Replace,
    /// Destroy a breakable block first: observers see the destruction, the block registry gets
    /// to produce drops and the scheduled ticks of the position are discarded.
    Destroy,
    /// Only place the block if the current one is replaceable.
    Keep,
}

/// The result of a block lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockLookup {
    /// a block without payload
    Plain(BlockId),
    /// a block carrying a block entity
    WithEntity(BlockId, BlockEntity),
}

impl BlockLookup {
    /// The block regardless of its payload.
    #[must_use]
    pub fn block(&self) -> BlockId {
        match self {
            Self::Plain(block) | Self::WithEntity(block, _) => *block,
        }
    }

    /// The block entity, if any.
    #[must_use]
    pub fn block_entity(&self) -> Option<&BlockEntity> {
        match self {
            Self::Plain(_) => None,
            Self::WithEntity(_, block_entity) => Some(block_entity),
        }
    }
}

/// Profiling counters of a single tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// the tick these counters belong to
    pub tick: u64,
    /// number of dispatched scheduled ticks
    pub scheduled_ticks: usize,
    /// number of dispatched random ticks
    pub random_ticks: usize,
    /// number of handler invocations which failed
    pub handler_failures: usize,
    /// number of resident chunk columns
    pub resident_chunks: usize,
    /// whether rain or thunder started or stopped
    pub weather_changed: bool,
    /// wall-clock duration of the tick
    pub duration: Duration,
}

/// The strategies a world is constructed with.
#[derive(Clone)]
pub struct WorldPlugins {
    /// produces new chunk columns
    pub generator: Arc<dyn ChunkGenerator>,
    /// recomputes light after changes
    pub light: Arc<dyn LightProcessor>,
    /// static block metadata and block behavior
    pub blocks: Arc<dyn BlockRegistry>,
}

struct WorldState {
    chunks: ChunkColumnMap,
    loads: AsyncLoadRegistry,
    entities: EntityIndex,
    metadata: WorldMetadata,
    tickets: TicketSet,
    current_tick: u64,
}

/// A single world.
///
/// Worlds are always handled through an [`Arc`]; load tasks keep their world alive until they
/// finished.
pub struct World {
    name: SharedStr,
    settings: WorldSettings,
    seed: WorldSeed,
    generator: Arc<dyn ChunkGenerator>,
    light: Arc<dyn LightProcessor>,
    blocks: Arc<dyn BlockRegistry>,
    storage: Arc<dyn WorldStorage>,
    runtime: tokio::runtime::Handle,
    state: ReentrantMutex<RefCell<WorldState>>,
    observers: RwLock<Vec<Arc<dyn WorldObserver>>>,
    barriers: StageBarriers,
    pending_saves: Arc<PendingSaves>,
    last_tick: Mutex<TickStats>,
    this: Weak<World>,
}

impl World {
    /// Opens a world, restoring its metadata from `storage` if it has been saved before.
    ///
    /// Blocking work (loads, generation, saves) is spawned onto `runtime`.
    pub fn open(
        name: SharedStr,
        settings: WorldSettings,
        plugins: WorldPlugins,
        storage: Arc<dyn WorldStorage>,
        runtime: tokio::runtime::Handle,
    ) -> Result<Arc<Self>, WorldError> {
        let metadata = match guarded(|| storage.load_metadata())
            .map_err(|error| WorldError::storage(&error))?
        {
            Some(metadata) => {
                info!("opened world '{name}' at game time {}", metadata.game_time);
                metadata
            }
            None => {
                let seed = settings.seed.unwrap_or_else(rand::random);
                info!("created world '{name}' with seed {seed}");
                WorldMetadata::new(seed)
            }
        };
        let seed = metadata.seed;
        let current_tick = metadata.game_time;

        Ok(Arc::new_cyclic(|this| Self {
            name,
            settings,
            seed,
            generator: plugins.generator,
            light: plugins.light,
            blocks: plugins.blocks,
            storage,
            runtime,
            state: ReentrantMutex::new(RefCell::new(WorldState {
                chunks: ChunkColumnMap::default(),
                loads: AsyncLoadRegistry::default(),
                entities: EntityIndex::default(),
                metadata,
                tickets: TicketSet::default(),
                current_tick,
            })),
            observers: RwLock::new(Vec::new()),
            barriers: StageBarriers::default(),
            pending_saves: Arc::new(PendingSaves::default()),
            last_tick: Mutex::new(TickStats::default()),
            this: Weak::clone(this),
        }))
    }

    /// Id of this world.
    #[must_use]
    pub fn name(&self) -> &SharedStr {
        &self.name
    }

    /// The settings this world has been opened with.
    #[must_use]
    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    /// Vertical layout of all columns.
    #[must_use]
    pub fn layout(&self) -> ChunkLayout {
        self.settings.layout
    }

    /// Seed of this world.
    #[must_use]
    pub fn seed(&self) -> WorldSeed {
        self.seed
    }

    /// The block registry of this world.
    #[must_use]
    pub fn block_registry(&self) -> &dyn BlockRegistry {
        self.blocks.as_ref()
    }

    /// A copy of the scalar world state.
    #[must_use]
    pub fn metadata(&self) -> WorldMetadata {
        self.with_state(|state| state.metadata.clone())
    }

    /// Changes the scalar world state. The seed cannot be changed.
    pub fn update_metadata<R>(&self, updater: impl FnOnce(&mut WorldMetadata) -> R) -> R {
        self.with_state(|state| {
            let result = updater(&mut state.metadata);
            state.metadata.seed = self.seed;
            result
        })
    }

    /// Number of ticks since the creation of this world.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.with_state(|state| state.current_tick)
    }

    /// Number of resident chunk columns.
    #[must_use]
    pub fn resident_chunks(&self) -> usize {
        self.with_state(|state| state.chunks.len())
    }

    /// Number of loads which haven't finished yet.
    #[must_use]
    pub fn pending_loads(&self) -> usize {
        self.with_state(|state| state.loads.len())
    }

    /// Number of registered entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.with_state(|state| state.entities.len())
    }

    /// Registers an observer for all future notifications.
    pub fn add_observer(&self, observer: Arc<dyn WorldObserver>) {
        self.observers.write().push(observer);
    }

    /// Runs `operation` while holding the world lock.
    ///
    /// Other threads can't access the world until `operation` returns; the calling thread may
    /// use the world freely.
    pub fn locked<R>(&self, operation: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.state.lock();
        operation(self)
    }

    fn with_state<R>(&self, accessor: impl FnOnce(&mut WorldState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        accessor(&mut state)
    }

    fn notify(&self, notification: impl Fn(&dyn WorldObserver)) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            notification(observer.as_ref());
        }
    }

    fn report(&self, what: &str, result: anyhow::Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(error) => {
                error!("{what} in world '{name}' failed: {error:#}", name = self.name);
                false
            }
        }
    }

    // chunk access

    /// Returns a future resolving to the given column.
    ///
    /// The column is loaded from storage or generated if it isn't resident. Concurrent requests
    /// for the same column share a single load.
    pub fn request_chunk_data(&self, pos: ChunkPos) -> ChunkFuture {
        let _guard = self.state.lock();
        let existing = self.with_state(|state| {
            if let Some(chunk) = state.chunks.get_or_none(pos) {
                let ready: Result<ChunkHandle, WorldError> = Ok(chunk);
                return Some(future::ready(ready).boxed().shared());
            }
            state.loads.get(pos)
        });
        if let Some(future) = existing {
            return future;
        }

        let Some(world) = self.this.upgrade() else {
            let failure = Err(WorldError::LoadFailure {
                pos,
                reason: SharedStr::from_borrowed("the world is being dropped"),
            });
            return future::ready(failure).boxed().shared();
        };
        trace!("world '{name}': starting load of chunk {pos}", name = self.name);
        let task = self.runtime.spawn_blocking(move || world.load_task(pos));
        let future: ChunkFuture = async move {
            task.await.unwrap_or_else(|error| {
                Err(WorldError::LoadFailure {
                    pos,
                    reason: format!("load task failed: {error}").into(),
                })
            })
        }
        .boxed()
        .shared();
        // the task can't finish before this registration since it needs the world lock
        self.with_state(|state| state.loads.register(pos, future.clone()));
        future
    }

    /// Returns the given column, loading or generating it if necessary. Blocks until it's
    /// available.
    ///
    /// Fails if the column isn't resident and the calling thread runs generation stages, since
    /// the requested column may be waiting for the caller's stage to finish.
    ///
    /// # Panics
    ///
    /// Panics if the column isn't resident and the calling thread holds the world lock; the load
    /// could never finish.
    pub fn request_chunk_data_sync(&self, pos: ChunkPos) -> Result<ChunkHandle, WorldError> {
        if let Some(chunk) = self.request_chunk_data_weak(pos) {
            return Ok(chunk);
        }
        if generation::in_pipeline() {
            return Err(WorldError::LoadFailure {
                pos,
                reason: SharedStr::from_borrowed(
                    "blocking request from within the generation pipeline",
                ),
            });
        }
        assert!(
            !self.state.is_owned_by_current_thread(),
            "blocking request for chunk {pos} while holding the lock of world '{name}'",
            name = self.name
        );
        pollster::block_on(self.request_chunk_data(pos))
    }

    /// Calls `callback` once the column is available.
    ///
    /// Resident columns are passed to the callback right away on the calling thread; otherwise
    /// the callback runs on the runtime once the load finished.
    pub fn request_chunk_data_with(
        &self,
        pos: ChunkPos,
        callback: impl FnOnce(Result<ChunkHandle, WorldError>) + Send + 'static,
    ) {
        if let Some(chunk) = self.request_chunk_data_weak(pos) {
            callback(Ok(chunk));
            return;
        }
        let future = self.request_chunk_data(pos);
        self.runtime.spawn(async move { callback(future.await) });
    }

    /// Returns the given column only if it's resident.
    #[must_use]
    pub fn request_chunk_data_weak(&self, pos: ChunkPos) -> Option<ChunkHandle> {
        let chunk = self.with_state(|state| state.chunks.get_or_none(pos))?;
        chunk.write(|data| data.touch(Instant::now()));
        Some(chunk)
    }

    /// Returns the given column if it's resident; otherwise starts loading it in the background
    /// and returns `None`.
    pub fn request_chunk_data_weak_gen(&self, pos: ChunkPos) -> Option<ChunkHandle> {
        let chunk = self.request_chunk_data_weak(pos);
        if chunk.is_none() {
            drop(self.request_chunk_data(pos));
        }
        chunk
    }

    fn load_task(&self, pos: ChunkPos) -> Result<ChunkHandle, WorldError> {
        let loaded = self.load_or_generate(pos);
        let _guard = self.state.lock();
        let inserted = self.with_state(|state| {
            state.loads.complete(pos);
            let (mut data, entities) = loaded?;
            let mut registered = Vec::with_capacity(entities.len());
            for (y_index, record) in entities {
                let handle = state.entities.create(
                    record.kind,
                    EntityState {
                        position: record.position,
                        yaw: record.yaw,
                        pitch: record.pitch,
                        motion: record.motion,
                        payload: record.payload,
                    },
                );
                if let Some(section) = data.section_mut(y_index) {
                    section.insert_entity(handle.id());
                }
                registered.push((handle, pos.sub_chunk(y_index)));
            }
            let ids: Vec<_> = registered.iter().map(|(handle, _)| handle.id()).collect();
            // the column only becomes resident once all of its entities are registered
            state.entities.insert_all(registered)?;
            let chunk = Arc::new(Chunk::new(data));
            state.chunks.insert(ChunkHandle::clone(&chunk));
            Ok((chunk, ids))
        });

        match inserted {
            Ok((chunk, entities)) => {
                debug!("world '{name}': chunk {pos} is resident", name = self.name);
                for id in entities {
                    self.notify(|observer| observer.entity_init(id));
                }
                self.notify(|observer| observer.notify_chunk(pos));
                Ok(chunk)
            }
            Err(error) => {
                warn!("world '{name}': {error}", name = self.name);
                Err(error)
            }
        }
    }

    fn load_or_generate(
        &self,
        pos: ChunkPos,
    ) -> Result<(ChunkData, Vec<(u32, EntityRecord)>), WorldError> {
        let failure = |error: anyhow::Error| WorldError::load_failure(pos, &error);

        self.pending_saves.wait_for(pos);
        let record = guarded(|| self.storage.load_chunk(pos)).map_err(failure)?;
        let (mut chunk, entities) = if let Some(record) = record {
            debug!("world '{name}': loading chunk {pos}", name = self.name);
            ChunkData::from_record(
                pos,
                self.layout(),
                record,
                self.current_tick(),
                self.blocks.as_ref(),
            )?
        } else {
            debug!("world '{name}': generating chunk {pos}", name = self.name);
            let chunk = guarded(|| self.generator.generate_chunk(self, pos)).map_err(failure)?;
            (chunk, Vec::new())
        };
        if chunk.pos() != pos || chunk.layout() != self.layout() {
            return Err(failure(anyhow!(
                "generator produced chunk {} with a different layout",
                chunk.pos()
            )));
        }

        generation::run_stages(self.generator.as_ref(), self, &self.barriers, &mut chunk)
            .map_err(failure)?;
        chunk.activate();
        if chunk.height_maps().is_none() {
            chunk.recompute_height_maps(self.blocks.as_ref());
        }
        self.report(
            "lighting a new chunk",
            guarded(|| self.light.process_chunk(self, &mut chunk)),
        );
        chunk.touch(Instant::now());
        Ok((chunk, entities))
    }

    /// Returns a resident and completely generated column.
    fn generated_chunk(&self, pos: ChunkPos) -> Result<ChunkHandle, WorldError> {
        let chunk = self
            .request_chunk_data_weak(pos)
            .ok_or(WorldError::ChunkNotLoaded(pos))?;
        chunk.read(ChunkData::ensure_generated)?;
        Ok(chunk)
    }

    /// Materializes a section by asking the generator for it.
    fn ensure_section(&self, chunk: &Chunk, y_index: u32) -> Result<(), WorldError> {
        if chunk.read(|data| data.section(y_index).is_some()) {
            return Ok(());
        }
        let sub_pos = chunk.pos().sub_chunk(y_index);
        let section = guarded(|| self.generator.generate_sub_chunk(self, sub_pos))
            .map_err(|error| WorldError::load_failure(chunk.pos(), &error))?;
        let inserted = chunk.write(|data| {
            if data.section(y_index).is_some() {
                return false;
            }
            data.insert_section(y_index, section);
            data.recompute_height_maps(self.blocks.as_ref());
            true
        });
        if inserted {
            trace!("world '{name}': materialized {sub_pos}", name = self.name);
            self.report(
                "lighting a new section",
                guarded(|| self.light.process_sub_chunk(self, sub_pos)),
            );
            self.notify(|observer| observer.notify_sub_chunk(sub_pos));
        }
        Ok(())
    }

    /// Grants mutable access to a resident column and marks it as changed.
    ///
    /// `operation` must not call back into the world.
    pub fn with_chunk_data_mut<R>(
        &self,
        pos: ChunkPos,
        operation: impl FnOnce(&mut ChunkData) -> R,
    ) -> Result<R, WorldError> {
        let _guard = self.state.lock();
        let chunk = self
            .request_chunk_data_weak(pos)
            .ok_or(WorldError::ChunkNotLoaded(pos))?;
        Ok(chunk.write(|data| {
            data.mark_dirty();
            operation(data)
        }))
    }

    /// Calls `callback` for every resident column.
    pub fn for_each_chunk(&self, mut callback: impl FnMut(&ChunkHandle)) {
        let _guard = self.state.lock();
        for chunk in self.with_state(|state| state.chunks.snapshot()) {
            callback(&chunk);
        }
    }

    /// Calls `callback` for every resident column within `radius` columns around `center`.
    pub fn for_each_chunk_in_radius(
        &self,
        center: ChunkPos,
        radius: u32,
        shape: Shape,
        mut callback: impl FnMut(&ChunkHandle),
    ) {
        let _guard = self.state.lock();
        let chunks = self.with_state(|state| state.chunks.snapshot_in_radius(center, radius, shape));
        for chunk in chunks {
            callback(&chunk);
        }
    }

    // blocks

    /// Looks up a block together with its block entity.
    ///
    /// Returns `None` if the column isn't resident or the position lies outside the world.
    #[must_use]
    pub fn get_block(&self, pos: BlockPos) -> Option<BlockLookup> {
        let _guard = self.state.lock();
        let chunk = self.generated_chunk(pos.chunk_pos()).ok()?;
        let (y_index, index) = chunk.read(|data| data.locate(pos)).ok()?;
        self.ensure_section(&chunk, y_index).ok()?;
        chunk.read(|data| {
            let section = data.section(y_index)?;
            let block = section.block(index);
            Some(match section.block_entity(index) {
                Some(block_entity) => BlockLookup::WithEntity(block, block_entity.clone()),
                None => BlockLookup::Plain(block),
            })
        })
    }

    /// Returns the block at the given position.
    pub fn block(&self, pos: BlockPos) -> Result<BlockId, WorldError> {
        let _guard = self.state.lock();
        let chunk = self.generated_chunk(pos.chunk_pos())?;
        let (y_index, _) = chunk.read(|data| data.locate(pos))?;
        self.ensure_section(&chunk, y_index)?;
        Ok(chunk.read(|data| data.block(pos))?.unwrap_or(BlockId::AIR))
    }

    /// Places a block. Returns `false` if nothing changed.
    pub fn set_block(
        &self,
        pos: BlockPos,
        block: BlockId,
        mode: BlockSetMode,
    ) -> Result<bool, WorldError> {
        self.change_block(pos, block, mode, None)
    }

    /// Places a block together with its block entity.
    ///
    /// # Panics
    ///
    /// Panics if blocks of this type can't hold a block entity.
    pub fn set_block_with_entity(
        &self,
        pos: BlockPos,
        block: BlockId,
        block_entity: BlockEntity,
        mode: BlockSetMode,
    ) -> Result<bool, WorldError> {
        assert!(
            self.blocks.block_info(block).has_block_entity,
            "block {block} at {pos} cannot hold a block entity"
        );
        self.change_block(pos, block, mode, Some(block_entity))
    }

    fn change_block(
        &self,
        pos: BlockPos,
        block: BlockId,
        mode: BlockSetMode,
        block_entity: Option<BlockEntity>,
    ) -> Result<bool, WorldError> {
        let _guard = self.state.lock();
        let chunk = self.generated_chunk(pos.chunk_pos())?;
        let (y_index, index) = chunk.read(|data| data.locate(pos))?;
        self.ensure_section(&chunk, y_index)?;

        let old = chunk
            .read(|data| data.block(pos))?
            .unwrap_or(BlockId::AIR);
        let old_info = self.blocks.block_info(old);
        if mode == BlockSetMode::Keep && !old_info.replaceable {
            return Ok(false);
        }
        if old == block && block_entity.is_none() {
            return Ok(false);
        }
        let destroy = mode == BlockSetMode::Destroy && old_info.breakable;
        if destroy {
            self.notify(|observer| observer.notify_block_destroy_change(pos, old));
        }

        let removed = chunk.write(|data| {
            let local = index.local();
            let removed = data.section_mut(y_index).and_then(|section| {
                section.set_block(index, block);
                let removed = if old == block {
                    None
                } else {
                    section.remove_block_entity(index)
                };
                if let Some(block_entity) = &block_entity {
                    section.insert_block_entity(index, block_entity.clone());
                }
                removed
            });
            if destroy {
                data.ticks_mut().clear_at(pos);
            }
            data.update_height_column(local.x, local.z, self.blocks.as_ref());
            data.mark_dirty();
            removed
        });

        if destroy && self.with_state(|state| state.metadata.game_rules.do_tile_drops) {
            self.report(
                "destroying a block",
                guarded(|| {
                    self.blocks
                        .block_destroyed(self, pos, old, removed.as_ref())
                }),
            );
        }
        match (&block_entity, &removed) {
            (Some(block_entity), _) => {
                self.notify(|observer| observer.notify_block_entity_change(pos, block_entity));
            }
            (None, Some(_)) => {
                self.notify(|observer| observer.notify_block_entity_change_destroy(pos));
            }
            (None, None) => {}
        }
        if old != block {
            self.report(
                "a light update",
                guarded(|| self.light.block_changed(self, pos)),
            );
            self.notify(|observer| observer.notify_block_change(pos, block));
        }
        Ok(true)
    }

    /// Places the same block in every position of the inclusive box spanned by `from` and `to`.
    /// Returns the number of changed blocks.
    pub fn set_blocks(
        &self,
        from: BlockPos,
        to: BlockPos,
        block: BlockId,
        mode: BlockSetMode,
    ) -> Result<usize, WorldError> {
        let _guard = self.state.lock();
        let mut changed = 0;
        for pos in box_positions(from, to) {
            if self.set_block(pos, block, mode)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Attaches a block entity to the block at the given position.
    ///
    /// # Panics
    ///
    /// Panics if the block at this position can't hold a block entity.
    pub fn set_block_entity(
        &self,
        pos: BlockPos,
        block_entity: BlockEntity,
    ) -> Result<(), WorldError> {
        let _guard = self.state.lock();
        let block = self.block(pos)?;
        assert!(
            self.blocks.block_info(block).has_block_entity,
            "block {block} at {pos} cannot hold a block entity"
        );
        let chunk = self.generated_chunk(pos.chunk_pos())?;
        let (y_index, index) = chunk.read(|data| data.locate(pos))?;
        chunk.write(|data| {
            if let Some(section) = data.section_mut(y_index) {
                section.insert_block_entity(index, block_entity.clone());
            }
            data.mark_dirty();
        });
        self.notify(|observer| observer.notify_block_entity_change(pos, &block_entity));
        Ok(())
    }

    /// Detaches the block entity at the given position and returns it.
    pub fn remove_block_entity(&self, pos: BlockPos) -> Result<Option<BlockEntity>, WorldError> {
        let _guard = self.state.lock();
        let chunk = self.generated_chunk(pos.chunk_pos())?;
        let (y_index, index) = chunk.read(|data| data.locate(pos))?;
        let removed = chunk.write(|data| {
            let removed = data
                .section_mut(y_index)
                .and_then(|section| section.remove_block_entity(index));
            if removed.is_some() {
                data.mark_dirty();
            }
            removed
        });
        if removed.is_some() {
            self.notify(|observer| observer.notify_block_entity_change_destroy(pos));
        }
        Ok(removed)
    }

    /// Returns the biome at the given position or `None` if the column isn't resident.
    #[must_use]
    pub fn get_biome(&self, pos: BlockPos) -> Option<BiomeId> {
        let _guard = self.state.lock();
        let chunk = self.generated_chunk(pos.chunk_pos()).ok()?;
        let (y_index, _) = chunk.read(|data| data.locate(pos)).ok()?;
        self.ensure_section(&chunk, y_index).ok()?;
        chunk.read(|data| data.biome(pos)).ok().flatten()
    }

    /// Changes the biome of the 4×4×4 cell containing `pos`. Returns `false` if nothing changed.
    pub fn set_biome(&self, pos: BlockPos, biome: BiomeId) -> Result<bool, WorldError> {
        let _guard = self.state.lock();
        let chunk = self.generated_chunk(pos.chunk_pos())?;
        let (y_index, index) = chunk.read(|data| data.locate(pos))?;
        self.ensure_section(&chunk, y_index)?;
        let changed = chunk.write(|data| {
            let changed = data
                .section_mut(y_index)
                .is_some_and(|section| section.set_biome(index, biome));
            if changed {
                data.mark_dirty();
            }
            changed
        });
        if changed {
            self.notify(|observer| observer.notify_biome_change(pos, biome));
        }
        Ok(changed)
    }

    /// Changes the biome of every cell touched by the inclusive box spanned by `from` and `to`.
    /// Returns the number of changed cells.
    pub fn set_biomes(
        &self,
        from: BlockPos,
        to: BlockPos,
        biome: BiomeId,
    ) -> Result<usize, WorldError> {
        let _guard = self.state.lock();
        let mut changed = 0;
        for pos in box_positions(from, to) {
            if self.set_biome(pos, biome)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Lets the block at `pos` trigger an event which is forwarded to all observers.
    pub fn block_event(&self, pos: BlockPos, event: u8, data: i32) -> Result<(), WorldError> {
        let block = self.block(pos)?;
        self.notify(|observer| observer.notify_block_event(pos, block, event, data));
        Ok(())
    }

    // scheduled ticks

    /// Schedules a tick for the block at `pos` in `duration` ticks.
    pub fn query_for_tick(
        &self,
        pos: BlockPos,
        duration: u64,
        priority: i8,
        kind: TickKind,
    ) -> Result<(), WorldError> {
        let _guard = self.state.lock();
        let chunk = self.generated_chunk(pos.chunk_pos())?;
        chunk.read(|data| data.locate(pos))?;
        let due_tick = self.current_tick() + duration;
        chunk.write(|data| {
            data.ticks_mut().queue_mut(kind).schedule(ScheduledTick {
                pos,
                due_tick,
                priority,
            });
            data.mark_dirty();
        });
        Ok(())
    }

    /// Returns whether a tick of the given kind is scheduled for the block at `pos`.
    #[must_use]
    pub fn is_queried_for_tick(&self, pos: BlockPos, kind: TickKind) -> bool {
        self.request_chunk_data_weak(pos.chunk_pos())
            .is_some_and(|chunk| chunk.read(|data| data.ticks().queue(kind).contains(pos)))
    }

    // entities

    /// Creates an entity with a fresh id without registering it.
    pub fn create_entity(&self, kind: EntityKind, state: EntityState) -> EntityHandle {
        self.with_state(|world| world.entities.create(kind, state))
    }

    /// Registers an entity in the section containing its position.
    ///
    /// The column must be resident.
    pub fn register_entity(&self, entity: &EntityHandle) -> Result<(), WorldError> {
        let _guard = self.state.lock();
        let bucket = self.layout().sub_chunk_of_point(entity.position());
        let chunk = self.generated_chunk(bucket.chunk_pos())?;
        self.ensure_section(&chunk, bucket.y_index)?;
        let id = entity.id();
        self.with_state(|state| {
            state.entities.insert(EntityHandle::clone(entity), bucket)?;
            chunk.write(|data| {
                if let Some(section) = data.section_mut(bucket.y_index) {
                    section.insert_entity(id);
                }
            });
            Ok(())
        })?;
        self.notify(|observer| observer.entity_init(id));
        Ok(())
    }

    /// Creates and registers an entity.
    pub fn spawn_entity(
        &self,
        kind: EntityKind,
        state: EntityState,
    ) -> Result<EntityHandle, WorldError> {
        let entity = self.create_entity(kind, state);
        self.register_entity(&entity)?;
        Ok(entity)
    }

    /// Removes an entity from the world and returns it.
    pub fn unregister_entity(&self, id: EntityId) -> Result<EntityHandle, WorldError> {
        let _guard = self.state.lock();
        let handle = self.with_state(|state| {
            let (handle, bucket) = state
                .entities
                .remove(id)
                .ok_or(WorldError::UnknownEntity(id))?;
            if let Some(chunk) = state.chunks.get_or_none(bucket.chunk_pos()) {
                chunk.write(|data| {
                    if let Some(section) = data.section_mut(bucket.y_index) {
                        section.remove_entity(id);
                    }
                    data.mark_dirty();
                });
            }
            Ok(handle)
        })?;
        self.notify(|observer| observer.entity_deinit(id));
        Ok(handle)
    }

    /// Returns a registered entity.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<EntityHandle> {
        self.with_state(|state| state.entities.get(id))
    }

    /// Returns the section an entity is stored in.
    #[must_use]
    pub fn entity_bucket(&self, id: EntityId) -> Option<SubChunkPos> {
        self.with_state(|state| state.entities.bucket(id))
    }

    fn ensure_entity(&self, id: EntityId) -> Result<EntityHandle, WorldError> {
        self.entity(id).ok_or(WorldError::UnknownEntity(id))
    }

    /// Moves an entity without interpolation.
    pub fn entity_teleport(&self, id: EntityId, to: DVec3) -> Result<(), WorldError> {
        let from = self.relocate_entity(id, to)?;
        self.notify(|observer| observer.entity_teleport(id, from, to));
        self.entity_light(id, self.light.handles_entity_moves());
        Ok(())
    }

    /// Moves an entity.
    pub fn entity_move(&self, id: EntityId, to: DVec3) -> Result<(), WorldError> {
        let from = self.relocate_entity(id, to)?;
        self.notify(|observer| observer.entity_move(id, from, to));
        self.entity_light(id, self.light.handles_entity_moves());
        Ok(())
    }

    /// Changes the view direction of an entity.
    pub fn entity_look(&self, id: EntityId, yaw: f32, pitch: f32) -> Result<(), WorldError> {
        self.ensure_entity(id)?.update(|state| {
            state.yaw = yaw;
            state.pitch = pitch;
        });
        self.notify(|observer| observer.entity_look_changes(id, yaw, pitch));
        self.entity_light(id, self.light.handles_entity_rotation());
        Ok(())
    }

    /// Changes the velocity of an entity.
    pub fn entity_motion(&self, id: EntityId, motion: DVec3) -> Result<(), WorldError> {
        self.ensure_entity(id)?.update(|state| state.motion = motion);
        self.notify(|observer| observer.entity_motion_changes(id, motion));
        Ok(())
    }

    fn entity_light(&self, id: EntityId, enabled: bool) {
        if enabled {
            self.report(
                "an entity light update",
                guarded(|| self.light.entity_changed(self, id)),
            );
        }
    }

    /// Moves an entity into the bucket of its new position. The entity keeps its bucket and
    /// position if the target column isn't resident.
    fn relocate_entity(&self, id: EntityId, to: DVec3) -> Result<DVec3, WorldError> {
        let _guard = self.state.lock();
        let entity = self.ensure_entity(id)?;
        let target = self.layout().sub_chunk_of_point(to);
        let current = self
            .entity_bucket(id)
            .ok_or(WorldError::UnknownEntity(id))?;
        if target != current {
            let target_chunk = self.generated_chunk(target.chunk_pos())?;
            self.ensure_section(&target_chunk, target.y_index)?;
            self.with_state(|state| {
                if let Some(chunk) = state.chunks.get_or_none(current.chunk_pos()) {
                    chunk.write(|data| {
                        if let Some(section) = data.section_mut(current.y_index) {
                            section.remove_entity(id);
                        }
                        data.mark_dirty();
                    });
                }
                target_chunk.write(|data| {
                    if let Some(section) = data.section_mut(target.y_index) {
                        section.insert_entity(id);
                    }
                    data.mark_dirty();
                });
                state.entities.set_bucket(id, target);
            });
        }
        Ok(entity.update(|state| std::mem::replace(&mut state.position, to)))
    }

    /// Reports damage taken by an entity.
    pub fn entity_damage(&self, id: EntityId, amount: f32) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_damage(id, amount));
        Ok(())
    }

    /// Reports the death of an entity. The entity stays registered.
    pub fn entity_death(&self, id: EntityId) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_death(id));
        Ok(())
    }

    /// Attaches an entity to another one.
    pub fn entity_attach(&self, id: EntityId, holder: EntityId) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.ensure_entity(holder)?;
        self.notify(|observer| observer.entity_attach(id, holder));
        Ok(())
    }

    /// Detaches an entity.
    pub fn entity_detach(&self, id: EntityId) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_detach(id));
        Ok(())
    }

    /// Lets an entity ride another one.
    pub fn entity_ride(&self, id: EntityId, vehicle: EntityId) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.ensure_entity(vehicle)?;
        self.notify(|observer| observer.entity_ride(id, vehicle));
        Ok(())
    }

    /// Ends riding.
    pub fn entity_leave_ride(&self, id: EntityId) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_leave_ride(id));
        Ok(())
    }

    /// Plays an animation.
    pub fn entity_animation(&self, id: EntityId, animation: u8) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_animation(id, animation));
        Ok(())
    }

    /// Triggers an entity status event.
    pub fn entity_event(&self, id: EntityId, event: u8) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_event(id, event));
        Ok(())
    }

    /// Applies an effect.
    pub fn entity_add_effect(
        &self,
        id: EntityId,
        effect: u32,
        amplifier: u8,
        duration: u32,
    ) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_add_effect(id, effect, amplifier, duration));
        Ok(())
    }

    /// Removes an effect.
    pub fn entity_remove_effect(&self, id: EntityId, effect: u32) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_remove_effect(id, effect));
        Ok(())
    }

    /// Reports progress of an entity breaking a block.
    pub fn entity_break(&self, id: EntityId, pos: BlockPos, stage: u8) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_break(id, pos, stage));
        Ok(())
    }

    /// Reports that an entity stopped breaking a block.
    pub fn entity_cancel_break(&self, id: EntityId, pos: BlockPos) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_cancel_break(id, pos));
        Ok(())
    }

    /// Reports that an entity finished breaking a block.
    pub fn entity_finish_break(&self, id: EntityId, pos: BlockPos) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_finish_break(id, pos));
        Ok(())
    }

    /// Reports that an entity placed a block.
    pub fn entity_place(
        &self,
        id: EntityId,
        pos: BlockPos,
        block: BlockId,
    ) -> Result<(), WorldError> {
        self.ensure_entity(id)?;
        self.notify(|observer| observer.entity_place(id, pos, block));
        Ok(())
    }

    // spatial queries

    /// Collects the entities stored in the given columns whose position passes `filter`.
    fn collect_entities(
        &self,
        columns: impl IntoIterator<Item = ChunkPos>,
        slots: Option<RangeInclusive<u32>>,
        filter: impl Fn(DVec3) -> bool,
    ) -> Vec<EntityHandle> {
        self.with_state(|state| {
            let mut seen = HashSet::new();
            let mut found = Vec::new();
            for pos in columns {
                let Some(chunk) = state.chunks.get_or_none(pos) else {
                    continue;
                };
                let ids: Vec<EntityId> = chunk.read(|data| {
                    data.sections()
                        .filter(|(y_index, _)| {
                            slots.as_ref().is_none_or(|slots| slots.contains(y_index))
                        })
                        .flat_map(|(_, section)| section.entities().iter().copied())
                        .collect()
                });
                for id in ids {
                    if !seen.insert(id) {
                        continue;
                    }
                    if let Some(entity) = state.entities.get(id) {
                        if filter(entity.position()) {
                            found.push(entity);
                        }
                    }
                }
            }
            found
        })
    }

    fn slots_of(&self, aabb: &Aabb) -> RangeInclusive<u32> {
        let layout = self.layout();
        layout.clamped_y_index(aabb.min.y)..=layout.clamped_y_index(aabb.max.y)
    }

    /// Calls `callback` for every entity stored in the given column. Returns the number of
    /// visited entities.
    pub fn for_each_entity_in_chunk(
        &self,
        pos: ChunkPos,
        callback: impl FnMut(&EntityHandle),
    ) -> usize {
        let _guard = self.state.lock();
        let entities = self.collect_entities([pos], None, |_| true);
        visit_entities(&entities, callback)
    }

    /// Calls `callback` for every entity stored in the given section.
    pub fn for_each_entity_in_sub_chunk(
        &self,
        pos: SubChunkPos,
        callback: impl FnMut(&EntityHandle),
    ) -> usize {
        let _guard = self.state.lock();
        let entities = self.collect_entities(
            [pos.chunk_pos()],
            Some(pos.y_index..=pos.y_index),
            |_| true,
        );
        visit_entities(&entities, callback)
    }

    /// Calls `callback` for every entity within the given box.
    pub fn for_each_entity_in_bounds(
        &self,
        aabb: Aabb,
        callback: impl FnMut(&EntityHandle),
    ) -> usize {
        let _guard = self.state.lock();
        let columns = self.with_state(|state| state.chunks.positions_in(&aabb));
        let entities = self.collect_entities(
            columns,
            Some(self.slots_of(&aabb)),
            |position| aabb.contains(position),
        );
        visit_entities(&entities, callback)
    }

    /// Calls `callback` for every entity within `radius` around `center`.
    pub fn for_each_entity_in_radius(
        &self,
        center: DVec3,
        radius: f64,
        shape: Shape,
        callback: impl FnMut(&EntityHandle),
    ) -> usize {
        let _guard = self.state.lock();
        let aabb = Aabb::around(center, radius);
        let columns = self.with_state(|state| state.chunks.positions_in(&aabb));
        let entities = self.collect_entities(
            columns,
            Some(self.slots_of(&aabb)),
            |position| shape.contains(center, radius, position),
        );
        visit_entities(&entities, callback)
    }

    /// Calls `callback` for every entity outside of `radius` but within `bound_radius` around
    /// `center`.
    pub fn for_each_entity_out_of_radius(
        &self,
        center: DVec3,
        radius: f64,
        bound_radius: f64,
        shape: Shape,
        callback: impl FnMut(&EntityHandle),
    ) -> usize {
        let _guard = self.state.lock();
        let aabb = Aabb::around(center, bound_radius);
        let columns = self.with_state(|state| state.chunks.positions_in(&aabb));
        let entities = self.collect_entities(
            columns,
            Some(self.slots_of(&aabb)),
            |position| {
                !shape.contains(center, radius, position)
                    && shape.contains(center, bound_radius, position)
            },
        );
        visit_entities(&entities, callback)
    }

    // tickets

    /// Pins all columns within `radius` columns around `center` and starts loading them.
    pub fn add_loading_ticket(&self, center: ChunkPos, radius: u32) -> LoadingTicket {
        let _guard = self.state.lock();
        let ticket = self.with_state(|state| state.tickets.add(center, radius));
        for pos in ticket.chunks() {
            self.request_chunk_data_weak_gen(pos);
        }
        ticket
    }

    /// Releases a ticket. Returns `false` if it has already been released.
    pub fn remove_loading_ticket(&self, ticket: &LoadingTicket) -> bool {
        self.with_state(|state| state.tickets.remove(ticket))
    }

    // simulation

    /// Runs a single simulation step.
    ///
    /// Advances clock and weather, keeps pinned columns alive, dispatches due scheduled ticks and
    /// random ticks of all fully active columns. Handler failures are logged and counted.
    pub fn tick<R: Rng>(&self, rng: &mut R, now: Instant) -> TickStats {
        let started = Instant::now();
        let _guard = self.state.lock();

        let (tick, weather_changed, random_ticks_enabled, chunks, pinned) =
            self.with_state(|state| {
                state.current_tick += 1;
                let weather_changed = state.metadata.tick(|active| {
                    if active {
                        rng.random_range(12_000..24_000)
                    } else {
                        rng.random_range(12_000..180_000)
                    }
                });
                state.tickets.prune();
                let chunks = state.chunks.snapshot();
                let pinned: Vec<bool> = chunks
                    .iter()
                    .map(|chunk| state.tickets.covers(chunk.pos()))
                    .collect();
                (
                    state.current_tick,
                    weather_changed,
                    state.metadata.game_rules.do_random_ticks,
                    chunks,
                    pinned,
                )
            });

        let mut stats = TickStats {
            tick,
            weather_changed,
            resident_chunks: chunks.len(),
            ..TickStats::default()
        };

        for (chunk, pinned) in chunks.iter().zip(pinned) {
            if pinned {
                chunk.write(|data| data.touch(now));
            }
            let active = chunk.read(|data| data.load_level() == 0);
            if !active {
                continue;
            }

            let due = chunk.write(|data| data.ticks_mut().drain_due(tick));
            for (kind, scheduled) in due {
                let block = chunk
                    .read(|data| data.block(scheduled.pos))
                    .ok()
                    .flatten()
                    .unwrap_or(BlockId::AIR);
                stats.scheduled_ticks += 1;
                let result = guarded(|| {
                    self.blocks
                        .scheduled_tick(self, scheduled.pos, block, kind)
                });
                if !self.report("a scheduled tick", result) {
                    stats.handler_failures += 1;
                }
            }

            if random_ticks_enabled && self.settings.random_tick_speed > 0 {
                for (pos, block) in self.pick_random_blocks(chunk, rng) {
                    stats.random_ticks += 1;
                    let result = guarded(|| self.blocks.random_tick(self, pos, block));
                    if !self.report("a random tick", result) {
                        stats.handler_failures += 1;
                    }
                }
            }
        }

        stats.duration = started.elapsed();
        *self.last_tick.lock() = stats;
        stats
    }

    /// Samples `random_tick_speed` positions of the column and keeps the blocks which want
    /// random ticks. Positions in sections which aren't materialized hold air.
    fn pick_random_blocks<R: Rng>(
        &self,
        chunk: &Chunk,
        rng: &mut R,
    ) -> Vec<(BlockPos, BlockId)> {
        let layout = self.layout();
        if layout.chunk_y_count == 0 {
            return Vec::new();
        }
        chunk.read(|data| {
            (0..self.settings.random_tick_speed)
                .filter_map(|_| {
                    let y_index = rng.random_range(0..layout.chunk_y_count);
                    let index = LocalIndex::from(rng.random_range(0..=u16::from(LocalIndex::MAX)));
                    let block = data
                        .section(y_index)
                        .map_or(BlockId::AIR, |section| section.block(index));
                    self.blocks.block_info(block).random_ticks.then(|| {
                        let pos =
                            layout.block_in_section(data.sub_chunk_pos(y_index), index.local());
                        (pos, block)
                    })
                })
                .collect()
        })
    }

    /// Profiling counters of the most recent tick.
    #[must_use]
    pub fn tick_stats(&self) -> TickStats {
        *self.last_tick.lock()
    }

    // life cycle

    /// Writes a record in the background.
    ///
    /// Saves of the same column never overlap; a record submitted while another one is written
    /// replaces any record queued behind it. The column is marked dirty again if a write fails.
    fn spawn_save(&self, chunk: &ChunkHandle, record: ChunkRecord) {
        let pos = chunk.pos();
        let Some(record) = self.pending_saves.submit(pos, record) else {
            trace!("world '{name}': queued save of chunk {pos}", name = self.name);
            return;
        };
        let storage = Arc::clone(&self.storage);
        let saves = Arc::clone(&self.pending_saves);
        let chunk = Arc::downgrade(chunk);
        let name = self.name.clone();
        drop(self.runtime.spawn_blocking(move || {
            let mut next = Some(record);
            while let Some(record) = next {
                let result = guarded(|| storage.store_chunk(pos, &record)).map_err(|error| {
                    error!("world '{name}': failed to save chunk {pos}: {error:#}");
                    if let Some(chunk) = chunk.upgrade() {
                        chunk.write(ChunkData::mark_dirty);
                    }
                    WorldError::storage(&error.context(format!("saving chunk {pos}")))
                });
                if result.is_ok() {
                    trace!("world '{name}': saved chunk {pos}");
                }
                saves.complete(pos, result);
                next = saves.next(pos);
            }
        }));
    }

    fn entity_records(&self, pos: ChunkPos) -> HashMap<EntityId, EntityRecord> {
        self.with_state(|state| {
            state
                .entities
                .ids_in_chunk(pos)
                .into_iter()
                .filter_map(|id| Some((id, state.entities.get(id)?.to_record())))
                .collect()
        })
    }

    /// Saves a resident column if it changed. Returns whether a save has been started.
    ///
    /// The save runs in the background; its outcome is reported by
    /// [`Self::await_save_chunks`].
    pub fn save_chunk(&self, pos: ChunkPos) -> Result<bool, WorldError> {
        let _guard = self.state.lock();
        let chunk = self
            .request_chunk_data_weak(pos)
            .ok_or(WorldError::ChunkNotLoaded(pos))?;
        let entities = self.entity_records(pos);
        let tick = self.current_tick();
        let record = chunk.write(|data| {
            if !data.is_dirty() && entities.is_empty() {
                return None;
            }
            data.mark_clean();
            Some(data.to_record(tick, |id| entities.get(&id).cloned()))
        });
        let started = record.is_some();
        if let Some(record) = record {
            self.spawn_save(&chunk, record);
        }
        Ok(started)
    }

    /// Saves the metadata and starts saving every changed column without unloading anything.
    pub fn save(&self) -> Result<(), WorldError> {
        let _guard = self.state.lock();
        let chunks = self.with_state(|state| state.chunks.snapshot());
        let mut saved = 0;
        for chunk in chunks {
            if self.save_chunk(chunk.pos())? {
                saved += 1;
            }
        }
        let metadata = self.metadata();
        guarded(|| self.storage.store_metadata(&metadata))
            .map_err(|error| WorldError::storage(&error))?;
        debug!("world '{name}': saving {saved} chunks", name = self.name);
        Ok(())
    }

    /// Blocks until all started saves have been written.
    ///
    /// Fails if any save since the previous call failed. The affected columns stay resident and
    /// dirty, so a later save retries them.
    pub fn await_save_chunks(&self) -> Result<(), WorldError> {
        while !self.pending_saves.wait_all(Duration::from_secs(1)) {
            debug!(
                "world '{name}': waiting for {count} saves",
                name = self.name,
                count = self.pending_saves.total()
            );
        }
        let mut failures = self.pending_saves.take_failures();
        if failures.is_empty() {
            return Ok(());
        }
        error!(
            "world '{name}': {count} chunks could not be saved",
            name = self.name,
            count = failures.len()
        );
        Err(failures.swap_remove(0).1)
    }

    /// Evicts columns which have been idle for longer than the chunk lifetime.
    ///
    /// Columns pinned by a ticket, with pending saves, or which are still referenced (directly or
    /// through one of their entities) are kept. Changed columns are written before they are
    /// dropped; a column whose write fails stays resident and dirty, and the failure is reported
    /// by the next [`Self::await_save_chunks`]. At most `unload_budget` columns are evicted; the
    /// budget is decremented accordingly.
    ///
    /// Returns `true` if the world is completely idle afterwards: no resident columns, no pending
    /// loads and no pending saves.
    pub fn collect_unused_data(&self, now: Instant, unload_budget: &mut usize) -> bool {
        let _guard = self.state.lock();
        let candidates = self.with_state(|state| {
            state.tickets.prune();
            state
                .chunks
                .snapshot()
                .into_iter()
                .filter(|chunk| !state.tickets.covers(chunk.pos()))
                .collect::<Vec<_>>()
        });

        for chunk in candidates {
            if *unload_budget == 0 {
                break;
            }
            let pos = chunk.pos();
            let idle_for = now.saturating_duration_since(chunk.read(ChunkData::last_usage));
            if idle_for < self.settings.chunk_lifetime || self.pending_saves.count(pos) > 0 {
                continue;
            }
            // one reference is held by the column map, one by this loop
            if Arc::strong_count(&chunk) > 2 {
                trace!("world '{name}': chunk {pos} is still referenced", name = self.name);
                continue;
            }

            let entities = self.with_state(|state| {
                let entities: Vec<EntityHandle> = state
                    .entities
                    .ids_in_chunk(pos)
                    .into_iter()
                    .filter_map(|id| state.entities.get(id))
                    .collect();
                // the index holds one reference, the vector another one
                let held = entities
                    .iter()
                    .any(|entity| Arc::strong_count(entity) > 2);
                (!held).then_some(entities)
            });
            let Some(entities) = entities else {
                continue;
            };

            if let Err(error) = self.store_evicted(&chunk, &entities) {
                error!("world '{name}': keeping chunk {pos}: {error}", name = self.name);
                self.pending_saves.complete(pos, Err(error));
                continue;
            }
            self.with_state(|state| {
                for entity in &entities {
                    state.entities.remove(entity.id());
                }
                state.chunks.remove(pos);
            });
            debug!("world '{name}': evicted chunk {pos}", name = self.name);
            for entity in &entities {
                self.notify(|observer| observer.entity_deinit(entity.id()));
            }
            self.notify(|observer| observer.notify_chunk_unload(pos));
            *unload_budget -= 1;
        }

        self.with_state(|state| state.chunks.is_empty() && state.loads.is_empty())
            && self.pending_saves.total() == 0
    }

    /// Writes a column about to be evicted, if it changed. The column is only marked clean once
    /// the write succeeded.
    fn store_evicted(&self, chunk: &Chunk, entities: &[EntityHandle]) -> Result<(), WorldError> {
        let pos = chunk.pos();
        let tick = self.current_tick();
        let entities: HashMap<EntityId, EntityRecord> = entities
            .iter()
            .map(|entity| (entity.id(), entity.to_record()))
            .collect();
        let record = chunk.read(|data| {
            (data.is_dirty() || !entities.is_empty())
                .then(|| data.to_record(tick, |id| entities.get(&id).cloned()))
        });
        let Some(record) = record else {
            return Ok(());
        };
        guarded(|| self.storage.store_chunk(pos, &record))
            .map_err(|error| WorldError::storage(&error.context(format!("saving chunk {pos}"))))?;
        chunk.write(ChunkData::mark_clean);
        self.pending_saves.complete(pos, Ok(()));
        trace!("world '{name}': saved chunk {pos}", name = self.name);
        Ok(())
    }

    /// Waits for all in-flight loads, saves everything and waits for the saves to complete.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread holds the world lock.
    pub fn shutdown(&self) -> Result<(), WorldError> {
        assert!(
            !self.state.is_owned_by_current_thread(),
            "shutdown of world '{name}' while holding its lock",
            name = self.name
        );
        let loads = self.with_state(|state| state.loads.futures());
        for load in loads {
            // failed loads have nothing to save
            drop(pollster::block_on(load));
        }
        self.save()?;
        self.await_save_chunks()?;
        info!("world '{name}' has been shut down", name = self.name);
        Ok(())
    }
}

fn visit_entities(entities: &[EntityHandle], mut callback: impl FnMut(&EntityHandle)) -> usize {
    for entity in entities {
        callback(entity);
    }
    entities.len()
}

/// All block positions of the inclusive box spanned by two corners.
fn box_positions(from: BlockPos, to: BlockPos) -> impl Iterator<Item = BlockPos> {
    let min = from.0.min(to.0);
    let max = from.0.max(to.0);
    (min.z..=max.z).flat_map(move |z| {
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| BlockPos::new(x, y, z)))
    })
}
