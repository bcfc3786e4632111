//! Chunk columns: their sections, height maps, tick queues and generation progress.

use std::{sync::Arc, time::Instant};

use parking_lot::Mutex;
use strata_core::{
    BiomeId, BlockId, BlockPos, ChunkLayout, ChunkPos, EntityId, LocalIndex, SECTION_SIZE,
    SubChunkPos,
};

use super::{
    WorldError,
    block_registry::BlockRegistry,
    storage::record::{
        BlockEntityRecord, ChunkRecord, EntityRecord, HeightMapsRecord, SubChunkRecord, TickRecord,
    },
    sub_chunk::{BIOME_CELLS, BlockEntity, SectionArray, SubChunkData},
    tick_schedule::{ScheduledTick, TickKind, TickScheduler},
};

/// Value of [`ChunkData::generator_stage`] once generation has finished.
pub const GENERATION_COMPLETE: u8 = 0xFF;

/// Number of block columns in a chunk column.
const COLUMNS: usize = 256;

/// The kinds of height maps maintained per column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeightMapKind {
    /// highest non-air block
    WorldSurface,
    /// highest block which stops motion
    MotionBlocking,
}

/// One height value per block column and [`HeightMapKind`].
///
/// A value is the y coordinate _above_ the highest matching block, or the lowest y coordinate of
/// the world if no block matches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeightMaps {
    world_surface: Box<[i64; COLUMNS]>,
    motion_blocking: Box<[i64; COLUMNS]>,
}

fn column_index(x: u16, z: u16) -> usize {
    usize::from(x & 15) + 16 * usize::from(z & 15)
}

impl HeightMaps {
    fn filled(height: i64) -> Self {
        Self {
            world_surface: Box::new([height; COLUMNS]),
            motion_blocking: Box::new([height; COLUMNS]),
        }
    }

    fn map(&self, kind: HeightMapKind) -> &[i64; COLUMNS] {
        match kind {
            HeightMapKind::WorldSurface => &self.world_surface,
            HeightMapKind::MotionBlocking => &self.motion_blocking,
        }
    }

    /// Returns the height of a column given in section-local coordinates.
    #[must_use]
    pub fn get(&self, kind: HeightMapKind, x: u16, z: u16) -> i64 {
        self.map(kind)
            .get(column_index(x, z))
            .copied()
            .unwrap_or_default()
    }

    fn set(&mut self, x: u16, z: u16, world_surface: i64, motion_blocking: i64) {
        let index = column_index(x, z);
        if let Some(slot) = self.world_surface.get_mut(index) {
            *slot = world_surface;
        }
        if let Some(slot) = self.motion_blocking.get_mut(index) {
            *slot = motion_blocking;
        }
    }

    fn from_record(record: &HeightMapsRecord) -> Option<Self> {
        let world_surface: [i64; COLUMNS] = record.world_surface.as_slice().try_into().ok()?;
        let motion_blocking: [i64; COLUMNS] = record.motion_blocking.as_slice().try_into().ok()?;
        Some(Self {
            world_surface: Box::new(world_surface),
            motion_blocking: Box::new(motion_blocking),
        })
    }
}

/// A single chunk column.
#[derive(Debug)]
pub struct ChunkData {
    pos: ChunkPos,
    layout: ChunkLayout,
    sections: Vec<Option<Box<SubChunkData>>>,
    height_maps: Option<HeightMaps>,
    ticks: TickScheduler,
    load_level: u8,
    generator_stage: u8,
    dirty: bool,
    last_usage: Instant,
}

impl ChunkData {
    /// Creates an empty column. No section is materialized and generation hasn't started.
    #[must_use]
    pub fn new(pos: ChunkPos, layout: ChunkLayout) -> Self {
        Self {
            pos,
            layout,
            sections: (0..layout.chunk_y_count).map(|_| None).collect(),
            height_maps: None,
            ticks: TickScheduler::default(),
            load_level: 0,
            generator_stage: 0,
            dirty: true,
            last_usage: Instant::now(),
        }
    }

    /// Position of this column.
    #[must_use]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Vertical layout of this column.
    #[must_use]
    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    /// Current generation progress.
    #[must_use]
    pub fn generator_stage(&self) -> u8 {
        self.generator_stage
    }

    /// Returns `true` once generation has finished.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.generator_stage == GENERATION_COMPLETE
    }

    /// Moves generation forward to `stage`.
    ///
    /// # Panics
    ///
    /// Panics if `stage` doesn't lie beyond the current stage.
    pub fn advance_stage(&mut self, stage: u8) {
        assert!(
            stage > self.generator_stage,
            "generator stage of chunk {pos} must increase ({old} -> {stage})",
            pos = self.pos,
            old = self.generator_stage,
        );
        self.generator_stage = stage;
        self.dirty = true;
    }

    /// Fails with [`WorldError::NotGenerated`] unless generation has finished.
    pub fn ensure_generated(&self) -> Result<(), WorldError> {
        if self.is_generated() {
            Ok(())
        } else {
            Err(WorldError::NotGenerated(self.pos))
        }
    }

    /// Load level of this column; `0` is fully active.
    #[must_use]
    pub fn load_level(&self) -> u8 {
        self.load_level
    }

    /// Makes a completely generated column fully active. Columns restored with the load level
    /// they were saved at stay at that level until generation has finished.
    pub fn activate(&mut self) {
        if self.is_generated() {
            self.load_level = 0;
        }
    }

    /// Returns the section at the given slot if it has been materialized.
    #[must_use]
    pub fn section(&self, y_index: u32) -> Option<&SubChunkData> {
        self.sections
            .get(usize::try_from(y_index).ok()?)?
            .as_deref()
    }

    /// Returns the section at the given slot if it has been materialized.
    pub fn section_mut(&mut self, y_index: u32) -> Option<&mut SubChunkData> {
        self.sections
            .get_mut(usize::try_from(y_index).ok()?)?
            .as_deref_mut()
    }

    /// Stores a section in the given slot and returns the previous one.
    ///
    /// # Panics
    ///
    /// Panics if the slot lies outside the layout of this column.
    pub fn insert_section(
        &mut self,
        y_index: u32,
        section: SubChunkData,
    ) -> Option<Box<SubChunkData>> {
        let slot = usize::try_from(y_index)
            .ok()
            .and_then(|index| self.sections.get_mut(index));
        let Some(slot) = slot else {
            panic!(
                "section #{y_index} lies outside of chunk {pos} with {count} sections",
                pos = self.pos,
                count = self.layout.chunk_y_count
            );
        };
        self.dirty = true;
        slot.replace(Box::new(section))
    }

    /// Iterates all materialized sections together with their slot.
    pub fn sections(&self) -> impl Iterator<Item = (u32, &SubChunkData)> {
        (0..self.layout.chunk_y_count)
            .zip(self.sections.iter())
            .filter_map(|(y_index, section)| Some((y_index, section.as_deref()?)))
    }

    /// Iterates all materialized sections together with their slot.
    pub fn sections_mut(&mut self) -> impl Iterator<Item = (u32, &mut SubChunkData)> {
        (0..self.layout.chunk_y_count)
            .zip(self.sections.iter_mut())
            .filter_map(|(y_index, section)| Some((y_index, section.as_deref_mut()?)))
    }

    /// Returns the position of the section at the given slot.
    #[must_use]
    pub fn sub_chunk_pos(&self, y_index: u32) -> SubChunkPos {
        self.pos.sub_chunk(y_index)
    }

    /// Resolves a block position into its section slot and local index.
    ///
    /// # Panics
    ///
    /// Panics if the block belongs to a different column.
    pub fn locate(&self, pos: BlockPos) -> Result<(u32, LocalIndex), WorldError> {
        assert_eq!(
            pos.chunk_pos(),
            self.pos,
            "block {pos} doesn't belong to chunk {chunk}",
            chunk = self.pos
        );
        let y_index = self
            .layout
            .y_index(pos.0.y)
            .ok_or(WorldError::OutOfBounds(pos))?;
        Ok((y_index, pos.local_index()))
    }

    /// Returns the block at the given position, or `None` if its section isn't materialized.
    pub fn block(&self, pos: BlockPos) -> Result<Option<BlockId>, WorldError> {
        let (y_index, index) = self.locate(pos)?;
        Ok(self.section(y_index).map(|section| section.block(index)))
    }

    /// Returns the block entity at the given position.
    pub fn block_entity(&self, pos: BlockPos) -> Result<Option<&BlockEntity>, WorldError> {
        let (y_index, index) = self.locate(pos)?;
        Ok(self
            .section(y_index)
            .and_then(|section| section.block_entity(index)))
    }

    /// Returns the biome at the given position, or `None` if its section isn't materialized.
    pub fn biome(&self, pos: BlockPos) -> Result<Option<BiomeId>, WorldError> {
        let (y_index, index) = self.locate(pos)?;
        Ok(self.section(y_index).map(|section| section.biome(index)))
    }

    /// The scheduled ticks of this column.
    #[must_use]
    pub fn ticks(&self) -> &TickScheduler {
        &self.ticks
    }

    /// The scheduled ticks of this column.
    pub fn ticks_mut(&mut self) -> &mut TickScheduler {
        &mut self.ticks
    }

    /// Returns whether the column changed since it has been loaded or saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flags the column as changed.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// The last time this column has been used.
    #[must_use]
    pub fn last_usage(&self) -> Instant {
        self.last_usage
    }

    /// Resets the idle timer of this column.
    pub fn touch(&mut self, now: Instant) {
        self.last_usage = self.last_usage.max(now);
    }

    /// The height maps of this column; missing until computed after load or generation.
    #[must_use]
    pub fn height_maps(&self) -> Option<&HeightMaps> {
        self.height_maps.as_ref()
    }

    /// Returns a single height value; `x` and `z` are section-local.
    #[must_use]
    pub fn height(&self, kind: HeightMapKind, x: u16, z: u16) -> Option<i64> {
        Some(self.height_maps.as_ref()?.get(kind, x, z))
    }

    fn scan_column(&self, x: u16, z: u16, registry: &dyn BlockRegistry) -> (i64, i64) {
        let mut world_surface = None;
        let mut motion_blocking = None;
        for (y_index, section) in self.sections().collect::<Vec<_>>().into_iter().rev() {
            if section.is_air() {
                continue;
            }
            let base = self.layout.world_y_offset + i64::from(y_index) * SECTION_SIZE;
            for local_y in (0..16_u16).rev() {
                let block = section.block(LocalIndex::from_local(x, local_y, z));
                if block.is_air() {
                    continue;
                }
                let above = base + i64::from(local_y) + 1;
                world_surface.get_or_insert(above);
                if registry.block_info(block).blocks_motion {
                    motion_blocking = Some(above);
                    break;
                }
            }
            if motion_blocking.is_some() {
                break;
            }
        }
        let floor = self.layout.min_y();
        (
            world_surface.unwrap_or(floor),
            motion_blocking.unwrap_or(floor),
        )
    }

    /// Recomputes all height maps from the block data.
    pub fn recompute_height_maps(&mut self, registry: &dyn BlockRegistry) {
        let mut height_maps = HeightMaps::filled(self.layout.min_y());
        for z in 0..16 {
            for x in 0..16 {
                let (world_surface, motion_blocking) = self.scan_column(x, z, registry);
                height_maps.set(x, z, world_surface, motion_blocking);
            }
        }
        self.height_maps = Some(height_maps);
    }

    /// Updates the height maps after a block of the given column changed.
    pub fn update_height_column(&mut self, x: u16, z: u16, registry: &dyn BlockRegistry) {
        if self.height_maps.is_none() {
            return;
        }
        let (world_surface, motion_blocking) = self.scan_column(x, z, registry);
        if let Some(height_maps) = &mut self.height_maps {
            height_maps.set(x, z, world_surface, motion_blocking);
        }
    }

    /// Converts this column into its persisted form.
    ///
    /// `entity_record` resolves the entities referenced by the sections. Scheduled ticks are
    /// stored relative to `current_tick`.
    pub fn to_record(
        &self,
        current_tick: u64,
        entity_record: impl Fn(EntityId) -> Option<EntityRecord>,
    ) -> ChunkRecord {
        let materialized = self.sections.iter().any(Option::is_some);
        let sub_chunks = materialized.then(|| {
            self.sections
                .iter()
                .map(|section| {
                    section
                        .as_deref()
                        .map(|section| sub_chunk_record(section, &entity_record))
                })
                .collect()
        });

        let mut queried_for_tick = Vec::with_capacity(self.ticks.len());
        for kind in [TickKind::Block, TickKind::Liquid] {
            queried_for_tick.extend(self.ticks.queue(kind).iter().map(|tick| TickRecord {
                x: tick.pos.0.x,
                y: tick.pos.0.y,
                z: tick.pos.0.z,
                due_in: tick.due_tick.saturating_sub(current_tick),
                priority: tick.priority,
                liquid: kind == TickKind::Liquid,
            }));
        }

        ChunkRecord {
            sub_chunks,
            queried_for_tick,
            generator_stage: self.generator_stage,
            resume_gen_level: self.load_level,
            height_maps: None,
        }
    }

    /// Restores a column from its persisted form.
    ///
    /// Entities are returned separately together with the slot of their section since the caller
    /// needs to register them.
    pub fn from_record(
        pos: ChunkPos,
        layout: ChunkLayout,
        record: ChunkRecord,
        current_tick: u64,
        registry: &dyn BlockRegistry,
    ) -> Result<(Self, Vec<(u32, EntityRecord)>), WorldError> {
        let corrupt = |reason: String| WorldError::LoadFailure {
            pos,
            reason: reason.into(),
        };

        let mut chunk = Self::new(pos, layout);
        chunk.generator_stage = record.generator_stage;
        chunk.load_level = record.resume_gen_level;
        let mut entities = Vec::new();

        if let Some(sub_chunks) = record.sub_chunks {
            if sub_chunks.len() != chunk.sections.len() {
                return Err(corrupt(format!(
                    "expected {} sections but found {}",
                    chunk.sections.len(),
                    sub_chunks.len()
                )));
            }
            for (y_index, sub_chunk) in (0..layout.chunk_y_count).zip(sub_chunks) {
                let Some(sub_chunk) = sub_chunk else {
                    continue;
                };
                let (section, section_entities) =
                    section_from_record(sub_chunk, registry).map_err(|reason| {
                        corrupt(format!("section #{y_index}: {reason}"))
                    })?;
                chunk.insert_section(y_index, section);
                entities.extend(
                    section_entities
                        .into_iter()
                        .map(|entity| (y_index, entity)),
                );
            }
        }

        for tick in record.queried_for_tick {
            let tick_pos = BlockPos::new(tick.x, tick.y, tick.z);
            if tick_pos.chunk_pos() != pos || !layout.contains_y(tick.y) {
                return Err(corrupt(format!("scheduled tick at {tick_pos} lies outside")));
            }
            let kind = if tick.liquid {
                TickKind::Liquid
            } else {
                TickKind::Block
            };
            let due_tick = current_tick
                .checked_add(tick.due_in)
                .ok_or_else(|| corrupt(format!("scheduled tick at {tick_pos} is due too late")))?;
            chunk.ticks.queue_mut(kind).schedule(ScheduledTick {
                pos: tick_pos,
                due_tick,
                priority: tick.priority,
            });
        }

        chunk.height_maps = record.height_maps.as_ref().and_then(HeightMaps::from_record);
        chunk.dirty = false;
        Ok((chunk, entities))
    }
}

fn sub_chunk_record(
    section: &SubChunkData,
    entity_record: &impl Fn(EntityId) -> Option<EntityRecord>,
) -> SubChunkRecord {
    let block_entities = section
        .block_entities()
        .map(|(index, block_entity)| {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "local coordinates are below 16"
            )]
            let [x, y, z] = index.local().to_array().map(|coord| coord as u8);
            BlockEntityRecord {
                x,
                y,
                z,
                type_id: block_entity.kind,
                payload: block_entity.payload.clone(),
            }
        })
        .collect();
    let mut entity_ids: Vec<_> = section.entities().iter().copied().collect();
    entity_ids.sort_unstable();
    SubChunkRecord {
        blocks: section.blocks().as_slice().to_vec(),
        biomes: section.biomes().to_vec(),
        block_entities,
        entities: entity_ids.into_iter().filter_map(entity_record).collect(),
    }
}

fn section_from_record(
    record: SubChunkRecord,
    registry: &dyn BlockRegistry,
) -> Result<(SubChunkData, Vec<EntityRecord>), String> {
    let blocks = SectionArray::from_slice(&record.blocks)
        .ok_or_else(|| format!("expected {} blocks", LocalIndex::COUNT))?;
    let biomes: [BiomeId; BIOME_CELLS] = record
        .biomes
        .as_slice()
        .try_into()
        .map_err(|_| format!("expected {BIOME_CELLS} biome cells"))?;
    let mut section = SubChunkData::from_blocks(blocks, biomes);
    for block_entity in record.block_entities {
        let index = LocalIndex::from_local(
            block_entity.x.into(),
            block_entity.y.into(),
            block_entity.z.into(),
        );
        let block = section.block(index);
        if !registry.block_info(block).has_block_entity {
            return Err(format!(
                "block {block} at {local} cannot hold a block entity",
                local = index.local()
            ));
        }
        section.insert_block_entity(
            index,
            BlockEntity {
                kind: block_entity.type_id,
                payload: block_entity.payload,
            },
        );
    }
    Ok((section, record.entities))
}

/// A resident chunk column shared between the world and transient holders.
///
/// Holding a handle keeps the column from being evicted but doesn't grant mutation; all changes go
/// through the [`World`](super::World) API.
#[derive(Debug)]
pub struct Chunk {
    pos: ChunkPos,
    data: Mutex<ChunkData>,
}

/// Reference counted handle to a resident chunk column.
pub type ChunkHandle = Arc<Chunk>;

impl Chunk {
    pub(crate) fn new(data: ChunkData) -> Self {
        Self {
            pos: data.pos(),
            data: Mutex::new(data),
        }
    }

    /// Position of this column.
    #[must_use]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Grants read access to the column data.
    ///
    /// The reader must not call back into the world.
    pub fn read<R>(&self, reader: impl FnOnce(&ChunkData) -> R) -> R {
        reader(&self.data.lock())
    }

    pub(crate) fn write<R>(&self, writer: impl FnOnce(&mut ChunkData) -> R) -> R {
        writer(&mut self.data.lock())
    }
}
