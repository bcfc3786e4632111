//! Contains a single 16×16×16 section of a chunk column.

use std::{
    collections::{HashMap, HashSet},
    ops::{Index, IndexMut},
};

use strata_core::{BiomeId, BlockEntityKind, BlockId, EntityId, LocalIndex};

/// Holds one value per block of a section.
#[derive(Clone, Debug, PartialEq)]
pub struct SectionArray<T>(Box<[T; LocalIndex::COUNT]>);

impl<T: Copy> SectionArray<T> {
    /// Creates an array with every entry set to `value`.
    #[must_use]
    pub fn filled(value: T) -> Self {
        Self(Box::new([value; LocalIndex::COUNT]))
    }

    /// Returns all entries in [`LocalIndex`] order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        self.0.as_slice()
    }

    /// Builds an array from a slice in [`LocalIndex`] order.
    /// Returns `None` if the slice doesn't have exactly [`LocalIndex::COUNT`] entries.
    #[must_use]
    pub fn from_slice(values: &[T]) -> Option<Self> {
        let array: &[T; LocalIndex::COUNT] = values.try_into().ok()?;
        Some(Self(Box::new(*array)))
    }
}

impl<T> Index<LocalIndex> for SectionArray<T> {
    type Output = T;

    fn index(&self, index: LocalIndex) -> &Self::Output {
        #[expect(
            clippy::indexing_slicing,
            reason = "LocalIndex by construction is guaranteed to be within bounds"
        )]
        &self.0[usize::from(index)]
    }
}

impl<T> IndexMut<LocalIndex> for SectionArray<T> {
    fn index_mut(&mut self, index: LocalIndex) -> &mut Self::Output {
        #[expect(
            clippy::indexing_slicing,
            reason = "LocalIndex by construction is guaranteed to be within bounds"
        )]
        &mut self.0[usize::from(index)]
    }
}

/// Biomes are stored in cells of 4×4×4 blocks.
pub const BIOME_CELLS: usize = 64;

/// An opaque structured payload attached to a single block (chest contents, sign text, …).
#[derive(Clone, Debug, PartialEq)]
pub struct BlockEntity {
    /// type of the payload
    pub kind: BlockEntityKind,
    /// the payload itself; interpreted by the registry and the protocol layer only
    pub payload: serde_json::Value,
}

/// One 16×16×16 section of a chunk column.
///
/// Entities are referenced by id only; the [`EntityIndex`](super::entity::EntityIndex) owns them.
#[derive(Clone, Debug)]
pub struct SubChunkData {
    blocks: SectionArray<BlockId>,
    biomes: [BiomeId; BIOME_CELLS],
    sky_light: SectionArray<u8>,
    block_light: SectionArray<u8>,
    block_entities: HashMap<LocalIndex, BlockEntity>,
    entities: HashSet<EntityId>,
    non_air_count: u16,
}

impl SubChunkData {
    /// Creates a section consisting of air only.
    #[must_use]
    pub fn empty(biome: BiomeId) -> Self {
        Self::filled(BlockId::AIR, biome)
    }

    /// Creates a section consisting of a single kind of block.
    #[must_use]
    pub fn filled(block: BlockId, biome: BiomeId) -> Self {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "a section holds 4096 blocks which fits into u16"
        )]
        let non_air_count = if block.is_air() {
            0
        } else {
            LocalIndex::COUNT as u16
        };
        Self {
            blocks: SectionArray::filled(block),
            biomes: [biome; BIOME_CELLS],
            sky_light: SectionArray::filled(0),
            block_light: SectionArray::filled(0),
            block_entities: HashMap::new(),
            entities: HashSet::new(),
            non_air_count,
        }
    }

    /// Creates a section from a dense block array.
    #[must_use]
    pub fn from_blocks(blocks: SectionArray<BlockId>, biomes: [BiomeId; BIOME_CELLS]) -> Self {
        let non_air = blocks.as_slice().iter().filter(|block| !block.is_air()).count();
        Self {
            non_air_count: u16::try_from(non_air).unwrap_or(u16::MAX),
            blocks,
            biomes,
            sky_light: SectionArray::filled(0),
            block_light: SectionArray::filled(0),
            block_entities: HashMap::new(),
            entities: HashSet::new(),
        }
    }

    /// Returns the block at the given index.
    #[must_use]
    pub fn block(&self, index: LocalIndex) -> BlockId {
        self.blocks[index]
    }

    /// Replaces the block at the given index and returns the previous one.
    ///
    /// This does not touch the block entity at this position.
    pub fn set_block(&mut self, index: LocalIndex, block: BlockId) -> BlockId {
        let old = std::mem::replace(&mut self.blocks[index], block);
        match (old.is_air(), block.is_air()) {
            (true, false) => self.non_air_count += 1,
            (false, true) => self.non_air_count -= 1,
            _ => {}
        }
        old
    }

    /// All blocks in [`LocalIndex`] order.
    #[must_use]
    pub fn blocks(&self) -> &SectionArray<BlockId> {
        &self.blocks
    }

    /// Returns whether the section contains only air.
    #[must_use]
    pub fn is_air(&self) -> bool {
        self.non_air_count == 0
    }

    fn biome_cell(index: LocalIndex) -> usize {
        let local = index.local();
        usize::from((local.x >> 2) | ((local.y >> 2) << 2) | ((local.z >> 2) << 4))
    }

    /// Returns the biome of the cell containing the given block.
    #[must_use]
    pub fn biome(&self, index: LocalIndex) -> BiomeId {
        self.biomes
            .get(Self::biome_cell(index))
            .copied()
            .unwrap_or_default()
    }

    /// Sets the biome of the cell containing the given block. Returns `true` if it changed.
    pub fn set_biome(&mut self, index: LocalIndex, biome: BiomeId) -> bool {
        match self.biomes.get_mut(Self::biome_cell(index)) {
            Some(cell) if *cell != biome => {
                *cell = biome;
                true
            }
            _ => false,
        }
    }

    /// All biome cells.
    #[must_use]
    pub fn biomes(&self) -> &[BiomeId; BIOME_CELLS] {
        &self.biomes
    }

    /// Returns the sky light level at the given index.
    #[must_use]
    pub fn sky_light(&self, index: LocalIndex) -> u8 {
        self.sky_light[index]
    }

    /// Returns the block light level at the given index.
    #[must_use]
    pub fn block_light(&self, index: LocalIndex) -> u8 {
        self.block_light[index]
    }

    /// Stores both light levels of a single block.
    pub fn set_light(&mut self, index: LocalIndex, sky: u8, block: u8) {
        self.sky_light[index] = sky.min(15);
        self.block_light[index] = block.min(15);
    }

    /// Returns the block entity at the given index.
    #[must_use]
    pub fn block_entity(&self, index: LocalIndex) -> Option<&BlockEntity> {
        self.block_entities.get(&index)
    }

    /// Attaches a block entity and returns the one it replaced.
    ///
    /// Callers are responsible for checking that the block at this position can hold one.
    pub fn insert_block_entity(
        &mut self,
        index: LocalIndex,
        block_entity: BlockEntity,
    ) -> Option<BlockEntity> {
        self.block_entities.insert(index, block_entity)
    }

    /// Detaches the block entity at the given index.
    pub fn remove_block_entity(&mut self, index: LocalIndex) -> Option<BlockEntity> {
        self.block_entities.remove(&index)
    }

    /// All block entities of this section.
    pub fn block_entities(&self) -> impl Iterator<Item = (LocalIndex, &BlockEntity)> {
        self.block_entities
            .iter()
            .map(|(&index, block_entity)| (index, block_entity))
    }

    /// Ids of all entities currently stored in this section.
    #[must_use]
    pub fn entities(&self) -> &HashSet<EntityId> {
        &self.entities
    }

    pub(crate) fn insert_entity(&mut self, id: EntityId) -> bool {
        self.entities.insert(id)
    }

    pub(crate) fn remove_entity(&mut self, id: EntityId) -> bool {
        self.entities.remove(&id)
    }
}
