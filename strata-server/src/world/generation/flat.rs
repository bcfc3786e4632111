use anyhow::Result;
use strata_core::{BiomeId, BlockId, ChunkPos, LocalIndex, SECTION_SIZE, SubChunkPos};

use super::{ChunkGenerator, StageMode};
use crate::world::{
    World,
    block_registry::basic,
    chunk::{ChunkData, GENERATION_COMPLETE},
    sub_chunk::{SectionArray, SubChunkData},
};

/// Biome used for columns with an even hash.
pub const PLAINS: BiomeId = BiomeId(1);
/// Biome used for columns with an odd hash.
pub const MEADOW: BiomeId = BiomeId(2);

const TERRAIN: u8 = 0;
const DECORATION: u8 = 1;

/// A horizontal layer of a flat world, counted upwards from the bottom of the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layer {
    /// material of the layer
    pub block: BlockId,
    /// thickness in blocks
    pub thickness: u32,
}

/// Generates flat terrain made of horizontal layers in two stages.
///
/// Stage 0 places the layers and runs in parallel. Stage 1 is synchronized; it assigns biomes and
/// scatters tall grass on the surface, both derived from the hashed world seed.
#[derive(Clone, Debug)]
pub struct FlatGenerator {
    layers: Vec<Layer>,
}

impl Default for FlatGenerator {
    fn default() -> Self {
        Self::new(vec![
            Layer {
                block: basic::BEDROCK,
                thickness: 1,
            },
            Layer {
                block: basic::STONE,
                thickness: 60,
            },
            Layer {
                block: basic::DIRT,
                thickness: 3,
            },
            Layer {
                block: basic::GRASS,
                thickness: 1,
            },
        ])
    }
}

impl FlatGenerator {
    /// Creates a generator for the given layers, bottom first.
    #[must_use]
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// Number of blocks covered by layers.
    fn height(&self) -> i64 {
        self.layers
            .iter()
            .map(|layer| i64::from(layer.thickness))
            .sum()
    }

    /// Returns the block at the given height above the bottom of the world.
    fn block_at(&self, level: i64) -> BlockId {
        let mut top = 0;
        for layer in &self.layers {
            top += i64::from(layer.thickness);
            if level < top {
                return layer.block;
            }
        }
        BlockId::AIR
    }

    fn section(&self, y_index: u32) -> Option<SubChunkData> {
        let bottom = i64::from(y_index) * SECTION_SIZE;
        if bottom >= self.height() {
            return None;
        }
        let mut blocks = SectionArray::filled(BlockId::AIR);
        for index in LocalIndex::all() {
            blocks[index] = self.block_at(bottom + i64::from(index.local().y));
        }
        Some(SubChunkData::from_blocks(blocks, [PLAINS; 64]))
    }
}

/// Cheap deterministic mix of the world seed and a column position.
fn column_hash(seed: i64, x: i64, z: i64) -> u64 {
    let bits = |value: i64| u64::from_le_bytes(value.to_le_bytes());
    let mut hash = bits(seed);
    for value in [x, z] {
        hash ^= bits(value).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        hash = hash.rotate_left(29).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    }
    hash ^ (hash >> 31)
}

impl ChunkGenerator for FlatGenerator {
    fn stage_mode(&self, stage: u8) -> StageMode {
        if stage == DECORATION {
            StageMode::Sync
        } else {
            StageMode::Parallel
        }
    }

    fn generate_chunk(&self, world: &World, pos: ChunkPos) -> Result<ChunkData> {
        Ok(ChunkData::new(pos, world.layout()))
    }

    fn process_chunk(&self, world: &World, chunk: &mut ChunkData) -> Result<()> {
        match chunk.generator_stage() {
            TERRAIN => {
                for y_index in 0..chunk.layout().chunk_y_count {
                    if let Some(section) = self.section(y_index) {
                        chunk.insert_section(y_index, section);
                    }
                }
                chunk.advance_stage(DECORATION);
            }
            _ => {
                let pos = chunk.pos();
                let hash = column_hash(world.seed().hashed(), pos.x, pos.z);
                let biome = if hash % 2 == 0 { PLAINS } else { MEADOW };
                for (_, section) in chunk.sections_mut() {
                    for index in LocalIndex::all().step_by(4) {
                        section.set_biome(index, biome);
                    }
                }
                let surface = self.height();
                let y_index = u32::try_from(surface / SECTION_SIZE)
                    .ok()
                    .filter(|&y_index| y_index < chunk.layout().chunk_y_count);
                if let Some(y_index) = y_index {
                    #[expect(
                        clippy::cast_possible_truncation,
                        reason = "the remainder of a section size fits into u16"
                    )]
                    let local_y = (surface % SECTION_SIZE) as u16;
                    if chunk.section(y_index).is_none() {
                        chunk.insert_section(y_index, SubChunkData::empty(biome));
                    }
                    if let Some(section) = chunk.section_mut(y_index) {
                        for bit in 0..16_u16 {
                            if hash >> (bit * 4) & 0b11 == 0 {
                                let index = LocalIndex::from_local(bit, local_y, bit * 7 + 3);
                                section.set_block(index, basic::TALL_GRASS);
                            }
                        }
                    }
                }
                chunk.advance_stage(GENERATION_COMPLETE);
            }
        }
        Ok(())
    }

    fn generate_sub_chunk(&self, _world: &World, pos: SubChunkPos) -> Result<SubChunkData> {
        Ok(self
            .section(pos.y_index)
            .unwrap_or_else(|| SubChunkData::empty(PLAINS)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_stack_from_the_bottom() {
        let generator = FlatGenerator::default();
        assert_eq!(generator.height(), 65);
        assert_eq!(generator.block_at(0), basic::BEDROCK);
        assert_eq!(generator.block_at(60), basic::STONE);
        assert_eq!(generator.block_at(61), basic::DIRT);
        assert_eq!(generator.block_at(64), basic::GRASS);
        assert_eq!(generator.block_at(65), BlockId::AIR);
    }

    #[test]
    fn sections_above_the_layers_stay_virtual() {
        let generator = FlatGenerator::default();
        assert!(generator.section(4).is_some());
        assert!(generator.section(5).is_none());
        let top = generator.section(4).unwrap();
        assert_eq!(top.block(LocalIndex::from_local(0, 0, 0)), basic::GRASS);
        assert_eq!(top.block(LocalIndex::from_local(0, 1, 0)), BlockId::AIR);
    }

    #[test]
    fn column_hash_is_deterministic() {
        assert_eq!(column_hash(1, 2, 3), column_hash(1, 2, 3));
        assert_ne!(column_hash(1, 2, 3), column_hash(1, 3, 2));
    }
}
