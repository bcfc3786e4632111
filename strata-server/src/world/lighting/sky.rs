use anyhow::Result;
use strata_core::{BlockPos, LocalIndex, SubChunkPos};

use super::LightProcessor;
use crate::world::{World, block_registry::BlockRegistry, chunk::ChunkData};

/// Full light level.
const MAX_LIGHT: u8 = 15;

/// Computes sky light by letting light fall straight down through each block column, and block
/// light from the emission of each block itself.
///
/// Light doesn't spread sideways. Sections which haven't been materialized let light pass but
/// store nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkyLight;

fn light_column(chunk: &mut ChunkData, x: u16, z: u16, registry: &dyn BlockRegistry) {
    let mut sky = MAX_LIGHT;
    let slots: Vec<u32> = (0..chunk.layout().chunk_y_count).rev().collect();
    for y_index in slots {
        let Some(section) = chunk.section_mut(y_index) else {
            continue;
        };
        for local_y in (0..16_u16).rev() {
            let index = LocalIndex::from_local(x, local_y, z);
            let info = registry.block_info(section.block(index));
            sky = sky.saturating_sub(info.light_opacity);
            section.set_light(index, sky, info.light_emission);
        }
    }
}

fn light_chunk(chunk: &mut ChunkData, registry: &dyn BlockRegistry) {
    for z in 0..16 {
        for x in 0..16 {
            light_column(chunk, x, z, registry);
        }
    }
}

impl LightProcessor for SkyLight {
    fn block_changed(&self, world: &World, pos: BlockPos) -> Result<()> {
        let local = pos.local_index().local();
        world.with_chunk_data_mut(pos.chunk_pos(), |chunk| {
            light_column(chunk, local.x, local.z, world.block_registry());
        })?;
        Ok(())
    }

    fn process_sub_chunk(&self, world: &World, pos: SubChunkPos) -> Result<()> {
        world.with_chunk_data_mut(pos.chunk_pos(), |chunk| {
            light_chunk(chunk, world.block_registry());
        })?;
        Ok(())
    }

    fn process_chunk(&self, world: &World, chunk: &mut ChunkData) -> Result<()> {
        light_chunk(chunk, world.block_registry());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strata_core::{BiomeId, ChunkLayout, ChunkPos};

    use super::*;
    use crate::world::{
        block_registry::{StaticBlockRegistry, basic},
        sub_chunk::SubChunkData,
    };

    #[test]
    fn light_falls_until_blocked() {
        let registry = StaticBlockRegistry::basic();
        let layout = ChunkLayout {
            chunk_y_count: 3,
            world_y_offset: 0,
        };
        let mut chunk = ChunkData::new(ChunkPos::new(0, 0), layout);
        let mut middle = SubChunkData::empty(BiomeId(0));
        middle.set_block(LocalIndex::from_local(0, 8, 0), basic::WATER);
        middle.set_block(LocalIndex::from_local(1, 8, 0), basic::STONE);
        middle.set_block(LocalIndex::from_local(2, 8, 0), basic::TORCH);
        chunk.insert_section(1, middle);
        chunk.insert_section(0, SubChunkData::empty(BiomeId(0)));

        light_chunk(&mut chunk, &registry);
        let below = chunk.section(0).unwrap();
        let corner = LocalIndex::from_local(0, 15, 0);
        assert_eq!(below.sky_light(corner), 13);
        assert_eq!(below.sky_light(LocalIndex::from_local(1, 15, 0)), 0);
        assert_eq!(below.sky_light(LocalIndex::from_local(3, 0, 0)), 15);
        let middle = chunk.section(1).unwrap();
        assert_eq!(middle.block_light(LocalIndex::from_local(2, 8, 0)), 14);

        // recomputing must not change anything
        let before = chunk.section(0).unwrap().sky_light(corner);
        light_chunk(&mut chunk, &registry);
        assert_eq!(chunk.section(0).unwrap().sky_light(corner), before);
    }
}
