//! Pluggable light recomputation.

pub mod sky;

use anyhow::Result;
use strata_core::{BlockPos, EntityId, SubChunkPos};

use super::{World, chunk::ChunkData};

/// Recomputes and stores light after changes to the world.
///
/// All operations store their results in place and are idempotent. Errors are logged by the
/// world; light is never a reason to reject a change.
pub trait LightProcessor: Send + Sync {
    /// Whether [`entity_changed`](Self::entity_changed) should be called after entity moves and
    /// teleports.
    fn handles_entity_moves(&self) -> bool {
        false
    }

    /// Whether [`entity_changed`](Self::entity_changed) should be called after rotations.
    fn handles_entity_rotation(&self) -> bool {
        false
    }

    /// Called after a single block changed.
    fn block_changed(&self, world: &World, pos: BlockPos) -> Result<()>;

    /// Called after a section has been materialized.
    fn process_sub_chunk(&self, world: &World, pos: SubChunkPos) -> Result<()>;

    /// Called for a freshly loaded or generated column before it becomes resident.
    fn process_chunk(&self, world: &World, chunk: &mut ChunkData) -> Result<()>;

    /// Called after an entity moved or turned, depending on the capability flags.
    fn entity_changed(&self, _world: &World, _id: EntityId) -> Result<()> {
        Ok(())
    }
}

/// A light processor which never computes anything. All light levels stay at zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLight;

impl LightProcessor for NoLight {
    fn block_changed(&self, _world: &World, _pos: BlockPos) -> Result<()> {
        Ok(())
    }

    fn process_sub_chunk(&self, _world: &World, _pos: SubChunkPos) -> Result<()> {
        Ok(())
    }

    fn process_chunk(&self, _world: &World, _chunk: &mut ChunkData) -> Result<()> {
        Ok(())
    }
}
