//! The notification surface towards the protocol layer and plugins.
//!
//! Every method has an empty default implementation so observers only implement what they need.
//! Notifications are delivered on the thread that caused the change, after the world released
//! its interior borrows; an observer may query the world from within a notification.

use glam::DVec3;
use strata_core::{BiomeId, BlockId, BlockPos, ChunkPos, EntityId, SubChunkPos};

use super::sub_chunk::BlockEntity;

/// Receives structured change notifications from a [`World`](super::World).
#[expect(unused_variables, reason = "default implementations ignore their arguments")]
pub trait WorldObserver: Send + Sync {
    /// A chunk column finished loading or generating.
    fn notify_chunk(&self, pos: ChunkPos) {}
    /// Many blocks of a column changed at once.
    fn notify_chunk_blocks(&self, pos: ChunkPos) {}
    /// Light of a whole column has been recomputed.
    fn notify_chunk_light(&self, pos: ChunkPos) {}
    /// A chunk column has been evicted.
    fn notify_chunk_unload(&self, pos: ChunkPos) {}
    /// A section has been materialized.
    fn notify_sub_chunk(&self, pos: SubChunkPos) {}
    /// Many blocks of a section changed at once.
    fn notify_sub_chunk_blocks(&self, pos: SubChunkPos) {}
    /// Light of a section has been recomputed.
    fn notify_sub_chunk_light(&self, pos: SubChunkPos) {}

    /// A single block changed.
    fn notify_block_change(&self, pos: BlockPos, block: BlockId) {}
    /// A block is about to be replaced by destruction; `old` is the destroyed block.
    fn notify_block_destroy_change(&self, pos: BlockPos, old: BlockId) {}
    /// A block entity has been attached or updated.
    fn notify_block_entity_change(&self, pos: BlockPos, block_entity: &BlockEntity) {}
    /// A block entity has been removed.
    fn notify_block_entity_change_destroy(&self, pos: BlockPos) {}
    /// The biome of a block cell changed.
    fn notify_biome_change(&self, pos: BlockPos, biome: BiomeId) {}
    /// A block triggered an event (note played, chest opened, …).
    fn notify_block_event(&self, pos: BlockPos, block: BlockId, event: u8, data: i32) {}

    /// An entity has been registered.
    fn entity_init(&self, id: EntityId) {}
    /// An entity has been moved without interpolation.
    fn entity_teleport(&self, id: EntityId, from: DVec3, to: DVec3) {}
    /// An entity moved.
    fn entity_move(&self, id: EntityId, from: DVec3, to: DVec3) {}
    /// An entity changed its view direction.
    fn entity_look_changes(&self, id: EntityId, yaw: f32, pitch: f32) {}
    /// The velocity of an entity changed.
    fn entity_motion_changes(&self, id: EntityId, motion: DVec3) {}
    /// An entity took damage.
    fn entity_damage(&self, id: EntityId, amount: f32) {}
    /// An entity died.
    fn entity_death(&self, id: EntityId) {}
    /// An entity has been unregistered.
    fn entity_deinit(&self, id: EntityId) {}
    /// `id` has been attached to `holder`.
    fn entity_attach(&self, id: EntityId, holder: EntityId) {}
    /// `id` has been detached from whatever held it.
    fn entity_detach(&self, id: EntityId) {}
    /// `id` started riding `vehicle`.
    fn entity_ride(&self, id: EntityId, vehicle: EntityId) {}
    /// `id` stopped riding.
    fn entity_leave_ride(&self, id: EntityId) {}
    /// An entity plays an animation.
    fn entity_animation(&self, id: EntityId, animation: u8) {}
    /// An entity triggered a status event.
    fn entity_event(&self, id: EntityId, event: u8) {}
    /// An effect has been applied to an entity.
    fn entity_add_effect(&self, id: EntityId, effect: u32, amplifier: u8, duration: u32) {}
    /// An effect has been removed from an entity.
    fn entity_remove_effect(&self, id: EntityId, effect: u32) {}
    /// An entity progresses breaking a block.
    fn entity_break(&self, id: EntityId, pos: BlockPos, stage: u8) {}
    /// An entity stopped breaking a block.
    fn entity_cancel_break(&self, id: EntityId, pos: BlockPos) {}
    /// An entity finished breaking a block.
    fn entity_finish_break(&self, id: EntityId, pos: BlockPos) {}
    /// An entity placed a block.
    fn entity_place(&self, id: EntityId, pos: BlockPos, block: BlockId) {}
}
