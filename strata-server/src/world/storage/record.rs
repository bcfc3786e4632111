//! The logical shape of persisted chunks.
//!
//! Records are plain serde structs; the byte encoding is up to the storage backend.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use strata_core::{BiomeId, BlockEntityKind, BlockId, EntityKind};

/// A persisted chunk column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// One entry per vertical slot. `None` entries were never materialized.
    /// A missing list means no section has been materialized at all.
    #[serde(default)]
    pub sub_chunks: Option<Vec<Option<SubChunkRecord>>>,
    /// scheduled ticks, relative to the tick the chunk was saved at
    #[serde(default)]
    pub queried_for_tick: Vec<TickRecord>,
    /// generation progress; `0xFF` marks a complete chunk
    pub generator_stage: u8,
    /// load level the chunk is restored with
    pub resume_gen_level: u8,
    /// Height maps are only read; they are recomputed whenever they are missing.
    #[serde(default, skip_serializing)]
    pub height_maps: Option<HeightMapsRecord>,
}

/// A persisted section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubChunkRecord {
    /// dense block ids in local index order (x fastest, then y, then z)
    pub blocks: Vec<BlockId>,
    /// biome ids of the 4×4×4 cells
    pub biomes: Vec<BiomeId>,
    /// block entity payloads
    #[serde(default)]
    pub block_entities: Vec<BlockEntityRecord>,
    /// entities stored in this section
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
}

/// A persisted block entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockEntityRecord {
    /// section-local x
    pub x: u8,
    /// section-local y
    pub y: u8,
    /// section-local z
    pub z: u8,
    /// type of the payload
    pub type_id: BlockEntityKind,
    /// opaque payload
    pub payload: serde_json::Value,
}

/// A persisted entity. Ids are not persisted; loaded entities are registered under a new id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// entity type
    pub kind: EntityKind,
    /// position in world space
    pub position: DVec3,
    /// horizontal view angle
    pub yaw: f32,
    /// vertical view angle
    pub pitch: f32,
    /// velocity
    pub motion: DVec3,
    /// opaque payload owned by the entity behavior
    pub payload: serde_json::Value,
}

/// A persisted scheduled tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRecord {
    /// world x
    pub x: i64,
    /// world y
    pub y: i64,
    /// world z
    pub z: i64,
    /// remaining ticks until the entry is due
    pub due_in: u64,
    /// ordering among entries due at the same tick
    #[serde(default)]
    pub priority: i8,
    /// `true` for the liquid queue
    #[serde(default)]
    pub liquid: bool,
}

/// Persisted height maps; 256 entries each in `x + 16 * z` order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightMapsRecord {
    /// highest non-air block + 1
    pub world_surface: Vec<i64>,
    /// highest motion blocking block + 1
    pub motion_blocking: Vec<i64>,
}
