//! Entity storage and the id index used to locate entities by their section.

use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::Arc,
};

use glam::DVec3;
use parking_lot::Mutex;
use strata_core::{ChunkPos, EntityId, EntityKind, SubChunkPos};

use super::{WorldError, storage::record::EntityRecord};

/// Mutable state of an entity as far as the world is concerned.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityState {
    /// position in world space
    pub position: DVec3,
    /// horizontal view angle in degrees
    pub yaw: f32,
    /// vertical view angle in degrees
    pub pitch: f32,
    /// velocity
    pub motion: DVec3,
    /// opaque payload owned by the entity behavior
    pub payload: serde_json::Value,
}

impl EntityState {
    /// Creates a resting entity at the given position.
    #[must_use]
    pub fn at(position: DVec3) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
            motion: DVec3::ZERO,
            payload: serde_json::Value::Null,
        }
    }
}

/// An entity known to a world.
///
/// Position and rotation can only be changed through the [`World`](super::World) so that the
/// spatial index stays consistent.
#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    kind: EntityKind,
    state: Mutex<EntityState>,
}

/// Reference counted handle to an entity.
pub type EntityHandle = Arc<Entity>;

impl Entity {
    /// Id of this entity.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Type of this entity.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Current position.
    #[must_use]
    pub fn position(&self) -> DVec3 {
        self.state.lock().position
    }

    /// A copy of the complete state.
    #[must_use]
    pub fn snapshot(&self) -> EntityState {
        self.state.lock().clone()
    }

    /// Replaces the behavior payload.
    pub fn set_payload(&self, payload: serde_json::Value) {
        self.state.lock().payload = payload;
    }

    pub(crate) fn update<R>(&self, updater: impl FnOnce(&mut EntityState) -> R) -> R {
        updater(&mut self.state.lock())
    }

    pub(crate) fn to_record(&self) -> EntityRecord {
        let state = self.state.lock();
        EntityRecord {
            kind: self.kind,
            position: state.position,
            yaw: state.yaw,
            pitch: state.pitch,
            motion: state.motion,
            payload: state.payload.clone(),
        }
    }
}

#[derive(Debug)]
struct IndexEntry {
    handle: EntityHandle,
    bucket: SubChunkPos,
}

/// Owns all registered entities and remembers which section each of them is stored in.
///
/// The index and the per-section entity sets are only updated together by the world, so every
/// entity lives in exactly one bucket.
#[derive(Debug)]
pub struct EntityIndex {
    entries: HashMap<EntityId, IndexEntry>,
    /// ids of the entities stored in each column
    by_chunk: HashMap<ChunkPos, HashSet<EntityId>>,
    next_id: u64,
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            by_chunk: HashMap::new(),
            next_id: 1,
        }
    }
}

impl EntityIndex {
    /// Creates an entity with a fresh id. It isn't registered yet.
    pub fn create(&mut self, kind: EntityKind, state: EntityState) -> EntityHandle {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        Arc::new(Entity {
            id,
            kind,
            state: Mutex::new(state),
        })
    }

    /// Stores an entity under its id in the given bucket.
    pub fn insert(&mut self, handle: EntityHandle, bucket: SubChunkPos) -> Result<(), WorldError> {
        let id = handle.id();
        match self.entries.entry(id) {
            Entry::Occupied(entry) => Err(WorldError::DuplicateEntity(*entry.key())),
            Entry::Vacant(entry) => {
                entry.insert(IndexEntry { handle, bucket });
                self.by_chunk.entry(bucket.chunk_pos()).or_default().insert(id);
                Ok(())
            }
        }
    }

    /// Stores all given entities, or none of them if any id is already taken.
    pub fn insert_all(
        &mut self,
        entities: Vec<(EntityHandle, SubChunkPos)>,
    ) -> Result<(), WorldError> {
        let mut ids = HashSet::with_capacity(entities.len());
        for (handle, _) in &entities {
            let id = handle.id();
            if self.entries.contains_key(&id) || !ids.insert(id) {
                return Err(WorldError::DuplicateEntity(id));
            }
        }
        for (handle, bucket) in entities {
            self.insert(handle, bucket)?;
        }
        Ok(())
    }

    /// Removes an entity and returns it together with the bucket it was stored in.
    pub fn remove(&mut self, id: EntityId) -> Option<(EntityHandle, SubChunkPos)> {
        let entry = self.entries.remove(&id)?;
        self.unlink(id, entry.bucket.chunk_pos());
        Some((entry.handle, entry.bucket))
    }

    /// Returns the entity with the given id.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<EntityHandle> {
        self.entries.get(&id).map(|entry| EntityHandle::clone(&entry.handle))
    }

    /// Returns the bucket the entity with the given id is stored in.
    #[must_use]
    pub fn bucket(&self, id: EntityId) -> Option<SubChunkPos> {
        self.entries.get(&id).map(|entry| entry.bucket)
    }

    /// Moves an entity to another bucket and returns the previous one.
    pub fn set_bucket(&mut self, id: EntityId, bucket: SubChunkPos) -> Option<SubChunkPos> {
        let entry = self.entries.get_mut(&id)?;
        let previous = std::mem::replace(&mut entry.bucket, bucket);
        if previous.chunk_pos() != bucket.chunk_pos() {
            self.unlink(id, previous.chunk_pos());
            self.by_chunk.entry(bucket.chunk_pos()).or_default().insert(id);
        }
        Some(previous)
    }

    /// Returns the ids of all entities stored in the given column.
    #[must_use]
    pub fn ids_in_chunk(&self, pos: ChunkPos) -> Vec<EntityId> {
        self.by_chunk
            .get(&pos)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn unlink(&mut self, id: EntityId, pos: ChunkPos) {
        if let Entry::Occupied(mut ids) = self.by_chunk.entry(pos) {
            ids.get_mut().remove(&id);
            if ids.get().is_empty() {
                ids.remove();
            }
        }
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
