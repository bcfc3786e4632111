//! The map of resident chunk columns of a world.

use std::collections::HashMap;

use strata_core::{Aabb, ChunkPos, Shape};

use super::chunk::ChunkHandle;

/// Maps column positions to resident columns.
///
/// The map itself is not synchronized; it lives inside the world state behind the world lock.
#[derive(Debug, Default)]
pub struct ChunkColumnMap {
    chunks: HashMap<ChunkPos, ChunkHandle>,
}

impl ChunkColumnMap {
    /// Returns the column at the given position if it's resident.
    #[must_use]
    pub fn get_or_none(&self, pos: ChunkPos) -> Option<ChunkHandle> {
        self.chunks.get(&pos).cloned()
    }

    /// Returns whether the column at the given position is resident.
    #[must_use]
    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }

    /// Makes a column resident.
    ///
    /// # Panics
    ///
    /// Panics if a column is already resident at this position.
    pub fn insert(&mut self, chunk: ChunkHandle) {
        let pos = chunk.pos();
        let previous = self.chunks.insert(pos, chunk);
        assert!(
            previous.is_none(),
            "chunk {pos} has been inserted while another one was still resident"
        );
    }

    /// Removes a column and returns it.
    pub fn remove(&mut self, pos: ChunkPos) -> Option<ChunkHandle> {
        self.chunks.remove(&pos)
    }

    /// Number of resident columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if no column is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Snapshots all resident columns.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChunkHandle> {
        self.chunks.values().cloned().collect()
    }

    /// Positions of the resident columns intersecting `aabb`.
    ///
    /// Walks whichever is smaller, the columns of the box or the resident columns.
    #[must_use]
    pub fn positions_in(&self, aabb: &Aabb) -> Vec<ChunkPos> {
        let resident = u128::try_from(self.chunks.len()).unwrap_or(u128::MAX);
        if aabb.column_count() <= resident {
            aabb.chunk_columns()
                .filter(|pos| self.chunks.contains_key(pos))
                .collect()
        } else {
            self.chunks
                .keys()
                .copied()
                .filter(|&pos| aabb.intersects_column(pos))
                .collect()
        }
    }

    /// Snapshots all resident columns within `radius` columns around `center`.
    ///
    /// Column distances are measured between column positions.
    #[must_use]
    pub fn snapshot_in_radius(
        &self,
        center: ChunkPos,
        radius: u32,
        shape: Shape,
    ) -> Vec<ChunkHandle> {
        let radius = i64::from(radius);
        let mut chunks = Vec::new();
        for x in center.x - radius..=center.x + radius {
            for z in center.z - radius..=center.z + radius {
                let (dx, dz) = (x - center.x, z - center.z);
                if shape == Shape::Spherical && dx * dx + dz * dz > radius * radius {
                    continue;
                }
                if let Some(chunk) = self.chunks.get(&ChunkPos::new(x, z)) {
                    chunks.push(ChunkHandle::clone(chunk));
                }
            }
        }
        chunks
    }
}
