//! Contains chunk column and section positions and the vertical layout of a world.

use std::fmt::{self, Display};

use glam::{DVec3, I64Vec3};
use serde::{Deserialize, Serialize};

use crate::block_pos::BlockPos;

/// number of bit shifts to perform in order to convert between block and chunk coordinates.
pub const SECTION_BITS: u32 = 4;
/// Number of blocks per section in each dimension.
pub const SECTION_SIZE: i64 = 1 << SECTION_BITS;
/// Mask to be used to address the bits of a block coordinate that make up the position within
/// their section.
pub const SECTION_MASK: i64 = SECTION_SIZE - 1;

/// The position of a chunk column.
///
/// The position is _not_ measured in block coordinates but in steps of [`SECTION_SIZE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    /// column index along the x axis
    pub x: i64,
    /// column index along the z axis
    pub z: i64,
}

impl ChunkPos {
    /// Creates a new chunk position.
    #[must_use]
    pub const fn new(x: i64, z: i64) -> Self {
        Self { x, z }
    }

    /// Returns the block with the lowest x and z coordinates in this column at height `y`.
    #[must_use]
    pub const fn origin(self, y: i64) -> BlockPos {
        BlockPos::new(self.x << SECTION_BITS, y, self.z << SECTION_BITS)
    }

    /// Returns the section of this column at the given vertical slot.
    #[must_use]
    pub const fn sub_chunk(self, y_index: u32) -> SubChunkPos {
        SubChunkPos {
            x: self.x,
            y_index,
            z: self.z,
        }
    }

    /// Chebyshev distance in columns.
    #[must_use]
    pub fn distance(self, other: Self) -> u64 {
        self.x.abs_diff(other.x).max(self.z.abs_diff(other.z))
    }
}

impl Display for ChunkPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        // use double square brackets to indicate that a chunk is bigger than a single block
        write!(formatter, "[[{}, {}]]", self.x, self.z)
    }
}

/// The position of a single section (sub-chunk) within the world.
///
/// `y_index` is the slot within its column, always in `0..chunk_y_count` of the owning
/// [`ChunkLayout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubChunkPos {
    /// column index along the x axis
    pub x: i64,
    /// vertical slot within the column
    pub y_index: u32,
    /// column index along the z axis
    pub z: i64,
}

impl SubChunkPos {
    /// Returns the column containing this section.
    #[must_use]
    pub const fn chunk_pos(self) -> ChunkPos {
        ChunkPos::new(self.x, self.z)
    }
}

impl Display for SubChunkPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[[{}, #{}, {}]]", self.x, self.y_index, self.z)
    }
}

/// Describes the vertical extent of a world: how many sections a column holds and where the
/// lowest one starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    /// number of sections per column
    pub chunk_y_count: u32,
    /// y coordinate of the lowest block of the lowest section
    pub world_y_offset: i64,
}

impl ChunkLayout {
    /// Lowest valid block y coordinate.
    #[must_use]
    pub const fn min_y(self) -> i64 {
        self.world_y_offset
    }

    /// Highest valid block y coordinate.
    #[must_use]
    pub const fn max_y(self) -> i64 {
        self.world_y_offset + self.chunk_y_count as i64 * SECTION_SIZE - 1
    }

    /// Returns whether the block lies within the vertical range of the world.
    #[must_use]
    pub const fn contains_y(self, y: i64) -> bool {
        y >= self.min_y() && y <= self.max_y()
    }

    /// Returns the vertical slot of the section containing `y`.
    /// Returns `None`, if `y` lies outside the world.
    #[must_use]
    pub fn y_index(self, y: i64) -> Option<u32> {
        if self.contains_y(y) {
            u32::try_from((y - self.world_y_offset) >> SECTION_BITS).ok()
        } else {
            None
        }
    }

    /// Returns the vertical slot containing `y` clamped into the world.
    ///
    /// Entities may leave the vertical range of the world but still need to be stored somewhere.
    #[must_use]
    pub fn clamped_y_index(self, y: f64) -> u32 {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "the value is clamped into the world first"
        )]
        let y = (y.floor() as i64).clamp(self.min_y(), self.max_y());
        self.y_index(y).unwrap_or(0)
    }

    /// Returns the section containing the given block or `None` if it lies outside the world.
    #[must_use]
    pub fn sub_chunk_of(self, pos: BlockPos) -> Option<SubChunkPos> {
        Some(pos.chunk_pos().sub_chunk(self.y_index(pos.0.y)?))
    }

    /// Returns the section an entity at `point` is stored in.
    #[must_use]
    pub fn sub_chunk_of_point(self, point: DVec3) -> SubChunkPos {
        BlockPos::containing(point)
            .chunk_pos()
            .sub_chunk(self.clamped_y_index(point.y))
    }

    /// Returns the lowest block of the given section.
    #[must_use]
    pub fn section_origin(self, pos: SubChunkPos) -> BlockPos {
        pos.chunk_pos()
            .origin(self.world_y_offset + i64::from(pos.y_index) * SECTION_SIZE)
    }

    /// Returns the world position of a block inside a section.
    #[must_use]
    pub fn block_in_section(self, pos: SubChunkPos, local: glam::U16Vec3) -> BlockPos {
        self.section_origin(pos).offset(I64Vec3::new(
            i64::from(local.x),
            i64::from(local.y),
            i64::from(local.z),
        ))
    }
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            chunk_y_count: 24,
            world_y_offset: -64,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::U16Vec3;

    use super::*;

    #[test]
    fn vertical_range_of_default_layout() {
        let layout = ChunkLayout::default();
        assert_eq!(layout.min_y(), -64);
        assert_eq!(layout.max_y(), 319);
        assert_eq!(layout.y_index(-64), Some(0));
        assert_eq!(layout.y_index(70), Some(8));
        assert_eq!(layout.y_index(320), None);
        assert_eq!(layout.y_index(-65), None);
    }

    #[test]
    fn entity_slots_are_clamped() {
        let layout = ChunkLayout::default();
        assert_eq!(layout.clamped_y_index(-1000.0), 0);
        assert_eq!(layout.clamped_y_index(1000.0), layout.chunk_y_count - 1);
    }

    #[test]
    fn block_in_section_inverts_sub_chunk_of() {
        let layout = ChunkLayout::default();
        let pos = BlockPos::new(-3, 70, 33);
        let section = layout.sub_chunk_of(pos).unwrap();
        let local = pos.local_index().local();
        assert_eq!(layout.block_in_section(section, local), pos);
        assert_eq!(section.chunk_pos(), ChunkPos::new(-1, 2));
        assert_eq!(local, U16Vec3::new(13, 6, 1));
    }
}
