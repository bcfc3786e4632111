//! Contains block positions, the index of a block within its section and region shapes used by
//! spatial queries.

use std::fmt::{self, Display};

use glam::{DVec3, I64Vec3, U16Vec3, UVec3};
use serde::{Deserialize, Serialize};

use crate::chunk_pos::{ChunkPos, SECTION_BITS, SECTION_MASK, SECTION_SIZE};

/// The coordinates of a single block within the world
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos(pub I64Vec3);

impl BlockPos {
    /// Position of the block at the world's center
    pub const ZERO: Self = Self(I64Vec3::ZERO);

    /// Creates a block position from its components.
    #[must_use]
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self(I64Vec3 { x, y, z })
    }

    /// Returns the block containing the given point.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "world coordinates are far from the limits of i64"
    )]
    pub fn containing(point: DVec3) -> Self {
        Self::new(
            point.x.floor() as i64,
            point.y.floor() as i64,
            point.z.floor() as i64,
        )
    }

    /// Returns the position of the chunk column which contains this block.
    #[must_use]
    pub const fn chunk_pos(self) -> ChunkPos {
        ChunkPos::new(self.0.x >> SECTION_BITS, self.0.z >> SECTION_BITS)
    }

    /// Returns the index of this block within its section.
    #[must_use]
    pub const fn local_index(self) -> LocalIndex {
        LocalIndex::for_block(self)
    }

    /// Returns the block with a given displacement.
    #[must_use]
    pub fn offset(self, delta: I64Vec3) -> Self {
        Self(self.0 + delta)
    }

    /// Returns the center point of this block.
    #[must_use]
    pub fn center(self) -> DVec3 {
        self.0.as_dvec3() + DVec3::splat(0.5)
    }
}

impl Display for BlockPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "({}, {}, {})", self.0.x, self.0.y, self.0.z)
    }
}

impl From<BlockPos> for I64Vec3 {
    fn from(value: BlockPos) -> Self {
        value.0
    }
}

/// The index of a block within its section (sub-chunk).
///
/// The x coordinate occupies the lowest bits, followed by y and z.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalIndex(u16);

impl LocalIndex {
    /// Bit indices of the individual coordinates within the index.
    const SHIFT: UVec3 = UVec3::new(0, SECTION_BITS, 2 * SECTION_BITS);
    /// Number of blocks within a single section.
    pub const COUNT: usize = (SECTION_SIZE * SECTION_SIZE * SECTION_SIZE) as usize;
    /// index of the first block within a section (0, 0, 0)
    pub const MIN: Self = Self(0);
    /// index of the last block within a section (15, 15, 15)
    #[expect(
        clippy::cast_possible_truncation,
        reason = "a section holds 4096 blocks which fits into u16"
    )]
    pub const MAX: Self = Self(Self::COUNT as u16 - 1);

    /// Converts a given block position into the index within its containing section.
    #[must_use]
    pub const fn for_block(pos: BlockPos) -> Self {
        Self::from_local(
            (pos.0.x & SECTION_MASK) as u16,
            (pos.0.y & SECTION_MASK) as u16,
            (pos.0.z & SECTION_MASK) as u16,
        )
    }

    /// Creates an index from section-local coordinates. Excess bits are masked off.
    #[must_use]
    pub const fn from_local(x: u16, y: u16, z: u16) -> Self {
        let mask = SECTION_MASK as u16;
        Self((x & mask) | ((y & mask) << SECTION_BITS) | ((z & mask) << (2 * SECTION_BITS)))
    }

    /// Returns the section-local coordinates `(x, y, z)` of this index.
    #[must_use]
    pub fn local(self) -> U16Vec3 {
        // right-align the bits of all three coordinates and mask off excessive high-bits
        (U16Vec3::splat(self.0) >> Self::SHIFT) & U16Vec3::splat(SECTION_MASK as u16)
    }

    /// Iterates all indices of a section in storage order.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN.0..=Self::MAX.0).map(Self)
    }
}

impl From<LocalIndex> for usize {
    fn from(value: LocalIndex) -> Self {
        value.0.into()
    }
}

impl From<LocalIndex> for u16 {
    fn from(value: LocalIndex) -> Self {
        value.0
    }
}

impl From<u16> for LocalIndex {
    fn from(value: u16) -> Self {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "a section holds 4096 blocks which fits into u16"
        )]
        Self(value & (Self::COUNT as u16 - 1))
    }
}

/// An axis-aligned box in continuous world space. Both corners are inclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// lowest corner
    pub min: DVec3,
    /// highest corner
    pub max: DVec3,
}

impl Aabb {
    /// Creates a box from two arbitrary corners.
    #[must_use]
    pub fn new(corner_a: DVec3, corner_b: DVec3) -> Self {
        Self {
            min: corner_a.min(corner_b),
            max: corner_a.max(corner_b),
        }
    }

    /// Creates a cube around `center` reaching `radius` in every direction.
    #[must_use]
    pub fn around(center: DVec3, radius: f64) -> Self {
        Self::new(center - DVec3::splat(radius), center + DVec3::splat(radius))
    }

    /// Returns whether `point` lies within this box.
    #[must_use]
    pub fn contains(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Returns all chunk columns intersecting this box.
    ///
    /// Use [`Self::column_count`] to check the size first; huge boxes cover a huge number of
    /// columns.
    pub fn chunk_columns(&self) -> impl Iterator<Item = ChunkPos> + use<> {
        let (min, max) = self.column_corners();
        (min.x..=max.x).flat_map(move |x| (min.z..=max.z).map(move |z| ChunkPos::new(x, z)))
    }

    /// Number of chunk columns intersecting this box.
    #[must_use]
    pub fn column_count(&self) -> u128 {
        let (min, max) = self.column_corners();
        let span = |low: i64, high: i64| {
            u128::try_from(i128::from(high) - i128::from(low) + 1).unwrap_or_default()
        };
        span(min.x, max.x).saturating_mul(span(min.z, max.z))
    }

    /// Returns whether the given chunk column intersects this box.
    #[must_use]
    pub fn intersects_column(&self, pos: ChunkPos) -> bool {
        let (min, max) = self.column_corners();
        (min.x..=max.x).contains(&pos.x) && (min.z..=max.z).contains(&pos.z)
    }

    fn column_corners(&self) -> (ChunkPos, ChunkPos) {
        (
            BlockPos::containing(self.min).chunk_pos(),
            BlockPos::containing(self.max).chunk_pos(),
        )
    }
}

/// The shape used by radius-based spatial queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Everything within the axis-aligned cube of the given half edge length.
    Cubic,
    /// Everything within the euclidean distance.
    Spherical,
}

impl Shape {
    /// Returns whether `point` lies within `radius` around `center` for this shape.
    #[must_use]
    pub fn contains(self, center: DVec3, radius: f64, point: DVec3) -> bool {
        match self {
            Self::Cubic => Aabb::around(center, radius).contains(point),
            Self::Spherical => center.distance_squared(point) <= radius * radius,
        }
    }
}
