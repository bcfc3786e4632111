//! Holds the numeric identifier types handed out by the registry service.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The block id describes the _material_ a single block is made of.
///
/// The meaning of a value is owned by the external registry; the engine only relies on
/// [`BlockId::AIR`] being the empty block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    /// The empty block. Freshly created sections consist of this.
    pub const AIR: Self = Self(0);

    /// Returns `true` for the empty block.
    #[must_use]
    pub const fn is_air(self) -> bool {
        self.0 == Self::AIR.0
    }
}

impl Display for BlockId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Identifies a biome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BiomeId(pub u16);

/// Identifies the type of a block entity payload (chest contents, sign text, …).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BlockEntityKind(pub u32);

/// Identifies the type of an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct EntityKind(pub u32);

/// Server-local id of a single entity.
///
/// Ids are stable for the lifetime of the entity but are not persisted; an entity which is loaded
/// back from storage receives a fresh id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(pub u64);

impl Display for EntityId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "E{}", self.0)
    }
}
