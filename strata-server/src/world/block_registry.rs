//! The registry service providing static per-block metadata and block behavior hooks.

use std::collections::HashMap;

use anyhow::Result;
use strata_core::{BlockId, BlockPos};

use super::{World, sub_chunk::BlockEntity, tick_schedule::TickKind};

/// Static metadata of a single block type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "these are independent per-block flags"
)]
pub struct BlockInfo {
    /// whether blocks of this type carry a block entity payload
    pub has_block_entity: bool,
    /// whether placing a block in [`Keep`](super::BlockSetMode::Keep) mode may overwrite this
    pub replaceable: bool,
    /// whether [`Destroy`](super::BlockSetMode::Destroy) mode applies to this block
    pub breakable: bool,
    /// whether this block stops motion; used by the motion-blocking height map
    pub blocks_motion: bool,
    /// whether this block receives random ticks
    pub random_ticks: bool,
    /// light emitted by this block (`0..=15`)
    pub light_emission: u8,
    /// light absorbed when passing through this block (`0..=15`)
    pub light_opacity: u8,
}

impl BlockInfo {
    /// Metadata used for air and for ids the registry doesn't know.
    pub const AIR: Self = Self {
        has_block_entity: false,
        replaceable: true,
        breakable: false,
        blocks_motion: false,
        random_ticks: false,
        light_emission: 0,
        light_opacity: 0,
    };

    /// Metadata of a plain solid block.
    pub const SOLID: Self = Self {
        has_block_entity: false,
        replaceable: false,
        breakable: true,
        blocks_motion: true,
        random_ticks: false,
        light_emission: 0,
        light_opacity: 15,
    };
}

/// Registry lookups and block behavior.
///
/// The behavior hooks are called while the world is locked by the calling thread; they may freely
/// re-enter the [`World`] API. Errors are logged and counted, but never abort a tick.
pub trait BlockRegistry: Send + Sync {
    /// Returns the static metadata of a block type.
    fn block_info(&self, block: BlockId) -> BlockInfo;

    /// Called for a scheduled tick which became due.
    fn scheduled_tick(
        &self,
        _world: &World,
        _pos: BlockPos,
        _block: BlockId,
        _kind: TickKind,
    ) -> Result<()> {
        Ok(())
    }

    /// Called for a block which has been picked for a random tick.
    fn random_tick(&self, _world: &World, _pos: BlockPos, _block: BlockId) -> Result<()> {
        Ok(())
    }

    /// Called after a breakable block has been destroyed.
    fn block_destroyed(
        &self,
        _world: &World,
        _pos: BlockPos,
        _block: BlockId,
        _block_entity: Option<&BlockEntity>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Ids of the block types known to [`StaticBlockRegistry::basic`].
pub mod basic {
    use strata_core::BlockId;

    /// unbreakable floor
    pub const BEDROCK: BlockId = BlockId(1);
    /// stone
    pub const STONE: BlockId = BlockId(2);
    /// dirt
    pub const DIRT: BlockId = BlockId(3);
    /// grass covered dirt; receives random ticks
    pub const GRASS: BlockId = BlockId(4);
    /// still water
    pub const WATER: BlockId = BlockId(5);
    /// a container holding a block entity
    pub const CHEST: BlockId = BlockId(6);
    /// a light source
    pub const TORCH: BlockId = BlockId(7);
    /// replaceable decoration
    pub const TALL_GRASS: BlockId = BlockId(8);
}

/// A block registry backed by a fixed table.
#[derive(Clone, Debug, Default)]
pub struct StaticBlockRegistry {
    blocks: HashMap<BlockId, BlockInfo>,
}

impl StaticBlockRegistry {
    /// Creates an empty registry. Every id except air is unknown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the metadata of a block type.
    #[must_use]
    pub fn with_block(mut self, block: BlockId, info: BlockInfo) -> Self {
        self.blocks.insert(block, info);
        self
    }

    /// The handful of block types used by the flat generator.
    #[must_use]
    pub fn basic() -> Self {
        Self::new()
            .with_block(
                basic::BEDROCK,
                BlockInfo {
                    breakable: false,
                    ..BlockInfo::SOLID
                },
            )
            .with_block(basic::STONE, BlockInfo::SOLID)
            .with_block(basic::DIRT, BlockInfo::SOLID)
            .with_block(
                basic::GRASS,
                BlockInfo {
                    random_ticks: true,
                    ..BlockInfo::SOLID
                },
            )
            .with_block(
                basic::WATER,
                BlockInfo {
                    replaceable: true,
                    breakable: false,
                    blocks_motion: true,
                    light_opacity: 2,
                    ..BlockInfo::AIR
                },
            )
            .with_block(
                basic::CHEST,
                BlockInfo {
                    has_block_entity: true,
                    light_opacity: 0,
                    ..BlockInfo::SOLID
                },
            )
            .with_block(
                basic::TORCH,
                BlockInfo {
                    breakable: true,
                    light_emission: 14,
                    ..BlockInfo::AIR
                },
            )
            .with_block(
                basic::TALL_GRASS,
                BlockInfo {
                    breakable: true,
                    ..BlockInfo::AIR
                },
            )
    }
}

impl BlockRegistry for StaticBlockRegistry {
    fn block_info(&self, block: BlockId) -> BlockInfo {
        self.blocks.get(&block).copied().unwrap_or(BlockInfo::AIR)
    }
}
