//! Persistence of chunk columns and world metadata.

use std::sync::Arc;

use anyhow::Result;
use strata_core::ChunkPos;

use super::metadata::WorldMetadata;
use record::ChunkRecord;

pub mod dummy;
pub mod file;
pub mod memory;
pub mod record;

/// Storage of a single world.
///
/// All methods may block; the world only calls them from worker threads.
pub trait WorldStorage: Send + Sync {
    /// Tries to load a column from the storage.
    /// Returns `None`, if the requested column doesn't exist.
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<ChunkRecord>>;
    /// Stores a column, replacing a previously stored version.
    fn store_chunk(&self, pos: ChunkPos, record: &ChunkRecord) -> Result<()>;
    /// Tries to load the world metadata.
    /// Returns `None`, if the world has never been saved.
    fn load_metadata(&self) -> Result<Option<WorldMetadata>>;
    /// Stores the world metadata.
    fn store_metadata(&self, metadata: &WorldMetadata) -> Result<()>;
}

/// Opens the storage of worlds by their id.
pub trait StorageProvider: Send + Sync {
    /// Opens (or creates) the storage of the given world.
    fn open(&self, world: &str) -> Result<Arc<dyn WorldStorage>>;
}
