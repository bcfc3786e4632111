use std::sync::Arc;

use anyhow::Result;
use strata_core::ChunkPos;

use super::{StorageProvider, WorldStorage, record::ChunkRecord};
use crate::world::metadata::WorldMetadata;

/// A world storage provider which actually never stores or loads anything.
/// This is useful for temporary throwaway worlds and for generator tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct DummyStorage;

impl WorldStorage for DummyStorage {
    fn load_chunk(&self, _pos: ChunkPos) -> Result<Option<ChunkRecord>> {
        Ok(None)
    }

    fn store_chunk(&self, _pos: ChunkPos, _record: &ChunkRecord) -> Result<()> {
        Ok(())
    }

    fn load_metadata(&self) -> Result<Option<WorldMetadata>> {
        Ok(None)
    }

    fn store_metadata(&self, _metadata: &WorldMetadata) -> Result<()> {
        Ok(())
    }
}

impl StorageProvider for DummyStorage {
    fn open(&self, _world: &str) -> Result<Arc<dyn WorldStorage>> {
        Ok(Arc::new(Self))
    }
}
