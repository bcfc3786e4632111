use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use flexstr::SharedStr;
use parking_lot::Mutex;
use strata_core::ChunkPos;

use super::{StorageProvider, WorldStorage, record::ChunkRecord};
use crate::world::metadata::WorldMetadata;

/// Keeps serialized records in memory for the lifetime of the process.
///
/// Records go through the same serialization as on disk, so this backend catches anything that
/// wouldn't survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    chunks: Mutex<HashMap<ChunkPos, Vec<u8>>>,
    metadata: Mutex<Option<Vec<u8>>>,
    chunk_stores: AtomicUsize,
}

impl MemoryStorage {
    /// Number of stored columns.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Number of column writes so far.
    #[must_use]
    pub fn chunk_stores(&self) -> usize {
        self.chunk_stores.load(Ordering::Relaxed)
    }

    /// Replaces the stored bytes of a column; used to simulate corruption.
    pub fn store_raw(&self, pos: ChunkPos, bytes: Vec<u8>) {
        self.chunks.lock().insert(pos, bytes);
    }
}

impl WorldStorage for MemoryStorage {
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<ChunkRecord>> {
        let Some(bytes) = self.chunks.lock().get(&pos).cloned() else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn store_chunk(&self, pos: ChunkPos, record: &ChunkRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.chunks.lock().insert(pos, bytes);
        self.chunk_stores.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn load_metadata(&self) -> Result<Option<WorldMetadata>> {
        let bytes = self.metadata.lock().clone();
        bytes
            .map(|bytes| serde_json::from_slice(&bytes).map_err(anyhow::Error::from))
            .transpose()
    }

    fn store_metadata(&self, metadata: &WorldMetadata) -> Result<()> {
        let bytes = serde_json::to_vec(metadata)?;
        *self.metadata.lock() = Some(bytes);
        Ok(())
    }
}

/// Hands out one [`MemoryStorage`] per world id; reopening a world yields the same storage.
#[derive(Debug, Default)]
pub struct MemoryStorageProvider {
    worlds: Mutex<HashMap<SharedStr, Arc<MemoryStorage>>>,
}

impl MemoryStorageProvider {
    /// Returns the storage of a world, creating it if necessary.
    pub fn storage(&self, world: &str) -> Arc<MemoryStorage> {
        Arc::clone(
            self.worlds
                .lock()
                .entry(SharedStr::from_owned(world.to_owned()))
                .or_default(),
        )
    }
}

impl StorageProvider for MemoryStorageProvider {
    fn open(&self, world: &str) -> Result<Arc<dyn WorldStorage>> {
        Ok(self.storage(world))
    }
}
