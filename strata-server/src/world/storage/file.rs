use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, trace};
use strata_core::ChunkPos;

use super::{StorageProvider, WorldStorage, record::ChunkRecord};
use crate::world::metadata::WorldMetadata;

const METADATA_FILE: &str = "world.json";
const CHUNK_DIR: &str = "chunks";

/// Distinguishes the temporary files of concurrent writers.
static NEXT_TEMPORARY: AtomicU64 = AtomicU64::new(0);

/// Stores every column in a zlib compressed JSON file of its own.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Opens the world stored in the given directory, creating it if necessary.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("opening world storage at {path}", path = root.display());
        fs::create_dir_all(root.join(CHUNK_DIR))
            .with_context(|| format!("creating world directory {}", root.display()))?;
        Ok(Self { root })
    }

    fn chunk_path(&self, pos: ChunkPos) -> PathBuf {
        self.root
            .join(CHUNK_DIR)
            .join(format!("c.{x}.{z}.json.z", x = pos.x, z = pos.z))
    }

    fn read(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Writes into a temporary file first so a crash never leaves a truncated file behind.
    fn write(path: &Path, bytes: &[u8]) -> Result<()> {
        let temporary = Self::temporary_path(path);
        fs::write(&temporary, bytes)
            .with_context(|| format!("writing {}", temporary.display()))?;
        fs::rename(&temporary, path).map_err(|error| {
            // the rename error is reported instead
            let _ = fs::remove_file(&temporary);
            anyhow::Error::new(error).context(format!("replacing {}", path.display()))
        })
    }

    /// A temporary sibling of `path` which no other writer uses.
    fn temporary_path(path: &Path) -> PathBuf {
        let serial = NEXT_TEMPORARY.fetch_add(1, Ordering::Relaxed);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}-{serial}.tmp", std::process::id()));
        path.with_file_name(name)
    }
}

impl WorldStorage for FileStorage {
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<ChunkRecord>> {
        let path = self.chunk_path(pos);
        let Some(compressed) = Self::read(&path)? else {
            trace!("chunk {pos} has never been stored");
            return Ok(None);
        };
        let bytes = miniz_oxide::inflate::decompress_to_vec_zlib(&compressed)
            .map_err(|error| anyhow!("decompressing {}: {error:?}", path.display()))?;
        let record = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        debug!("loaded chunk {pos} from {}", path.display());
        Ok(Some(record))
    }

    fn store_chunk(&self, pos: ChunkPos, record: &ChunkRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&bytes, 6);
        Self::write(&self.chunk_path(pos), &compressed)?;
        trace!(
            "stored chunk {pos} ({} bytes, {} compressed)",
            bytes.len(),
            compressed.len()
        );
        Ok(())
    }

    fn load_metadata(&self) -> Result<Option<WorldMetadata>> {
        let path = self.root.join(METADATA_FILE);
        Self::read(&path)?
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))
            })
            .transpose()
    }

    fn store_metadata(&self, metadata: &WorldMetadata) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(metadata)?;
        Self::write(&self.root.join(METADATA_FILE), &bytes)
    }
}

/// Stores each world in a sub directory named after its id.
#[derive(Clone, Debug)]
pub struct FileStorageProvider {
    root: PathBuf,
}

impl FileStorageProvider {
    /// Creates a provider storing worlds below `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StorageProvider for FileStorageProvider {
    fn open(&self, world: &str) -> Result<Arc<dyn WorldStorage>> {
        if world.is_empty() || world.contains(['/', '\\', '.']) {
            return Err(anyhow!("'{world}' is not a valid world id"));
        }
        Ok(Arc::new(FileStorage::open(self.root.join(world))?))
    }
}
