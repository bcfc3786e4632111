//! Contains the error type of all world APIs.

use flexstr::SharedStr;
use strata_core::{BlockPos, ChunkPos, EntityId};

/// Errors reported by [`World`](super::World) and
/// [`WorldRegistry`](crate::world_registry::WorldRegistry).
///
/// The type is `Clone` because a single failed load is reported to every caller which joined the
/// same pending request.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// The chunk column is not resident. Weak accessors report this as `None` instead.
    #[error("chunk {0} is not loaded")]
    ChunkNotLoaded(ChunkPos),
    /// The chunk column is resident but its generation didn't finish yet.
    #[error("chunk {0} has not finished generating")]
    NotGenerated(ChunkPos),
    /// The position lies above or below the vertical range of the world.
    #[error("block {0} lies outside the world")]
    OutOfBounds(BlockPos),
    /// No entity with this id is registered.
    #[error("entity {0} is not registered")]
    UnknownEntity(EntityId),
    /// An entity with this id has already been registered.
    #[error("entity {0} is already registered")]
    DuplicateEntity(EntityId),
    /// No world with this id exists.
    #[error("world '{0}' does not exist")]
    UnknownWorld(SharedStr),
    /// Loading or generating a chunk failed. Retrying is up to the caller.
    #[error("chunk {pos} is unavailable: {reason}")]
    LoadFailure {
        /// the chunk which failed to load
        pos: ChunkPos,
        /// description of the underlying failure
        reason: SharedStr,
    },
    /// An unload request was rejected because something still holds on to the object.
    #[error("{0} is still referenced")]
    StillReferenced(SharedStr),
    /// The configuration names a generator or light processor which hasn't been registered.
    #[error("unknown {kind} plugin '{id}'")]
    UnknownPlugin {
        /// type of plugin that was requested
        kind: &'static str,
        /// requested id
        id: SharedStr,
    },
    /// The storage backend failed.
    #[error("storage failure: {0}")]
    Storage(SharedStr),
}

impl WorldError {
    pub(crate) fn load_failure(pos: ChunkPos, error: &anyhow::Error) -> Self {
        Self::LoadFailure {
            pos,
            reason: format!("{error:#}").into(),
        }
    }

    pub(crate) fn storage(error: &anyhow::Error) -> Self {
        Self::Storage(format!("{error:#}").into())
    }
}
