//! Resolved per-world settings.

use std::time::Duration;

use flexstr::SharedStr;
use strata_core::ChunkLayout;

/// Scalar settings a [`World`](super::World) is constructed with.
///
/// These are resolved by the configuration layer (see [`crate::config_file`]); the engine never
/// reads configuration files on its own.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldSettings {
    /// vertical extent of every chunk column
    pub layout: ChunkLayout,
    /// how long a chunk may stay unused before it is evicted
    pub chunk_lifetime: Duration,
    /// number of random block ticks per chunk and tick
    pub random_tick_speed: u32,
    /// id of the generator plugin
    pub generator: SharedStr,
    /// id of the light processor plugin
    pub light_processor: SharedStr,
    /// seed for newly created worlds; a random one is picked if missing
    pub seed: Option<i64>,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            layout: ChunkLayout::default(),
            chunk_lifetime: Duration::from_secs(30),
            random_tick_speed: 3,
            generator: SharedStr::from_borrowed("flat"),
            light_processor: SharedStr::from_borrowed("sky"),
            seed: None,
        }
    }
}
