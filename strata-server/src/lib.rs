//! Chunk storage and world life cycle engine of the strata game server.
//!
//! A [`WorldRegistry`](world_registry::WorldRegistry) owns all loaded
//! [`World`](world::World)s. Every world keeps its resident chunk columns in memory, loads,
//! generates and saves them in the background and drives scheduled and random block ticks.

pub mod config_file;
pub mod plugins;
pub mod world;
pub mod world_registry;
