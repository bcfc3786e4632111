//! Owns all loaded worlds, opens them on demand and unloads them once they've been idle long
//! enough.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use flexstr::SharedStr;
use log::{debug, error, info};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;

use crate::{
    plugins::PluginRegistry,
    world::{World, WorldError, WorldSettings, guarded, storage::StorageProvider},
};

/// Scalar settings of the registry and the worlds it opens.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrySettings {
    /// how long a world without resident chunks is kept before it is unloaded
    pub world_lifetime: Duration,
    /// target tick rate of the tick driver
    pub ticks_per_second: u32,
    /// maximum number of chunks evicted per world and sweep
    pub unload_budget: usize,
    /// settings of all worlds without overrides
    pub defaults: WorldSettings,
    /// settings of individual worlds by id
    pub overrides: HashMap<SharedStr, WorldSettings>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            world_lifetime: Duration::from_secs(60),
            ticks_per_second: 20,
            unload_budget: 64,
            defaults: WorldSettings::default(),
            overrides: HashMap::new(),
        }
    }
}

impl RegistrySettings {
    /// Settings of the world with the given id.
    #[must_use]
    pub fn world_settings(&self, id: &str) -> WorldSettings {
        self.overrides
            .get(&SharedStr::from_owned(id.to_owned()))
            .unwrap_or(&self.defaults)
            .clone()
    }

    /// Time between two ticks.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second.max(1)
    }
}

struct WorldEntry {
    world: Arc<World>,
    /// since when the world reports to be completely idle
    idle_since: Option<Instant>,
}

/// Measures the tick rate over windows of one second.
#[derive(Debug, Default)]
struct TpsWindow {
    started: Option<Instant>,
    ticks: u32,
}

impl TpsWindow {
    /// Counts a tick. Returns the tick rate once a window is complete.
    fn tick(&mut self, now: Instant) -> Option<f64> {
        let Some(started) = self.started else {
            self.started = Some(now);
            return None;
        };
        self.ticks += 1;
        let elapsed = now.saturating_duration_since(started);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let tps = f64::from(self.ticks) / elapsed.as_secs_f64();
        self.started = Some(now);
        self.ticks = 0;
        Some(tps)
    }
}

/// All loaded worlds by id.
pub struct WorldRegistry {
    settings: RegistrySettings,
    plugins: PluginRegistry,
    storage: Arc<dyn StorageProvider>,
    runtime: tokio::runtime::Handle,
    worlds: Mutex<HashMap<SharedStr, WorldEntry>>,
    tps_window: Mutex<TpsWindow>,
    tps: watch::Sender<f64>,
}

impl WorldRegistry {
    /// Creates an empty registry. Worlds are opened on first access.
    #[must_use]
    pub fn new(
        settings: RegistrySettings,
        plugins: PluginRegistry,
        storage: Arc<dyn StorageProvider>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let (tps, _) = watch::channel(0.0);
        Self {
            settings,
            plugins,
            storage,
            runtime,
            worlds: Mutex::new(HashMap::new()),
            tps_window: Mutex::new(TpsWindow::default()),
            tps,
        }
    }

    /// The settings of this registry.
    #[must_use]
    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Returns a world, opening it if necessary.
    pub fn get(&self, id: &str) -> Result<Arc<World>, WorldError> {
        let name = SharedStr::from_owned(id.to_owned());
        let mut worlds = self.worlds.lock();
        if let Some(entry) = worlds.get_mut(&name) {
            entry.idle_since = None;
            return Ok(Arc::clone(&entry.world));
        }

        let settings = self.settings.world_settings(id);
        let plugins = self.plugins.instantiate(&settings)?;
        let storage =
            guarded(|| self.storage.open(id)).map_err(|error| WorldError::storage(&error))?;
        let world = World::open(
            name.clone(),
            settings,
            plugins,
            storage,
            self.runtime.clone(),
        )?;
        worlds.insert(
            name,
            WorldEntry {
                world: Arc::clone(&world),
                idle_since: None,
            },
        );
        Ok(world)
    }

    /// Returns a world only if it is loaded.
    #[must_use]
    pub fn get_if_loaded(&self, id: &str) -> Option<Arc<World>> {
        self.worlds
            .lock()
            .get(&SharedStr::from_owned(id.to_owned()))
            .map(|entry| Arc::clone(&entry.world))
    }

    /// Ids of all loaded worlds.
    #[must_use]
    pub fn loaded(&self) -> Vec<SharedStr> {
        self.worlds.lock().keys().cloned().collect()
    }

    fn snapshot(&self) -> Vec<Arc<World>> {
        self.worlds
            .lock()
            .values()
            .map(|entry| Arc::clone(&entry.world))
            .collect()
    }

    /// Saves a loaded world without unloading it.
    pub fn save(&self, id: &str) -> Result<(), WorldError> {
        self.get_if_loaded(id)
            .ok_or_else(|| WorldError::UnknownWorld(SharedStr::from_owned(id.to_owned())))?
            .save()
    }

    /// Saves all loaded worlds. Every world is attempted; the first failure is returned.
    pub fn save_all(&self) -> Result<(), WorldError> {
        let mut result = Ok(());
        for world in self.snapshot() {
            if let Err(error) = world.save() {
                error!("saving world '{}' failed: {error}", world.name());
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }

    /// Saves and unloads a world.
    ///
    /// Fails if anything besides the registry still refers to the world or a load is in flight.
    pub fn save_and_unload(&self, id: &str) -> Result<(), WorldError> {
        let name = SharedStr::from_owned(id.to_owned());
        let world = {
            let mut worlds = self.worlds.lock();
            let entry = worlds
                .get(&name)
                .ok_or_else(|| WorldError::UnknownWorld(name.clone()))?;
            if Arc::strong_count(&entry.world) > 1 || entry.world.pending_loads() > 0 {
                return Err(WorldError::StillReferenced(
                    format!("world '{id}'").into(),
                ));
            }
            worlds.remove(&name).map(|entry| entry.world)
        };
        if let Some(world) = world {
            if let Err(error) = world.shutdown() {
                self.restore(world);
                return Err(error);
            }
            info!("unloaded world '{id}'");
        }
        Ok(())
    }

    /// Ticks every loaded world once and updates the tick rate.
    pub fn tick_all<R: Rng>(&self, rng: &mut R, now: Instant) {
        for world in self.snapshot() {
            let stats = world.tick(rng, now);
            if stats.handler_failures > 0 {
                debug!(
                    "world '{}': {} handlers failed in tick {}",
                    world.name(),
                    stats.handler_failures,
                    stats.tick
                );
            }
        }
        if let Some(tps) = self.tps_window.lock().tick(now) {
            self.tps.send_replace(tps);
        }
    }

    /// Evicts idle chunks of all worlds, then unloads worlds which have been completely idle for
    /// longer than the world lifetime and aren't referenced anywhere else.
    ///
    /// Returns the number of unloaded worlds.
    pub fn sweep(&self, now: Instant) -> usize {
        let idle: Vec<(SharedStr, bool)> = self
            .snapshot()
            .into_iter()
            .map(|world| {
                let mut budget = self.settings.unload_budget;
                let idle = world.collect_unused_data(now, &mut budget);
                (world.name().clone(), idle)
            })
            .collect();

        let evicted: Vec<Arc<World>> = {
            let mut worlds = self.worlds.lock();
            let mut expired = Vec::new();
            for (id, idle) in idle {
                let Some(entry) = worlds.get_mut(&id) else {
                    continue;
                };
                if !idle {
                    entry.idle_since = None;
                    continue;
                }
                let idle_since = *entry.idle_since.get_or_insert(now);
                if now.saturating_duration_since(idle_since) >= self.settings.world_lifetime
                    && Arc::strong_count(&entry.world) == 1
                {
                    expired.push(id);
                }
            }
            expired
                .iter()
                .filter_map(|id| worlds.remove(id))
                .map(|entry| entry.world)
                .collect()
        };

        let mut unloaded = 0;
        for world in evicted {
            match world.shutdown() {
                Ok(()) => {
                    info!("unloaded idle world '{}'", world.name());
                    unloaded += 1;
                }
                Err(error) => {
                    error!("unloading world '{}' failed: {error}", world.name());
                    self.restore(world);
                }
            }
        }
        unloaded
    }

    /// Registers a world again whose unload failed, so its unsaved columns aren't lost.
    fn restore(&self, world: Arc<World>) {
        self.worlds
            .lock()
            .entry(world.name().clone())
            .or_insert(WorldEntry {
                world,
                idle_since: None,
            });
    }

    /// The most recently measured tick rate.
    #[must_use]
    pub fn tps(&self) -> f64 {
        *self.tps.borrow()
    }

    /// Subscribes to tick rate updates; one per second while ticking.
    #[must_use]
    pub fn subscribe_tps(&self) -> watch::Receiver<f64> {
        self.tps.subscribe()
    }

    /// Shuts down and unloads all worlds.
    pub fn shutdown(&self) -> Result<(), WorldError> {
        let worlds: Vec<Arc<World>> = self
            .worlds
            .lock()
            .drain()
            .map(|(_, entry)| entry.world)
            .collect();
        let mut result = Ok(());
        for world in worlds {
            if let Err(error) = world.shutdown() {
                error!("shutting down world '{}' failed: {error}", world.name());
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }
}
