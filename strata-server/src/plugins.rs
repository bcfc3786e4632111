//! Named generator and light processor plugins worlds can be configured with.

use std::{collections::HashMap, sync::Arc};

use flexstr::SharedStr;
use log::debug;

use crate::world::{
    WorldError, WorldPlugins, WorldSettings,
    block_registry::{BlockRegistry, StaticBlockRegistry},
    generation::{ChunkGenerator, flat::FlatGenerator},
    lighting::{LightProcessor, NoLight, sky::SkyLight},
};

/// Creates a generator for a world with the given settings.
pub type GeneratorFactory = Arc<dyn Fn(&WorldSettings) -> Arc<dyn ChunkGenerator> + Send + Sync>;

/// Creates a light processor for a world with the given settings.
pub type LightFactory = Arc<dyn Fn(&WorldSettings) -> Arc<dyn LightProcessor> + Send + Sync>;

/// Resolves the plugin ids of [`WorldSettings`] into plugin instances.
///
/// All worlds share the same block registry.
#[derive(Clone)]
pub struct PluginRegistry {
    generators: HashMap<SharedStr, GeneratorFactory>,
    light_processors: HashMap<SharedStr, LightFactory>,
    blocks: Arc<dyn BlockRegistry>,
}

impl PluginRegistry {
    /// Creates a registry without any generators or light processors.
    #[must_use]
    pub fn new(blocks: Arc<dyn BlockRegistry>) -> Self {
        Self {
            generators: HashMap::new(),
            light_processors: HashMap::new(),
            blocks,
        }
    }

    /// Creates a registry knowing the basic blocks, the `flat` generator and the `sky` and `none`
    /// light processors.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new(Arc::new(StaticBlockRegistry::basic()));
        registry.register_generator(SharedStr::from_borrowed("flat"), |_| {
            Arc::new(FlatGenerator::default())
        });
        registry.register_light_processor(SharedStr::from_borrowed("sky"), |_| Arc::new(SkyLight));
        registry.register_light_processor(SharedStr::from_borrowed("none"), |_| Arc::new(NoLight));
        registry
    }

    /// Registers a generator under the given id, replacing any previous one.
    pub fn register_generator(
        &mut self,
        id: SharedStr,
        factory: impl Fn(&WorldSettings) -> Arc<dyn ChunkGenerator> + Send + Sync + 'static,
    ) {
        debug!("registering generator '{id}'");
        self.generators.insert(id, Arc::new(factory));
    }

    /// Registers a light processor under the given id, replacing any previous one.
    pub fn register_light_processor(
        &mut self,
        id: SharedStr,
        factory: impl Fn(&WorldSettings) -> Arc<dyn LightProcessor> + Send + Sync + 'static,
    ) {
        debug!("registering light processor '{id}'");
        self.light_processors.insert(id, Arc::new(factory));
    }

    /// The block registry shared by all worlds.
    #[must_use]
    pub fn blocks(&self) -> &Arc<dyn BlockRegistry> {
        &self.blocks
    }

    /// Ids of all registered generators.
    pub fn generator_ids(&self) -> impl Iterator<Item = &SharedStr> {
        self.generators.keys()
    }

    /// Ids of all registered light processors.
    pub fn light_processor_ids(&self) -> impl Iterator<Item = &SharedStr> {
        self.light_processors.keys()
    }

    /// Instantiates the plugins named by `settings`.
    pub fn instantiate(&self, settings: &WorldSettings) -> Result<WorldPlugins, WorldError> {
        let generator = self.generators.get(&settings.generator).ok_or_else(|| {
            WorldError::UnknownPlugin {
                kind: "generator",
                id: settings.generator.clone(),
            }
        })?;
        let light = self
            .light_processors
            .get(&settings.light_processor)
            .ok_or_else(|| WorldError::UnknownPlugin {
                kind: "light processor",
                id: settings.light_processor.clone(),
            })?;
        Ok(WorldPlugins {
            generator: generator(settings),
            light: light(settings),
            blocks: Arc::clone(&self.blocks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let registry = PluginRegistry::with_defaults();
        let settings = WorldSettings::default();
        assert!(registry.instantiate(&settings).is_ok());

        let settings = WorldSettings {
            light_processor: SharedStr::from_borrowed("none"),
            ..WorldSettings::default()
        };
        assert!(registry.instantiate(&settings).is_ok());
        assert_eq!(registry.generator_ids().count(), 1);
        assert_eq!(registry.light_processor_ids().count(), 2);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let registry = PluginRegistry::with_defaults();
        let settings = WorldSettings {
            generator: SharedStr::from_borrowed("caves"),
            ..WorldSettings::default()
        };
        let Err(error) = registry.instantiate(&settings) else {
            panic!("unknown generator accepted");
        };
        assert_eq!(
            error,
            WorldError::UnknownPlugin {
                kind: "generator",
                id: SharedStr::from_borrowed("caves"),
            }
        );
    }
}
