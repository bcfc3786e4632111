//! Scalar state of a world: seed, clock, weather, border, difficulty, rules and spawn point.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strata_core::BlockPos;

/// Length of a full day in ticks.
pub const DAY_LENGTH: u64 = 24_000;

/// The world seed together with its hashed form.
///
/// The hash is derived exactly once on construction. Only the raw seed is persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub struct WorldSeed {
    seed: i64,
    hashed: i64,
}

impl WorldSeed {
    /// Wraps a raw seed and derives its hash.
    #[must_use]
    pub fn new(seed: i64) -> Self {
        let digest = Sha256::digest(seed.to_be_bytes());
        let hashed = digest
            .first_chunk::<8>()
            .map_or(0, |bytes| i64::from_be_bytes(*bytes));
        Self { seed, hashed }
    }

    /// The raw seed.
    #[must_use]
    pub fn seed(self) -> i64 {
        self.seed
    }

    /// The first eight bytes of the SHA-256 digest of the seed.
    #[must_use]
    pub fn hashed(self) -> i64 {
        self.hashed
    }
}

impl From<i64> for WorldSeed {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<WorldSeed> for i64 {
    fn from(value: WorldSeed) -> Self {
        value.seed
    }
}

/// Difficulty of a world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// no hostile entities
    Peaceful,
    /// reduced damage
    Easy,
    /// the default
    #[default]
    Normal,
    /// increased damage
    Hard,
}

/// The square border of a world.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldBorder {
    /// center along the x axis
    pub center_x: f64,
    /// center along the z axis
    pub center_z: f64,
    /// edge length
    pub diameter: f64,
}

impl WorldBorder {
    /// Returns whether the block lies inside the border.
    #[must_use]
    pub fn contains(&self, pos: BlockPos) -> bool {
        let radius = self.diameter / 2.0;
        let center = pos.center();
        (center.x - self.center_x).abs() <= radius && (center.z - self.center_z).abs() <= radius
    }
}

impl Default for WorldBorder {
    fn default() -> Self {
        Self {
            center_x: 0.0,
            center_z: 0.0,
            diameter: 59_999_968.0,
        }
    }
}

/// Rain and thunder state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weather {
    /// whether it's raining right now
    pub raining: bool,
    /// ticks until `raining` flips
    pub rain_time: u32,
    /// whether it's thundering right now
    pub thundering: bool,
    /// ticks until `thundering` flips
    pub thunder_time: u32,
}

impl Weather {
    /// Advances the weather timers by one tick.
    /// Returns `true` if rain or thunder started or stopped.
    pub fn tick(&mut self, mut next_duration: impl FnMut(bool) -> u32) -> bool {
        let mut changed = false;
        if self.rain_time == 0 {
            self.raining = !self.raining;
            self.rain_time = next_duration(self.raining);
            changed = true;
        } else {
            self.rain_time -= 1;
        }
        if self.thunder_time == 0 {
            self.thundering = !self.thundering;
            self.thunder_time = next_duration(self.thundering);
            changed = true;
        } else {
            self.thunder_time -= 1;
        }
        changed
    }
}

/// Game rules evaluated by the engine itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "game rules are a flat list of switches"
)]
pub struct GameRules {
    /// advance `day_time` each tick
    pub do_daylight_cycle: bool,
    /// advance the weather timers each tick
    pub do_weather_cycle: bool,
    /// let the block registry produce drops for destroyed blocks
    pub do_tile_drops: bool,
    /// dispatch random block ticks
    pub do_random_ticks: bool,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            do_daylight_cycle: true,
            do_weather_cycle: true,
            do_tile_drops: true,
            do_random_ticks: true,
        }
    }
}

/// All scalar world state which is persisted alongside the chunks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldMetadata {
    /// seed of the world
    pub seed: WorldSeed,
    /// ticks since creation of the world
    pub game_time: u64,
    /// time of day; wraps every [`DAY_LENGTH`] ticks
    pub day_time: u64,
    /// default spawn point for new players
    pub spawn: BlockPos,
    /// world border
    #[serde(default)]
    pub border: WorldBorder,
    /// rain and thunder
    #[serde(default)]
    pub weather: Weather,
    /// difficulty
    #[serde(default)]
    pub difficulty: Difficulty,
    /// game rules
    #[serde(default)]
    pub game_rules: GameRules,
}

impl WorldMetadata {
    /// Creates the state of a brand-new world.
    #[must_use]
    pub fn new(seed: i64) -> Self {
        Self {
            seed: WorldSeed::new(seed),
            game_time: 0,
            day_time: 0,
            spawn: BlockPos::new(0, 64, 0),
            border: WorldBorder::default(),
            weather: Weather {
                rain_time: 12_000,
                thunder_time: 36_000,
                ..Weather::default()
            },
            difficulty: Difficulty::default(),
            game_rules: GameRules::default(),
        }
    }

    /// Advances clock and weather by one tick.
    /// Returns `true` if the weather changed.
    pub fn tick(&mut self, next_weather_duration: impl FnMut(bool) -> u32) -> bool {
        self.game_time += 1;
        if self.game_rules.do_daylight_cycle {
            self.day_time = (self.day_time + 1) % DAY_LENGTH;
        }
        self.game_rules.do_weather_cycle && self.weather.tick(next_weather_duration)
    }
}
