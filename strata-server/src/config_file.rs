//! Parser for `world.conf` style configuration files.
//!
//! The format consists of `key = value` lines. Lines starting with `#` are comments. A value of
//! `{` opens a group which is closed by a line containing only `}`; a value of `"""` starts a
//! multiline value which is closed by a line containing only `"""`.
//!
//! Top-level keys configure the registry and the defaults of every world, groups override world
//! settings for the world of the same name:
//!
//! ```text
//! ticks_per_second = 20
//! generator = flat
//!
//! lobby = {
//!     light_processor = none
//!     seed = 42
//! }
//! ```

use std::{
    fmt::{self, Display},
    fs,
    io::{BufRead, BufReader},
    mem,
    path::Path,
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use flexstr::SharedStr;
use log::{debug, warn};

use crate::{world::WorldSettings, world_registry::RegistrySettings};

const GROUP_END: &str = "}";
const MULTILINE_DELIMITER: &str = r#"""""#;

/// Reads registry settings from a file.
pub fn load(path: &Path) -> Result<RegistrySettings> {
    let reader = BufReader::new(
        fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
    );
    let mut builder = ConfigBuilder::new(0);
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        builder
            .parse_line(&line)
            .with_context(|| format!("{}:{}", path.display(), number + 1))?;
    }
    let config = builder.finish()?;
    debug!("loaded configuration from {}", path.display());
    resolve(&config)
}

/// Parses registry settings from a string.
pub fn parse(text: &str) -> Result<RegistrySettings> {
    resolve(&Config::parse(text)?)
}

/// A parsed configuration file which still contains its comments.
#[derive(Debug, Default)]
pub struct Config {
    items: Vec<ConfigItem>,
    depth: u32,
}

impl Config {
    fn new(depth: u32) -> Self {
        Self {
            items: Vec::new(),
            depth,
        }
    }

    /// Parses a configuration.
    pub fn parse(text: &str) -> Result<Self> {
        let mut builder = ConfigBuilder::new(0);
        for (number, line) in text.lines().enumerate() {
            builder
                .parse_line(line)
                .with_context(|| format!("line {}", number + 1))?;
        }
        builder.finish()
    }

    /// Iterates all keys and values in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&SharedStr, &ConfigValue)> {
        self.items
            .iter()
            .filter_map(|item| item.key_value.as_ref().map(|(key, value)| (key, value)))
    }

    /// Returns the last value of the given key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries()
            .filter(|&(candidate, _)| &**candidate == key)
            .map(|(_, value)| value)
            .last()
    }
}

impl Display for Config {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            item.write(formatter, self.depth)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ConfigItem {
    prelude: Vec<String>,
    key_value: Option<(SharedStr, ConfigValue)>,
}

impl ConfigItem {
    fn write(&self, formatter: &mut fmt::Formatter<'_>, depth: u32) -> fmt::Result {
        let indent = "    ".repeat(usize::try_from(depth).unwrap_or_default());
        for line in &self.prelude {
            writeln!(formatter, "{line}")?;
        }
        let Some((key, value)) = &self.key_value else {
            return Ok(());
        };
        match value {
            ConfigValue::String(value) if value.contains('\n') => {
                writeln!(formatter, "{indent}{key} = {MULTILINE_DELIMITER}")?;
                writeln!(formatter, "{value}")?;
                writeln!(formatter, "{MULTILINE_DELIMITER}")
            }
            ConfigValue::String(value) => writeln!(formatter, "{indent}{key} = {value}"),
            ConfigValue::Group(group) => {
                writeln!(formatter, "{indent}{key} = {{")?;
                write!(formatter, "{group}")?;
                writeln!(formatter, "{indent}{GROUP_END}")
            }
        }
    }
}

/// The value of a single key.
#[derive(Debug)]
pub enum ConfigValue {
    /// a plain (possibly multiline) value
    String(SharedStr),
    /// a nested group of keys
    Group(Config),
}

impl ConfigValue {
    fn as_str(&self, key: &str) -> Result<&str> {
        match self {
            Self::String(value) => Ok(&**value),
            Self::Group(_) => bail!("`{key}` must be a plain value, not a group"),
        }
    }
}

#[derive(Debug, Default)]
enum ConfigBuilderState {
    #[default]
    Default,
    Group {
        key: SharedStr,
        builder: Box<ConfigBuilder>,
    },
    Multiline {
        key: SharedStr,
        multiline: String,
    },
    Complete,
}

#[derive(Debug, Default)]
struct ConfigBuilder {
    config: Config,
    prelude: Vec<String>,
    state: ConfigBuilderState,
    termination_tag: Option<&'static str>,
}

impl ConfigBuilder {
    fn new(depth: u32) -> Self {
        Self {
            config: Config::new(depth),
            prelude: Vec::new(),
            state: ConfigBuilderState::Default,
            termination_tag: (depth > 0).then_some(GROUP_END),
        }
    }

    /// Consumes a line. Returns `true` once the closing line of a group has been consumed.
    fn parse_line(&mut self, line: &str) -> Result<bool> {
        let trimmed = line.trim();

        self.state = match mem::take(&mut self.state) {
            ConfigBuilderState::Default => {
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    self.prelude.push(line.to_owned());
                    ConfigBuilderState::Default
                } else if self.termination_tag == Some(trimmed) {
                    self.flush_prelude();
                    ConfigBuilderState::Complete
                } else {
                    let Some((key, value)) = trimmed.split_once('=') else {
                        bail!("invalid config line: {line}");
                    };
                    let key = SharedStr::from(key.trim().to_owned());
                    if key.is_empty() {
                        bail!("missing key: {line}");
                    }
                    match value.trim() {
                        "{" => ConfigBuilderState::Group {
                            key,
                            builder: Box::new(Self::new(self.config.depth + 1)),
                        },
                        MULTILINE_DELIMITER => ConfigBuilderState::Multiline {
                            key,
                            multiline: String::new(),
                        },
                        value => {
                            self.push(key, ConfigValue::String(value.to_owned().into()));
                            ConfigBuilderState::Default
                        }
                    }
                }
            }
            ConfigBuilderState::Group { key, mut builder } => {
                if builder.parse_line(line)? {
                    self.push(key, ConfigValue::Group(builder.finish()?));
                    ConfigBuilderState::Default
                } else {
                    ConfigBuilderState::Group { key, builder }
                }
            }
            ConfigBuilderState::Multiline { key, mut multiline } => {
                if trimmed == MULTILINE_DELIMITER {
                    self.push(key, ConfigValue::String(multiline.into()));
                    ConfigBuilderState::Default
                } else {
                    if !multiline.is_empty() {
                        multiline.push('\n');
                    }
                    multiline.push_str(line);
                    ConfigBuilderState::Multiline { key, multiline }
                }
            }
            ConfigBuilderState::Complete => {
                bail!("unexpected line after end of group");
            }
        };

        Ok(matches!(self.state, ConfigBuilderState::Complete))
    }

    fn push(&mut self, key: SharedStr, value: ConfigValue) {
        self.config.items.push(ConfigItem {
            prelude: mem::take(&mut self.prelude),
            key_value: Some((key, value)),
        });
    }

    fn flush_prelude(&mut self) {
        if !self.prelude.is_empty() {
            self.config.items.push(ConfigItem {
                prelude: mem::take(&mut self.prelude),
                key_value: None,
            });
        }
    }

    fn finish(mut self) -> Result<Config> {
        match self.state {
            ConfigBuilderState::Default => {
                if let Some(tag) = self.termination_tag {
                    bail!("missing `{tag}` at end of group");
                }
                self.flush_prelude();
            }
            ConfigBuilderState::Group { key, .. } => {
                bail!("missing `{GROUP_END}` for group `{key}`");
            }
            ConfigBuilderState::Multiline { key, .. } => {
                bail!("missing `{MULTILINE_DELIMITER}` for multiline value of `{key}`");
            }
            ConfigBuilderState::Complete => {}
        }
        Ok(self.config)
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|error| anyhow!("invalid value `{value}` for `{key}`: {error}"))
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(parse_value(key, value)?)
        .with_context(|| format!("invalid duration `{value}` for `{key}`"))
}

/// Applies a single world setting. Returns `false` for unknown keys.
fn apply_world_setting(settings: &mut WorldSettings, key: &str, value: &str) -> Result<bool> {
    match key {
        "chunk_y_count" => settings.layout.chunk_y_count = parse_value(key, value)?,
        "world_y_offset" => settings.layout.world_y_offset = parse_value(key, value)?,
        "chunk_lifetime" => settings.chunk_lifetime = parse_seconds(key, value)?,
        "random_tick_speed" => settings.random_tick_speed = parse_value(key, value)?,
        "generator" => settings.generator = value.to_owned().into(),
        "light_processor" => settings.light_processor = value.to_owned().into(),
        "seed" => settings.seed = Some(parse_value(key, value)?),
        _ => return Ok(false),
    }
    Ok(true)
}

fn world_settings(defaults: &WorldSettings, group: &Config) -> Result<WorldSettings> {
    let mut settings = defaults.clone();
    for (key, value) in group.entries() {
        if !apply_world_setting(&mut settings, key, value.as_str(key)?)? {
            warn!("ignoring unknown world setting `{key}`");
        }
    }
    Ok(settings)
}

/// Resolves a parsed configuration into registry settings.
pub fn resolve(config: &Config) -> Result<RegistrySettings> {
    let mut settings = RegistrySettings::default();
    for (key, value) in config.entries() {
        let ConfigValue::String(value) = value else {
            continue;
        };
        match &**key {
            "world_lifetime" => settings.world_lifetime = parse_seconds(key, value)?,
            "ticks_per_second" => {
                settings.ticks_per_second = parse_value(key, value)?;
                if settings.ticks_per_second == 0 {
                    bail!("`ticks_per_second` must be positive");
                }
            }
            "unload_budget" => settings.unload_budget = parse_value(key, value)?,
            _ => {
                if !apply_world_setting(&mut settings.defaults, key, value)? {
                    warn!("ignoring unknown setting `{key}`");
                }
            }
        }
    }
    // overrides start from the completed defaults regardless of their position in the file
    for (key, value) in config.entries() {
        if let ConfigValue::Group(group) = value {
            let overrides = world_settings(&settings.defaults, group)
                .with_context(|| format!("in world `{key}`"))?;
            settings.overrides.insert(key.clone(), overrides);
        }
    }
    Ok(settings)
}
