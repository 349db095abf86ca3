//! Config file loading: environments, extensions and run settings.

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::paths;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub environments: IndexMap<String, Environment>,

    /// Built-in extensions to attach, in attach order.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub settings: Settings,

    /// File the config was read from; `None` for the built-in empty config.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    /// Local command timeout in seconds. 0 disables it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub dry_run: bool,
}

fn default_extensions() -> Vec<String> {
    vec!["shell".to_string()]
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            dry_run: false,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environments: IndexMap::new(),
            extensions: default_extensions(),
            settings: Settings::default(),
            source: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(Format::Json),
            "yml" | "yaml" => Some(Format::Yaml),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
        }
    }
}

impl Config {
    pub fn environments(&self) -> &IndexMap<String, Environment> {
        &self.environments
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Parse `content` as `format` (`json`, `yml`/`yaml`, `toml`). `origin`
    /// only labels errors.
    pub fn parse(content: &str, format: &str, origin: &str) -> Result<Self> {
        let parsed = Format::from_name(format).ok_or_else(|| {
            Error::config_invalid_format(
                origin,
                format,
                "unsupported config format (expected json, yml, yaml or toml)",
            )
        })?;

        let mut config: Config = match parsed {
            Format::Json => serde_json::from_str(content)
                .map_err(|e| Error::config_invalid_format(origin, parsed.as_str(), e))?,
            Format::Yaml => {
                // An empty YAML document is an empty config.
                if content.trim().is_empty() {
                    Config::default()
                } else {
                    serde_yml::from_str(content)
                        .map_err(|e| Error::config_invalid_format(origin, parsed.as_str(), e))?
                }
            }
            Format::Toml => toml::from_str(content)
                .map_err(|e| Error::config_invalid_format(origin, parsed.as_str(), e))?,
        };

        for (name, env) in config.environments.iter_mut() {
            env.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Read a config file; the format follows the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let origin = path.to_string_lossy().to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_missing_key("config", Some(origin.clone()))
                    .with_hint(format!("No config file at {}", origin))
            } else {
                Error::internal_io(e.to_string(), Some(format!("read {}", origin)))
            }
        })?;

        let mut config = Self::parse(&content, extension, &origin)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Find the config to use: `explicit` if given, else the first
    /// `hostrun.{yml,yaml,json,toml}` in `cwd`, else the user-wide file,
    /// else an empty local-only config.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        for name in paths::PROJECT_CONFIG_NAMES {
            let candidate = cwd.join(name);
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }

        if let Ok(global) = paths::global_config() {
            if global.is_file() {
                return Self::load(&global);
            }
        }

        log_status!("config", "No config file found, running local-only");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        for env in self.environments.values() {
            env.validate()?;
        }
        if let Some(name) = self.extensions.iter().find(|n| n.trim().is_empty()) {
            return Err(Error::config_invalid_value(
                "extensions",
                Some(name.clone()),
                "Extension names must not be empty",
            ));
        }
        Ok(())
    }
}

/// Parse `key=value` overrides. Values that read as JSON (`3`, `true`,
/// `["a"]`) keep their type; anything else is a string.
pub fn parse_overrides<S: AsRef<str>>(pairs: &[S]) -> Result<Map<String, Value>> {
    let mut overrides = Map::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, raw) = pair.split_once('=').ok_or_else(|| {
            Error::validation_invalid_argument(
                "set",
                format!("Expected key=value, got '{}'", pair),
                None,
            )
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::validation_invalid_argument(
                "set",
                format!("Empty key in '{}'", pair),
                None,
            ));
        }
        let value =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}
