use crate::{ConfigError, LoopSettings, PluginCollection, ReconnectPolicy, ThrottleSettings};

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};
use tracing_core::LevelFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub address: String,
    pub port: u16,
}

/// Who the bot is on the network
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IdentityConfig {
    pub nickname: String,
    pub user: String,
    pub realname: String,
    #[serde(default = "default_quit_message")]
    pub quit_message: String,
    #[serde(default)]
    pub channels: Vec<String>,
    /// Nicknames allowed to use administrative commands
    #[serde(default)]
    pub admins: Vec<String>,
}

fn default_quit_message() -> String {
    "Shutting down".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinLogTarget {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogTarget {
    File { filename: PathBuf },
    Builtin(BuiltinLogTarget),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub target: LogTarget,
    #[serde(default)]
    pub modules: Vec<String>,
    pub level: Option<LogLevel>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// Directory in which file targets are created
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    pub default_level: Option<LogLevel>,
    #[serde(default)]
    pub module_levels: HashMap<String, LogLevel>,
    #[serde(default = "default_log_targets")]
    pub targets: Vec<LogEntry>,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("log")
}

fn default_log_targets() -> Vec<LogEntry> {
    vec![LogEntry {
        target: LogTarget::Builtin(BuiltinLogTarget::Stdout),
        modules: Vec::new(),
        level: Some(LogLevel::Info),
    }]
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            default_level: None,
            module_levels: HashMap::new(),
            targets: default_log_targets(),
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(arg: LogLevel) -> LevelFilter {
        match arg {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

/// The complete bot configuration file
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub connection: ConnectionConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub throttle: ThrottleSettings,
    #[serde(default)]
    pub main_loop: LoopSettings,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default)]
    pub save_on_exit: bool,
    #[serde(default)]
    pub log: LoggingConfig,
    /// Settings sections, keyed by plugin name
    #[serde(default)]
    pub plugins: BTreeMap<String, serde_json::Value>,
}

impl BotConfig {
    /// Load a configuration file. JSON5 syntax (comments, trailing commas) is accepted.
    pub fn load_file(filename: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let filename = filename.as_ref();
        let text = fs::read_to_string(filename)
            .map_err(|e| ConfigError::IoError(e, filename.to_owned()))?;
        let config: Self = json5::from_str(&text)
            .map_err(|e| ConfigError::Json5Error(e, filename.to_owned()))?;
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e, filename.to_owned()))?;
        Ok(config)
    }

    /// Reject settings the runtime cannot work with
    pub fn validate(&self) -> Result<(), String> {
        self.throttle.validate()
    }

    /// Write this configuration as pretty-printed JSON
    pub fn save_file(&self, filename: impl AsRef<Path>) -> Result<(), ConfigError> {
        let filename = filename.as_ref();
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::JsonError(e, filename.to_owned()))?;
        fs::write(filename, text).map_err(|e| ConfigError::IoError(e, filename.to_owned()))
    }

    /// Names of plugin settings sections that no known plugin will read
    pub fn invalid_entries<'a>(&self, known: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let known: Vec<&str> = known.into_iter().collect();
        self.plugins
            .keys()
            .filter(|name| !known.contains(&name.as_str()))
            .cloned()
            .collect()
    }
}

/// Persists the running configuration on request
pub trait ConfigStore: Send + Sync {
    fn write_configuration(&self, plugins: &PluginCollection) -> Result<(), ConfigError>;
}

/// Writes the configuration back to the file it was loaded from, with each
/// plugin's current settings merged in
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    base: BotConfig,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>, base: BotConfig) -> Self {
        Self {
            path: path.into(),
            base,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configuration that would be written for the given plugin set
    pub fn merged(&self, plugins: &PluginCollection) -> BotConfig {
        let mut config = self.base.clone();
        for plugin in plugins.iter() {
            if let Some(settings) = plugin.serialise_settings() {
                config.plugins.insert(plugin.name().to_string(), settings);
            }
        }
        config
    }
}

impl ConfigStore for JsonConfigStore {
    #[tracing::instrument(skip_all, fields(path = %self.path.display()))]
    fn write_configuration(&self, plugins: &PluginCollection) -> Result<(), ConfigError> {
        self.merged(plugins).save_file(&self.path)?;
        tracing::info!("Configuration saved");
        Ok(())
    }
}
