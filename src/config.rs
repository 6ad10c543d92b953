use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfigSource::Default => "default",
            ConfigSource::File => "file",
            ConfigSource::Environment => "environment",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Remote server and replay tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server URL (e.g., "http://localhost:8080" or "https://crm.example.com")
    pub server_url: Option<String>,
    /// API key sent as a bearer token
    pub api_key: Option<String>,
    /// Seconds between connectivity probes in watch mode
    pub probe_interval_secs: u64,
    /// Quiet period after reconnecting before replay starts
    pub quiet_period_ms: u64,
    /// Attempts before a queue entry is set aside
    pub max_attempts: u32,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            probe_interval_secs: 15,
            quiet_period_ms: 2000,
            max_attempts: 5,
            request_timeout_secs: 10,
        }
    }
}

impl SyncConfig {
    /// Returns true if a server is configured
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some()
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Sync configuration
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    sync: Option<SyncConfig>,
}

impl Config {
    /// Loads configuration: environment over file over defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self {
            database_path: ConfigValue::new(
                Self::default_data_dir().join("fieldsync.db"),
                ConfigSource::Default,
            ),
            config_file: None,
            sync: SyncConfig::default(),
        };

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if !path.exists() {
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
        let file: ConfigFile =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(path.clone(), e))?;

        if let Some(db_path) = file.database_path {
            // Relative paths are relative to the config file.
            let resolved = match path.parent() {
                Some(dir) if db_path.is_relative() => dir.join(db_path),
                _ => db_path,
            };
            config.database_path = ConfigValue::new(resolved, ConfigSource::File);
        }
        if let Some(sync) = file.sync {
            config.sync = sync;
        }
        config.config_file = Some(path);
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db_path) = lookup("FIELDSYNC_DATABASE_PATH") {
            self.database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Some(url) = lookup("FIELDSYNC_SERVER_URL") {
            self.sync.server_url = Some(url);
        }
        if let Some(key) = lookup("FIELDSYNC_API_KEY") {
            self.sync.api_key = Some(key);
        }
    }

    /// `<platform config dir>/fieldsync`
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fieldsync")
    }

    /// `<platform data dir>/fieldsync`
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fieldsync")
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read(PathBuf, std::io::Error),
    Parse(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::Parse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
