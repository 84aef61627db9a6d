//! Engine configuration.
//!
//! Settings come from built-in defaults, optionally overridden by an INI
//! file. The default location is `<config dir>/depotsync/config.ini`:
//!
//! ```ini
//! [download]
//! language = en-US
//! bitness = 64
//! generation = 2
//! platform = windows
//! url_selection = round-robin
//!
//! [progress]
//! snapshot_interval_ms = 5000
//! emit_interval_ms = 100
//!
//! [verify]
//! after_download = true
//!
//! [logging]
//! level = debug
//! file = /var/log/depotsync.log
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use crate::locator::UrlSelection;
use crate::logging::LogConfig;
use crate::manifest::{Build, Depot};
use crate::progress::{TrackerConfig, DEFAULT_EMIT_INTERVAL_MS, DEFAULT_SNAPSHOT_INTERVAL_MS};
use crate::select::{filter_by_bitness, filter_by_language, select_build_for_platform, DEFAULT_GENERATION};

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("invalid value '{value}' for {section}.{key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// Location of the per-user config file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("depotsync").join("config.ini"))
}

/// Settings for depot selection, progress tracking and verification.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Language filter; `*` keeps only language-neutral depots.
    pub language: String,
    /// Required bitness, e.g. `64`. `None` disables the filter.
    pub bitness: Option<String>,
    /// Preferred manifest generation when picking a build.
    pub generation: u32,
    /// Build platform, e.g. `windows`.
    pub platform: String,
    pub url_selection: UrlSelection,
    pub snapshot_interval: Duration,
    pub emit_interval: Duration,
    pub verify_after_download: bool,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            bitness: None,
            generation: DEFAULT_GENERATION,
            platform: "windows".to_string(),
            url_selection: UrlSelection::First,
            snapshot_interval: Duration::from_millis(DEFAULT_SNAPSHOT_INTERVAL_MS),
            emit_interval: Duration::from_millis(DEFAULT_EMIT_INTERVAL_MS),
            verify_after_download: true,
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_bitness(mut self, bitness: Option<String>) -> Self {
        self.bitness = bitness;
        self
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_url_selection(mut self, selection: UrlSelection) -> Self {
        self.url_selection = selection;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_emit_interval(mut self, interval: Duration) -> Self {
        self.emit_interval = interval;
        self
    }

    pub fn with_verify_after_download(mut self, verify: bool) -> Self {
        self.verify_after_download = verify;
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Tracker settings for a download split into `job_count` jobs.
    pub fn tracker_config(&self, job_count: usize) -> TrackerConfig {
        TrackerConfig::default()
            .with_job_count(job_count)
            .with_snapshot_interval(self.snapshot_interval)
            .with_emit_interval(self.emit_interval)
    }

    /// First build of the configured generation and platform.
    pub fn select_build<'a>(&self, builds: &'a [Build]) -> Option<&'a Build> {
        select_build_for_platform(builds, self.generation, &self.platform)
    }

    /// Depots for the configured language, narrowed by bitness when one is set.
    pub fn select_depots<'a>(&self, depots: &'a [Depot]) -> Vec<&'a Depot> {
        let depots = filter_by_language(depots, &self.language);
        match &self.bitness {
            Some(bitness) => filter_by_bitness(depots, bitness),
            None => depots,
        }
    }

    /// Load from `path`, or from [`default_config_path`] when `None`.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file exists but cannot be read or
    /// parsed, or a value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_ini_str(&content)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse INI text over the defaults.
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();

        if let Some(language) = get(&ini, "download", "language") {
            config.language = language.to_string();
        }
        if let Some(bitness) = get(&ini, "download", "bitness") {
            config.bitness = Some(bitness.to_string());
        }
        if let Some(generation) = parse(&ini, "download", "generation")? {
            config.generation = generation;
        }
        if let Some(platform) = get(&ini, "download", "platform") {
            config.platform = platform.to_string();
        }
        if let Some(value) = get(&ini, "download", "url_selection") {
            config.url_selection = match value.to_ascii_lowercase().as_str() {
                "first" => UrlSelection::First,
                "round-robin" | "round_robin" | "roundrobin" => UrlSelection::RoundRobin,
                _ => return Err(invalid("download", "url_selection", value)),
            };
        }

        if let Some(ms) = parse::<u64>(&ini, "progress", "snapshot_interval_ms")? {
            config.snapshot_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&ini, "progress", "emit_interval_ms")? {
            config.emit_interval = Duration::from_millis(ms);
        }
        if let Some(verify) = parse(&ini, "verify", "after_download")? {
            config.verify_after_download = verify;
        }

        if let Some(level) = get(&ini, "logging", "level") {
            config.log.level = level.to_string();
        }
        if let Some(file) = get(&ini, "logging", "file") {
            config.log.file = Some(PathBuf::from(file));
        }

        Ok(config)
    }
}

fn get<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.section(Some(section))
        .and_then(|s| s.get(key))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse<T: FromStr>(ini: &Ini, section: &str, key: &str) -> Result<Option<T>, ConfigError> {
    match get(ini, section, key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| invalid(section, key, value)),
    }
}

fn invalid(section: &str, key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}
