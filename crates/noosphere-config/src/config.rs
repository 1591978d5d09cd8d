//! Engine configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "NOOSPHERE_CONFIG";

/// Error types for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-collective tuning.
    pub collective: CollectiveConfig,
    /// Snapshot storage and checkpoint cadence.
    pub persistence: PersistenceSettings,
    /// Tracing output.
    pub logging: LoggingSettings,
}

/// Tuning for a single collective.
///
/// This is carried inside every snapshot so a restored collective behaves
/// exactly like the one that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectiveConfig {
    /// Similarity a pair must strictly exceed to become entangled.
    pub entanglement_threshold: f64,

    /// How many recent thoughts each contribution is compared against.
    pub window_size: usize,

    /// Default coherence floor for collapse requests.
    pub min_coherence: f64,

    /// Maximum live thoughts; `None` means unbounded.
    pub max_thoughts: Option<usize>,

    /// Evict the oldest thought when `max_thoughts` is reached. When false
    /// the contribution is rejected with a capacity error instead.
    pub evict_oldest: bool,

    /// Required length of every similarity feature vector, if fixed.
    pub feature_dimensions: Option<usize>,
}

impl Default for CollectiveConfig {
    fn default() -> Self {
        Self {
            entanglement_threshold: 0.6,
            window_size: 200,
            min_coherence: 0.5,
            max_thoughts: None,
            evict_oldest: true,
            feature_dimensions: None,
        }
    }
}

impl CollectiveConfig {
    /// Set the entanglement threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.entanglement_threshold = threshold;
        self
    }

    /// Set the comparison window size.
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Cap the number of live thoughts.
    pub fn with_max_thoughts(mut self, max: usize, evict_oldest: bool) -> Self {
        self.max_thoughts = Some(max);
        self.evict_oldest = evict_oldest;
        self
    }

    /// Require a fixed feature vector length.
    pub fn with_feature_dimensions(mut self, dimensions: usize) -> Self {
        self.feature_dimensions = Some(dimensions);
        self
    }

    /// Check that every value is inside its legal range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.entanglement_threshold.is_finite()
            || !(0.0..1.0).contains(&self.entanglement_threshold)
        {
            return Err(ConfigError::Invalid(format!(
                "entanglement_threshold must be in [0, 1), got {}",
                self.entanglement_threshold
            )));
        }
        if self.window_size == 0 {
            return Err(ConfigError::Invalid(
                "window_size must be at least 1".to_string(),
            ));
        }
        if !self.min_coherence.is_finite() || !(0.0..=1.0).contains(&self.min_coherence) {
            return Err(ConfigError::Invalid(format!(
                "min_coherence must be in [0, 1], got {}",
                self.min_coherence
            )));
        }
        if self.max_thoughts == Some(0) {
            return Err(ConfigError::Invalid(
                "max_thoughts must be at least 1 when set".to_string(),
            ));
        }
        if self.feature_dimensions == Some(0) {
            return Err(ConfigError::Invalid(
                "feature_dimensions must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where snapshots go and how often they are taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Snapshot directory. Defaults to the platform data directory.
    pub directory: Option<PathBuf>,

    /// Seconds between periodic checkpoints.
    pub checkpoint_interval_secs: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            directory: None,
            checkpoint_interval_secs: 300,
        }
    }
}

impl PersistenceSettings {
    /// Resolve the snapshot directory, falling back to the platform data dir.
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().join("snapshots")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("rs", "noosphere", "noosphere")
}

impl EngineConfig {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `NOOSPHERE_CONFIG`, then the platform config dir, then
    /// fall back to defaults. A file that exists but fails to parse is an
    /// error, never silently replaced by defaults.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }

        if let Some(dirs) = project_dirs() {
            let path = dirs.config_dir().join("noosphere.toml");
            if path.exists() {
                return Self::load(&path);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collective.validate()?;
        if self.persistence.checkpoint_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
