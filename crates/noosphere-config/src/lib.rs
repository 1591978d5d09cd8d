//! Configuration management for the noosphere collective engine.
//!
//! All tunable parameters live here. Loaded from TOML at startup, falling
//! back to defaults when no config file exists.

pub mod config;

pub use config::{
    CollectiveConfig, ConfigError, EngineConfig, LoggingSettings, PersistenceSettings,
    CONFIG_ENV_VAR,
};
