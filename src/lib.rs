//! Noosphere: a collective consciousness engine for multi-agent systems.
//!
//! This crate re-exports the workspace members:
//!
//! - [`config`]: TOML configuration (`noosphere-config`)
//! - [`collective`]: the engine itself (`noosphere-collective`)
//! - [`persistence`]: snapshot storage and checkpointing
//!   (`noosphere-persistence`)
//!
//! and provides [`telemetry::init_tracing`] for embedding processes.

pub mod telemetry;

pub use noosphere_collective as collective;
pub use noosphere_config as config;
pub use noosphere_persistence as persistence;

pub use noosphere_collective::{
    Collective, CollectiveError, CollectiveRegistry, NewThought, Strategies, ThoughtType,
};
pub use noosphere_config::EngineConfig;
