//! Common types used across the collective engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a contributing agent.
pub type AgentId = String;

/// Identifier of a collective instance.
pub type CollectiveId = String;

/// Identifier of an emitted pattern.
pub type PatternId = String;

/// Identifier of a thought: its append sequence position within the
/// collective. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThoughtId(pub u64);

impl ThoughtId {
    pub fn seq(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThoughtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thought-{}", self.0)
    }
}

/// Error types for collective operations.
#[derive(Debug, thiserror::Error)]
pub enum CollectiveError {
    #[error("Invalid thought: {0}")]
    InvalidThought(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Capacity exceeded: collective holds the maximum of {max} thoughts")]
    CapacityExceeded { max: usize },

    #[error("Thought not found: {0}")]
    ThoughtNotFound(ThoughtId),

    #[error("Collective already exists: {0}")]
    CollectiveExists(CollectiveId),

    #[error("Collective not found: {0}")]
    CollectiveNotFound(CollectiveId),

    #[error("Comparison failed: {0}")]
    Comparison(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] noosphere_config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CollectiveError {
    pub fn invalid_thought(reason: impl Into<String>) -> Self {
        Self::InvalidThought(reason.into())
    }

    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery(reason.into())
    }

    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptSnapshot(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, CollectiveError>;
