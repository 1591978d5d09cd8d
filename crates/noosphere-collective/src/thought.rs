//! Thoughts: the atomic contributions agents make to a collective.

use crate::types::{AgentId, CollectiveError, Result, ThoughtId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    Observation,
    Question,
    Hypothesis,
    Insight,
    Concern,
}

impl ThoughtType {
    pub const ALL: [ThoughtType; 5] = [
        ThoughtType::Observation,
        ThoughtType::Question,
        ThoughtType::Hypothesis,
        ThoughtType::Insight,
        ThoughtType::Concern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThoughtType::Observation => "observation",
            ThoughtType::Question => "question",
            ThoughtType::Hypothesis => "hypothesis",
            ThoughtType::Insight => "insight",
            ThoughtType::Concern => "concern",
        }
    }
}

impl fmt::Display for ThoughtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThoughtType {
    type Err = CollectiveError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        ThoughtType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| CollectiveError::invalid_thought(format!("unknown thought type '{}'", s)))
    }
}

/// A stored thought. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Sequence-assigned identifier
    pub id: ThoughtId,

    /// The contributing agent
    pub agent_id: AgentId,

    pub thought_type: ThoughtType,

    /// Opaque payload, forwarded untouched
    pub content: serde_json::Value,

    /// Contributor's self-reported certainty (0.0 to 1.0)
    pub confidence: f64,

    /// Pre-computed vector used only for entanglement weights
    pub similarity_features: Vec<f32>,

    /// Assignment time; non-decreasing in `id` order
    pub created_at: DateTime<Utc>,

    /// False only once the thought has been archived
    pub superposed: bool,
}

impl Thought {
    /// Re-check the fields a caller controls. Used on append and when
    /// loading snapshots.
    pub fn validate_fields(
        agent_id: &str,
        confidence: f64,
        features: &[f32],
        feature_dimensions: Option<usize>,
    ) -> Result<()> {
        if agent_id.trim().is_empty() {
            return Err(CollectiveError::invalid_thought("agent_id must not be empty"));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(CollectiveError::invalid_thought(format!(
                "confidence must be in [0, 1], got {}",
                confidence
            )));
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(CollectiveError::invalid_thought(
                "similarity_features must be finite",
            ));
        }
        if let Some(expected) = feature_dimensions {
            if features.len() != expected {
                return Err(CollectiveError::invalid_thought(format!(
                    "similarity_features must have {} dimensions, got {}",
                    expected,
                    features.len()
                )));
            }
        }
        Ok(())
    }
}

/// A thought as submitted by an agent, before the store assigns its id
/// and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewThought {
    pub agent_id: AgentId,
    pub thought_type: ThoughtType,
    pub content: serde_json::Value,
    pub confidence: f64,
    pub similarity_features: Vec<f32>,
}

impl NewThought {
    pub fn new(
        agent_id: impl Into<AgentId>,
        thought_type: ThoughtType,
        content: serde_json::Value,
        confidence: f64,
        similarity_features: Vec<f32>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            thought_type,
            content,
            confidence,
            similarity_features,
        }
    }

    /// Build from a textual thought type, as received from a transport.
    pub fn parse_type(
        agent_id: impl Into<AgentId>,
        thought_type: &str,
        content: serde_json::Value,
        confidence: f64,
        similarity_features: Vec<f32>,
    ) -> Result<Self> {
        Ok(Self::new(
            agent_id,
            thought_type.parse()?,
            content,
            confidence,
            similarity_features,
        ))
    }

    pub fn validate(&self, feature_dimensions: Option<usize>) -> Result<()> {
        Thought::validate_fields(
            &self.agent_id,
            self.confidence,
            &self.similarity_features,
            feature_dimensions,
        )
    }

    pub(crate) fn into_thought(self, id: ThoughtId, created_at: DateTime<Utc>) -> Thought {
        Thought {
            id,
            agent_id: self.agent_id,
            thought_type: self.thought_type,
            content: self.content,
            confidence: self.confidence,
            similarity_features: self.similarity_features,
            created_at,
            superposed: true,
        }
    }
}
