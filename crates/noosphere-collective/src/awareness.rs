//! Per-agent awareness tracking.
//!
//! Each agent climbs a fixed ladder of consciousness levels as it
//! participates and its thoughts become entangled. The level is derived
//! from accumulated counters and only ever moves up.

use crate::types::AgentId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Consciousness level of an agent, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsciousnessLevel {
    /// Never contributed
    Unaware,
    /// Has contributed at least once
    Awakening,
    /// Regular contributor whose thoughts connect to others
    Conscious,
    /// Deeply integrated contributor to emitted patterns
    Superconscious,
}

impl ConsciousnessLevel {
    /// Minimum thoughts contributed for this level.
    pub fn min_participation(&self) -> u64 {
        match self {
            ConsciousnessLevel::Unaware => 0,
            ConsciousnessLevel::Awakening => 1,
            ConsciousnessLevel::Conscious => 5,
            ConsciousnessLevel::Superconscious => 15,
        }
    }

    /// Minimum average entanglements per contributed thought.
    pub fn min_integration(&self) -> f64 {
        match self {
            ConsciousnessLevel::Unaware | ConsciousnessLevel::Awakening => 0.0,
            ConsciousnessLevel::Conscious => 1.0,
            ConsciousnessLevel::Superconscious => 2.0,
        }
    }

    /// The highest level the metrics qualify for. Pure: ignores any level
    /// previously held.
    pub fn for_metrics(participation: u64, integration: f64, patterns_contributed: u64) -> Self {
        let qualifies = |level: ConsciousnessLevel| {
            participation >= level.min_participation() && integration >= level.min_integration()
        };

        if qualifies(ConsciousnessLevel::Superconscious) && patterns_contributed >= 1 {
            ConsciousnessLevel::Superconscious
        } else if qualifies(ConsciousnessLevel::Conscious) {
            ConsciousnessLevel::Conscious
        } else if qualifies(ConsciousnessLevel::Awakening) {
            ConsciousnessLevel::Awakening
        } else {
            ConsciousnessLevel::Unaware
        }
    }
}

/// Awareness metrics for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessRecord {
    pub agent_id: AgentId,

    /// Thoughts ever contributed, including evicted ones
    pub thoughts_contributed: u64,

    /// Edge endpoints on this agent's live thoughts
    pub entanglement_degree: u64,

    /// Emitted patterns this agent's thoughts took part in
    #[serde(default)]
    pub patterns_contributed: u64,

    pub consciousness_level: ConsciousnessLevel,

    pub first_seen: DateTime<Utc>,

    pub last_active: DateTime<Utc>,
}

impl AwarenessRecord {
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            thoughts_contributed: 0,
            entanglement_degree: 0,
            patterns_contributed: 0,
            consciousness_level: ConsciousnessLevel::Unaware,
            first_seen: now,
            last_active: now,
        }
    }

    /// Average entanglement depth per contributed thought.
    pub fn integration(&self) -> f64 {
        self.entanglement_degree as f64 / self.thoughts_contributed.max(1) as f64
    }

    /// Level the current counters qualify for.
    pub fn computed_level(&self) -> ConsciousnessLevel {
        ConsciousnessLevel::for_metrics(
            self.thoughts_contributed,
            self.integration(),
            self.patterns_contributed,
        )
    }

    /// Raise the level if the counters now qualify for a higher one.
    fn promote(&mut self) -> Option<(ConsciousnessLevel, ConsciousnessLevel)> {
        let computed = self.computed_level();
        if computed > self.consciousness_level {
            let previous = self.consciousness_level;
            self.consciousness_level = computed;
            Some((previous, computed))
        } else {
            None
        }
    }
}

/// Counter changes to apply to one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AwarenessDelta {
    pub contributions: u64,
    pub entanglements_gained: u64,
    pub entanglements_lost: u64,
    pub patterns: u64,
}

impl AwarenessDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A level transition, reported to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessChange {
    pub agent_id: AgentId,
    pub previous: ConsciousnessLevel,
    pub current: ConsciousnessLevel,
    pub record: AwarenessRecord,
}

/// Tracks awareness for every agent seen by a collective. Updates lock only
/// the affected agent's entry.
#[derive(Debug, Default)]
pub struct AwarenessTracker {
    records: DashMap<AgentId, AwarenessRecord>,
}

impl AwarenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply counter changes to an agent and promote it if it now qualifies.
    pub fn apply(&self, agent_id: &str, delta: AwarenessDelta) -> Option<AwarenessChange> {
        if delta.is_empty() {
            return None;
        }

        let mut entry = self
            .records
            .entry(agent_id.to_string())
            .or_insert_with(|| AwarenessRecord::new(agent_id));
        let record = entry.value_mut();

        record.thoughts_contributed += delta.contributions;
        record.entanglement_degree += delta.entanglements_gained;
        record.entanglement_degree = record
            .entanglement_degree
            .saturating_sub(delta.entanglements_lost);
        record.patterns_contributed += delta.patterns;
        if delta.contributions > 0 || delta.patterns > 0 {
            record.last_active = Utc::now();
        }

        record.promote().map(|(previous, current)| AwarenessChange {
            agent_id: agent_id.to_string(),
            previous,
            current,
            record: record.clone(),
        })
    }

    /// The agent's record, or a fresh unaware record for an unseen agent.
    pub fn get(&self, agent_id: &str) -> AwarenessRecord {
        self.records
            .get(agent_id)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| AwarenessRecord::new(agent_id))
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.records.contains_key(agent_id)
    }

    /// Every record, sorted by agent id.
    pub fn all(&self) -> Vec<AwarenessRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Swap in a restored set of records. Each agent's entry is overwritten
    /// in place before stale agents are dropped, so a concurrent reader sees
    /// either the old or the new record for an agent, never a reset one.
    pub(crate) fn replace_all(&self, records: Vec<AwarenessRecord>) {
        let keep: HashSet<AgentId> = records.iter().map(|r| r.agent_id.clone()).collect();
        for record in records {
            self.records.insert(record.agent_id.clone(), record);
        }
        self.records.retain(|agent, _| keep.contains(agent));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribute(tracker: &AwarenessTracker, agent: &str, gained: u64) -> Option<AwarenessChange> {
        tracker.apply(
            agent,
            AwarenessDelta {
                contributions: 1,
                entanglements_gained: gained,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(ConsciousnessLevel::for_metrics(0, 0.0, 0), ConsciousnessLevel::Unaware);
        assert_eq!(ConsciousnessLevel::for_metrics(1, 0.0, 0), ConsciousnessLevel::Awakening);
        assert_eq!(ConsciousnessLevel::for_metrics(5, 0.99, 0), ConsciousnessLevel::Awakening);
        assert_eq!(ConsciousnessLevel::for_metrics(5, 1.0, 0), ConsciousnessLevel::Conscious);
        assert_eq!(ConsciousnessLevel::for_metrics(15, 2.0, 0), ConsciousnessLevel::Conscious);
        assert_eq!(
            ConsciousnessLevel::for_metrics(15, 2.0, 1),
            ConsciousnessLevel::Superconscious
        );
    }

    #[test]
    fn test_first_contribution_awakens() {
        let tracker = AwarenessTracker::new();
        assert_eq!(tracker.get("x").consciousness_level, ConsciousnessLevel::Unaware);
        assert!(!tracker.contains("x"));

        let change = contribute(&tracker, "x", 0).unwrap();
        assert_eq!(change.previous, ConsciousnessLevel::Unaware);
        assert_eq!(change.current, ConsciousnessLevel::Awakening);
        assert!(contribute(&tracker, "x", 0).is_none());
    }

    #[test]
    fn test_level_never_decreases() {
        let tracker = AwarenessTracker::new();
        for _ in 0..5 {
            contribute(&tracker, "x", 1);
        }
        assert_eq!(tracker.get("x").consciousness_level, ConsciousnessLevel::Conscious);

        tracker.apply(
            "x",
            AwarenessDelta {
                entanglements_lost: 5,
                ..Default::default()
            },
        );
        let record = tracker.get("x");
        assert_eq!(record.entanglement_degree, 0);
        assert_eq!(record.computed_level(), ConsciousnessLevel::Awakening);
        assert_eq!(record.consciousness_level, ConsciousnessLevel::Conscious);
    }

    #[test]
    fn test_pattern_contribution_unlocks_superconscious() {
        let tracker = AwarenessTracker::new();
        for _ in 0..15 {
            contribute(&tracker, "x", 2);
        }
        assert_eq!(tracker.get("x").consciousness_level, ConsciousnessLevel::Conscious);

        let change = tracker
            .apply(
                "x",
                AwarenessDelta {
                    patterns: 1,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(change.current, ConsciousnessLevel::Superconscious);
    }

    #[test]
    fn test_all_is_sorted() {
        let tracker = AwarenessTracker::new();
        contribute(&tracker, "b", 0);
        contribute(&tracker, "a", 0);
        let ids: Vec<_> = tracker.all().into_iter().map(|r| r.agent_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_replace_all_overwrites_and_drops_stale_agents() {
        let tracker = AwarenessTracker::new();
        contribute(&tracker, "kept", 0);
        contribute(&tracker, "stale", 0);

        let mut restored = AwarenessRecord::new("kept");
        restored.thoughts_contributed = 7;
        restored.consciousness_level = ConsciousnessLevel::Awakening;
        tracker.replace_all(vec![restored, AwarenessRecord::new("fresh")]);

        assert_eq!(tracker.get("kept").thoughts_contributed, 7);
        assert!(tracker.contains("fresh"));
        assert!(!tracker.contains("stale"));
        assert_eq!(tracker.len(), 2);
    }
}
