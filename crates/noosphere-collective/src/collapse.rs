//! Collapse: synthesizing entangled thoughts into ranked patterns.
//!
//! A collapse selects the thoughts relevant to a query, takes the
//! entanglement subgraph they induce, and turns every connected component
//! of two or more thoughts into a scored [`Pattern`]:
//!
//! - **coherence**: mean weight of the edges inside the component
//! - **novelty**: one minus the strongest overlap between the component's
//!   feature centroid and any previously emitted pattern
//! - **impact potential**: `coherence * novelty * (1 + ln(1 + agents))`,
//!   which is unbounded and may exceed 1.0
//!
//! The engine is a pure function of its inputs; recording the results into
//! history is the caller's job.

use crate::entanglement::EntanglementIndex;
use crate::query::{CollapseQuery, RelevancePredicate};
use crate::similarity::{normalized_score, SimilarityComparator};
use crate::store::ThoughtStore;
use crate::types::{AgentId, CollectiveError, PatternId, Result, ThoughtId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// An emergent insight produced by a collapse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,

    pub created_at: DateTime<Utc>,

    /// Query text that triggered the collapse
    pub query: String,

    /// Cluster members in ascending id order
    pub contributing_thoughts: Vec<ThoughtId>,

    /// Distinct authors of the members, sorted
    pub contributing_agents: Vec<AgentId>,

    /// Mean edge weight inside the cluster (0.0 to 1.0)
    pub coherence_score: f64,

    /// Divergence from earlier patterns (0.0 to 1.0)
    pub novelty_score: f64,

    /// Composite ranking score; may exceed 1.0
    pub impact_potential: f64,

    /// Mean feature vector of the members, used for later novelty checks
    #[serde(default)]
    pub centroid: Vec<f32>,

    /// Edges inside the cluster
    #[serde(default)]
    pub edge_count: usize,
}

/// Something a collapse had to leave out, reported alongside the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exclusion {
    /// The relevance predicate failed for this thought
    Candidate { thought_id: ThoughtId, reason: String },
    /// The comparator failed against this earlier pattern
    History { pattern_id: PatternId, reason: String },
}

/// Result of one collapse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollapseOutcome {
    /// Patterns ranked by impact potential, highest first
    pub patterns: Vec<Pattern>,

    pub exclusions: Vec<Exclusion>,

    /// Thoughts that passed the relevance predicate
    pub candidate_count: usize,

    /// Components dropped for falling below the coherence floor
    pub below_coherence: usize,
}

/// Record of past collapses for one collective.
#[derive(Debug, Clone, Default)]
pub struct PatternHistory {
    patterns: Vec<Pattern>,
    participation: HashMap<ThoughtId, u64>,
}

impl PatternHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, patterns: &[Pattern]) {
        for pattern in patterns {
            for id in &pattern.contributing_thoughts {
                *self.participation.entry(*id).or_default() += 1;
            }
            self.patterns.push(pattern.clone());
        }
    }

    /// Every emitted pattern, oldest first.
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// How many emitted patterns included this thought.
    pub fn participation(&self, id: ThoughtId) -> u64 {
        self.participation.get(&id).copied().unwrap_or(0)
    }

    pub fn participation_map(&self) -> &HashMap<ThoughtId, u64> {
        &self.participation
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub(crate) fn from_parts(patterns: Vec<Pattern>, participation: HashMap<ThoughtId, u64>) -> Self {
        Self {
            patterns,
            participation,
        }
    }
}

/// Stateless clustering and scoring over a consistent graph view.
pub struct CollapseEngine<'a> {
    comparator: &'a dyn SimilarityComparator,
    relevance: &'a dyn RelevancePredicate,
}

impl<'a> CollapseEngine<'a> {
    pub fn new(
        comparator: &'a dyn SimilarityComparator,
        relevance: &'a dyn RelevancePredicate,
    ) -> Self {
        Self {
            comparator,
            relevance,
        }
    }

    /// Cluster, score, filter and rank.
    pub fn run(
        &self,
        store: &ThoughtStore,
        index: &EntanglementIndex,
        history: &[Pattern],
        query: &CollapseQuery,
    ) -> Result<CollapseOutcome> {
        self.relevance.validate(query).map_err(|e| match e {
            CollectiveError::InvalidQuery(_) => e,
            other => CollectiveError::invalid_query(other.to_string()),
        })?;

        let mut outcome = CollapseOutcome::default();

        let mut candidates = BTreeSet::new();
        for thought in store.all().filter(|t| t.superposed) {
            match self.relevance.is_relevant(thought, query) {
                Ok(true) => {
                    candidates.insert(thought.id);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Excluding {} from collapse: {}", thought.id, e);
                    outcome.exclusions.push(Exclusion::Candidate {
                        thought_id: thought.id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcome.candidate_count = candidates.len();

        let mut failed_history = HashSet::new();
        let mut patterns = Vec::new();

        for component in connected_components(index, &candidates) {
            if component.len() < 2 {
                continue;
            }

            let weights = component_weights(index, &component);
            let coherence = weights.iter().sum::<f64>() / weights.len().max(1) as f64;
            if coherence < query.min_coherence {
                outcome.below_coherence += 1;
                continue;
            }

            let centroid = centroid(store, &component);
            let novelty = self.novelty(&centroid, history, &mut failed_history, &mut outcome);

            let agents: BTreeSet<AgentId> = component
                .iter()
                .filter_map(|id| store.get(*id).ok())
                .map(|t| t.agent_id.clone())
                .collect();
            let impact = impact_potential(coherence, novelty, agents.len());

            patterns.push(Pattern {
                id: uuid::Uuid::new_v4().to_string(),
                created_at: Utc::now(),
                query: query.text.clone(),
                contributing_thoughts: component,
                contributing_agents: agents.into_iter().collect(),
                coherence_score: coherence,
                novelty_score: novelty,
                impact_potential: impact,
                centroid,
                edge_count: weights.len(),
            });
        }

        // Members are ascending, so the first id is the earliest thought.
        patterns.sort_by(|a, b| {
            b.impact_potential
                .partial_cmp(&a.impact_potential)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.contributing_thoughts[0].cmp(&b.contributing_thoughts[0]))
        });

        debug!(
            "Collapse over {} candidates produced {} patterns ({} below coherence floor)",
            outcome.candidate_count,
            patterns.len(),
            outcome.below_coherence
        );

        outcome.patterns = patterns;
        Ok(outcome)
    }

    fn novelty(
        &self,
        centroid: &[f32],
        history: &[Pattern],
        failed: &mut HashSet<PatternId>,
        outcome: &mut CollapseOutcome,
    ) -> f64 {
        let mut max_overlap: f64 = 0.0;
        for prior in history {
            if failed.contains(&prior.id) {
                continue;
            }
            match normalized_score(self.comparator, centroid, &prior.centroid) {
                Ok(overlap) => max_overlap = max_overlap.max(overlap),
                Err(e) => {
                    warn!("Skipping pattern {} in novelty check: {}", prior.id, e);
                    failed.insert(prior.id.clone());
                    outcome.exclusions.push(Exclusion::History {
                        pattern_id: prior.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        (1.0 - max_overlap).clamp(0.0, 1.0)
    }
}

/// `coherence * novelty * (1 + ln(1 + agents))`.
pub fn impact_potential(coherence: f64, novelty: f64, distinct_agents: usize) -> f64 {
    coherence * novelty * (1.0 + (1.0 + distinct_agents as f64).ln())
}

/// Components of the subgraph induced by `candidates`, each sorted, in
/// order of their smallest member.
fn connected_components(
    index: &EntanglementIndex,
    candidates: &BTreeSet<ThoughtId>,
) -> Vec<Vec<ThoughtId>> {
    let mut visited = HashSet::new();
    let mut components = Vec::new();

    for &start in candidates {
        if !visited.insert(start) {
            continue;
        }

        let mut component = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in index.neighbors(current) {
                if candidates.contains(&next) && visited.insert(next) {
                    component.push(next);
                    queue.push_back(next);
                }
            }
        }

        component.sort();
        components.push(component);
    }

    components
}

fn component_weights(index: &EntanglementIndex, component: &[ThoughtId]) -> Vec<f64> {
    let members: HashSet<ThoughtId> = component.iter().copied().collect();
    let mut weights = Vec::new();
    for &id in component {
        for edge in index.edges_touching(id) {
            if edge.a == id && members.contains(&edge.b) {
                weights.push(edge.weight);
            }
        }
    }
    weights
}

/// Mean feature vector over members sharing the first member's dimension.
fn centroid(store: &ThoughtStore, component: &[ThoughtId]) -> Vec<f32> {
    let vectors: Vec<&Vec<f32>> = component
        .iter()
        .filter_map(|id| store.get(*id).ok())
        .map(|t| &t.similarity_features)
        .collect();

    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let dims = first.len();

    let mut sum = vec![0.0f64; dims];
    let mut count = 0usize;
    for v in vectors.iter().filter(|v| v.len() == dims) {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += *x as f64;
        }
        count += 1;
    }

    sum.into_iter().map(|s| (s / count.max(1) as f64) as f32).collect()
}
