//! The collective façade.
//!
//! A [`Collective`] binds the thought store, entanglement index, pattern
//! history and awareness tracker of one named instance and owns their
//! concurrency control:
//!
//! - The graph (store, index and config) lives behind an `Arc` that writers
//!   update copy-on-write. Collapse and snapshot clone the `Arc` and work on
//!   that view with no graph lock held.
//! - A contribution scans its comparison window outside the write lock,
//!   then appends the thought and its edges in one write section, so a
//!   reader sees both or neither.
//! - Awareness records lock per agent. A contribution applies its awareness
//!   changes before releasing the graph write lock, so any reader holding
//!   the graph read lock sees counters that match the graph.
//! - Collapses run one at a time so each sees the previous one's history.
//! - Restore takes the lifecycle lock exclusively; everything else shares it.

use crate::awareness::{
    AwarenessChange, AwarenessDelta, AwarenessRecord, AwarenessTracker, ConsciousnessLevel,
};
use crate::collapse::{CollapseEngine, CollapseOutcome, Pattern, PatternHistory};
use crate::entanglement::{Edge, EntanglementIndex};
use crate::events::CollectiveObserver;
use crate::query::{CollapseQuery, RelevancePredicate, ScopeRelevance};
use crate::similarity::{CosineSimilarity, SimilarityComparator};
use crate::snapshot::{self, SnapshotBody, StateBlob};
use crate::store::ThoughtStore;
use crate::thought::{NewThought, Thought};
use crate::types::{AgentId, CollectiveError, CollectiveId, Result, ThoughtId};
use chrono::{DateTime, Utc};
use noosphere_config::{CollectiveConfig, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Similarity and relevance strategies injected into a collective.
#[derive(Clone)]
pub struct Strategies {
    pub comparator: Arc<dyn SimilarityComparator>,
    pub relevance: Arc<dyn RelevancePredicate>,
}

impl Default for Strategies {
    fn default() -> Self {
        Self {
            comparator: Arc::new(CosineSimilarity),
            relevance: Arc::new(ScopeRelevance),
        }
    }
}

impl Strategies {
    pub fn with_comparator(mut self, comparator: Arc<dyn SimilarityComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_relevance(mut self, relevance: Arc<dyn RelevancePredicate>) -> Self {
        self.relevance = relevance;
        self
    }
}

impl std::fmt::Debug for Strategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategies").finish_non_exhaustive()
    }
}

/// Point-in-time counters for a collective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectiveStats {
    pub collective_id: CollectiveId,
    pub created_at: DateTime<Utc>,
    pub thoughts: usize,
    pub edges: usize,
    pub patterns: usize,
    pub agents: usize,
    pub next_seq: u64,
    pub agents_by_level: BTreeMap<ConsciousnessLevel, usize>,
}

#[derive(Debug, Clone)]
struct GraphState {
    config: CollectiveConfig,
    created_at: DateTime<Utc>,
    store: ThoughtStore,
    index: EntanglementIndex,
}

/// One named collective instance.
pub struct Collective {
    id: CollectiveId,
    strategies: Strategies,
    lifecycle: RwLock<()>,
    state: RwLock<Arc<GraphState>>,
    history: RwLock<PatternHistory>,
    collapse_gate: Mutex<()>,
    awareness: AwarenessTracker,
    observers: RwLock<Vec<Arc<dyn CollectiveObserver>>>,
}

impl std::fmt::Debug for Collective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collective")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Collective {
    pub fn new(
        id: impl Into<CollectiveId>,
        config: CollectiveConfig,
        strategies: Strategies,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ConfigError::Invalid("collective id must not be empty".to_string()).into());
        }
        config.validate()?;

        Ok(Self {
            id,
            strategies,
            lifecycle: RwLock::new(()),
            state: RwLock::new(Arc::new(GraphState {
                config,
                created_at: Utc::now(),
                store: ThoughtStore::new(),
                index: EntanglementIndex::new(),
            })),
            history: RwLock::new(PatternHistory::new()),
            collapse_gate: Mutex::new(()),
            awareness: AwarenessTracker::new(),
            observers: RwLock::new(Vec::new()),
        })
    }

    /// A collective with cosine similarity and scope-based relevance.
    pub fn with_defaults(id: impl Into<CollectiveId>, config: CollectiveConfig) -> Result<Self> {
        Self::new(id, config, Strategies::default())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn created_at(&self) -> DateTime<Utc> {
        self.state.read().await.created_at
    }

    pub async fn config(&self) -> CollectiveConfig {
        self.state.read().await.config.clone()
    }

    /// Register a change observer. Observers are called after the change is
    /// visible and outside every engine lock.
    pub async fn subscribe(&self, observer: Arc<dyn CollectiveObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Validate and store a thought, entangle it with its comparison window
    /// and update awareness.
    pub async fn contribute(&self, draft: NewThought) -> Result<ThoughtId> {
        let _lifecycle = self.lifecycle.read().await;

        let (config, window) = {
            let state = self.state.read().await;
            draft.validate(state.config.feature_dimensions)?;
            let window: Vec<Arc<Thought>> = state
                .store
                .recent(state.config.window_size)
                .cloned()
                .collect();
            (state.config.clone(), window)
        };

        // The provisional id is never assigned, so no window member is skipped.
        let provisional = draft.clone().into_thought(ThoughtId(0), Utc::now());
        let scan = EntanglementIndex::scan(
            self.strategies.comparator.as_ref(),
            config.entanglement_threshold,
            &provisional,
            &window,
        );
        for (peer, reason) in &scan.failures {
            warn!(
                "Skipping comparison with {} in collective {}: {}",
                peer, self.id, reason
            );
        }

        let mut deltas: BTreeMap<AgentId, AwarenessDelta> = BTreeMap::new();
        let (thought, edges, evicted, changes) = {
            let mut guard = self.state.write().await;
            if let Some(max) = guard.config.max_thoughts {
                if guard.store.len() >= max && !guard.config.evict_oldest {
                    return Err(CollectiveError::CapacityExceeded { max });
                }
            }
            let state = Arc::make_mut(&mut *guard);

            let mut evicted = Vec::new();
            if let Some(max) = state.config.max_thoughts {
                while state.store.len() >= max {
                    let Some(oldest) = state.store.oldest() else {
                        break;
                    };
                    for edge in state.index.remove_thought(oldest) {
                        for endpoint in [edge.a, edge.b] {
                            if let Ok(t) = state.store.get(endpoint) {
                                deltas.entry(t.agent_id.clone()).or_default().entanglements_lost += 1;
                            }
                        }
                    }
                    if let Some(removed) = state.store.evict(oldest) {
                        evicted.push(removed.id);
                    }
                }
            }

            let thought = state.store.append(draft, state.config.feature_dimensions)?;

            let mut edges = Vec::with_capacity(scan.entangled.len());
            for (peer, weight) in &scan.entangled {
                let Ok(peer_agent) = state.store.get(*peer).map(|t| t.agent_id.clone()) else {
                    continue;
                };
                let edge = Edge::new(thought.id, *peer, *weight);
                if state.index.insert(edge.clone()) {
                    deltas.entry(peer_agent).or_default().entanglements_gained += 1;
                    edges.push(edge);
                }
            }

            let own = deltas.entry(thought.agent_id.clone()).or_default();
            own.contributions += 1;
            own.entanglements_gained += edges.len() as u64;

            let changes: Vec<AwarenessChange> = deltas
                .into_iter()
                .filter_map(|(agent, delta)| self.awareness.apply(&agent, delta))
                .collect();

            (thought, edges, evicted, changes)
        };

        if !evicted.is_empty() {
            debug!(
                "Evicted {} thought(s) from collective {} to stay within capacity",
                evicted.len(),
                self.id
            );
        }
        debug!(
            "Agent {} contributed {} to collective {} with {} entanglement(s) over a window of {}",
            thought.agent_id,
            thought.id,
            self.id,
            edges.len(),
            scan.compared
        );

        let observers = self.observers.read().await.clone();
        for observer in &observers {
            observer.on_thought_added(&self.id, &thought, &edges);
            for change in &changes {
                observer.on_awareness_changed(&self.id, change);
            }
        }

        Ok(thought.id)
    }

    pub async fn get(&self, id: ThoughtId) -> Result<Arc<Thought>> {
        self.state.read().await.store.get(id).cloned()
    }

    /// The `n` most recent live thoughts, newest first.
    pub async fn recent(&self, n: usize) -> Vec<Arc<Thought>> {
        self.state.read().await.store.recent(n).cloned().collect()
    }

    pub async fn edges_touching(&self, id: ThoughtId) -> Vec<Edge> {
        self.state.read().await.index.edges_touching(id)
    }

    pub async fn neighbors(&self, id: ThoughtId) -> BTreeSet<ThoughtId> {
        self.state.read().await.index.neighbors(id)
    }

    pub async fn degree(&self, id: ThoughtId) -> usize {
        self.state.read().await.index.degree(id)
    }

    /// Take a thought out of superposition so later collapses skip it.
    /// Returns whether the thought was still superposed.
    pub async fn archive(&self, id: ThoughtId) -> Result<bool> {
        let _lifecycle = self.lifecycle.read().await;
        let mut guard = self.state.write().await;
        if !guard.store.get(id)?.superposed {
            return Ok(false);
        }
        let changed = Arc::make_mut(&mut *guard).store.archive(id)?;
        debug!("Archived {} in collective {}", id, self.id);
        Ok(changed)
    }

    /// Synthesize the superposed thoughts relevant to `query` into ranked
    /// patterns and record them in the history.
    pub async fn collapse(&self, query: &str, min_coherence: f64) -> Result<CollapseOutcome> {
        let query = CollapseQuery::new(query, min_coherence)?;

        let _lifecycle = self.lifecycle.read().await;
        let _gate = self.collapse_gate.lock().await;
        let graph = self.state.read().await.clone();

        let outcome = {
            let history = self.history.read().await;
            CollapseEngine::new(
                self.strategies.comparator.as_ref(),
                self.strategies.relevance.as_ref(),
            )
            .run(&graph.store, &graph.index, history.patterns(), &query)?
        };
        self.history.write().await.record(&outcome.patterns);

        let mut per_agent: BTreeMap<&str, u64> = BTreeMap::new();
        for pattern in &outcome.patterns {
            for agent in &pattern.contributing_agents {
                *per_agent.entry(agent.as_str()).or_default() += 1;
            }
        }
        let changes: Vec<AwarenessChange> = per_agent
            .into_iter()
            .filter_map(|(agent, patterns)| {
                self.awareness.apply(
                    agent,
                    AwarenessDelta {
                        patterns,
                        ..Default::default()
                    },
                )
            })
            .collect();

        info!(
            "Collapse '{}' on collective {} emitted {} pattern(s) from {} candidate(s), {} exclusion(s)",
            query.text,
            self.id,
            outcome.patterns.len(),
            outcome.candidate_count,
            outcome.exclusions.len()
        );

        let observers = self.observers.read().await.clone();
        for observer in &observers {
            for pattern in &outcome.patterns {
                observer.on_pattern_emitted(&self.id, pattern);
            }
            for change in &changes {
                observer.on_awareness_changed(&self.id, change);
            }
        }

        Ok(outcome)
    }

    /// Collapse using the configured coherence floor.
    pub async fn collapse_default(&self, query: &str) -> Result<CollapseOutcome> {
        let min_coherence = self.state.read().await.config.min_coherence;
        self.collapse(query, min_coherence).await
    }

    /// The agent's current record. Lock-free, so a read racing a restore may
    /// see the agent's record from before or after it.
    pub fn awareness(&self, agent_id: &str) -> AwarenessRecord {
        self.awareness.get(agent_id)
    }

    /// Every known agent's record, sorted by agent id.
    pub fn agents(&self) -> Vec<AwarenessRecord> {
        self.awareness.all()
    }

    /// Every emitted pattern, oldest first.
    pub async fn patterns(&self) -> Vec<Pattern> {
        self.history.read().await.patterns().to_vec()
    }

    /// How many emitted patterns included this thought.
    pub async fn collapse_participation(&self, id: ThoughtId) -> u64 {
        self.history.read().await.participation(id)
    }

    pub async fn stats(&self) -> CollectiveStats {
        let (created_at, thoughts, edges, next_seq, records) = {
            let graph = self.state.read().await;
            (
                graph.created_at,
                graph.store.len(),
                graph.index.len(),
                graph.store.next_seq(),
                self.awareness.all(),
            )
        };
        let patterns = self.history.read().await.len();

        let mut agents_by_level = BTreeMap::new();
        for record in &records {
            *agents_by_level.entry(record.consciousness_level).or_default() += 1;
        }

        CollectiveStats {
            collective_id: self.id.clone(),
            created_at,
            thoughts,
            edges,
            patterns,
            agents: records.len(),
            next_seq,
            agents_by_level,
        }
    }

    /// Serialize the full state. Runs alongside contributions.
    ///
    /// The graph, pattern history and awareness records are captured in one
    /// read: no collapse runs meanwhile and no contribution lands between
    /// reading the graph and reading the awareness counters.
    pub async fn snapshot(&self) -> Result<StateBlob> {
        let _lifecycle = self.lifecycle.read().await;
        let _gate = self.collapse_gate.lock().await;
        let (graph, patterns, mut participation, awareness) = {
            let state = self.state.read().await;
            let history = self.history.read().await;
            let participation: Vec<(ThoughtId, u64)> = history
                .participation_map()
                .iter()
                .map(|(id, count)| (*id, *count))
                .collect();
            (
                Arc::clone(&state),
                history.patterns().to_vec(),
                participation,
                self.awareness.all(),
            )
        };
        participation.sort_unstable();

        let mut edges: Vec<Edge> = graph.index.edges().cloned().collect();
        edges.sort_by_key(|e| e.key());

        let body = SnapshotBody {
            config: graph.config.clone(),
            collective_created_at: graph.created_at,
            next_seq: graph.store.next_seq(),
            thoughts: graph.store.all().map(|t| (**t).clone()).collect(),
            edges,
            patterns,
            participation,
            awareness,
        };

        let blob = snapshot::encode(&self.id, &body)?;
        debug!(
            "Snapshot of collective {}: {} thoughts, {} edges, {} bytes",
            self.id,
            body.thoughts.len(),
            body.edges.len(),
            blob.len()
        );
        Ok(blob)
    }

    /// Replace the full state with a snapshot's. On error the current state
    /// is left untouched.
    ///
    /// Graph, history and awareness are swapped while the graph write lock is
    /// held, so locking readers see all of the old state or all of the new.
    /// [`Collective::awareness`] and [`Collective::agents`] do not lock and
    /// may observe the swap part way through.
    pub async fn restore(&self, blob: &StateBlob) -> Result<()> {
        let restored = snapshot::decode(blob, &self.id).and_then(snapshot::rebuild);
        let restored = match restored {
            Ok(restored) => restored,
            Err(e) => {
                warn!("Rejected snapshot for collective {}: {}", self.id, e);
                return Err(e);
            }
        };

        let _lifecycle = self.lifecycle.write().await;
        let thoughts = restored.store.len();
        let patterns = restored.history.len();

        let mut state = self.state.write().await;
        let mut history = self.history.write().await;
        *state = Arc::new(GraphState {
            config: restored.config,
            created_at: restored.collective_created_at,
            store: restored.store,
            index: restored.index,
        });
        *history = restored.history;
        self.awareness.replace_all(restored.awareness);
        drop(history);
        drop(state);

        info!(
            "Restored collective {} with {} thoughts and {} patterns",
            self.id, thoughts, patterns
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thought::ThoughtType;
    use serde_json::json;

    fn draft(agent: &str, features: Vec<f32>) -> NewThought {
        NewThought::new(agent, ThoughtType::Observation, json!("note"), 0.7, features)
    }

    #[tokio::test]
    async fn test_contribute_links_similar_thoughts() {
        let collective = Collective::with_defaults("c", CollectiveConfig::default()).unwrap();
        let a = collective.contribute(draft("x", vec![1.0, 0.0])).await.unwrap();
        let b = collective.contribute(draft("y", vec![1.0, 0.1])).await.unwrap();
        let c = collective.contribute(draft("y", vec![0.0, 1.0])).await.unwrap();

        assert!(a < b && b < c);
        assert_eq!(collective.neighbors(a).await, BTreeSet::from([b]));
        assert_eq!(collective.degree(c).await, 0);
        assert_eq!(collective.awareness("x").entanglement_degree, 1);
        assert_eq!(collective.awareness("y").entanglement_degree, 1);
        assert_eq!(collective.awareness("y").thoughts_contributed, 2);
    }

    #[tokio::test]
    async fn test_new_rejects_bad_config() {
        let config = CollectiveConfig::default().with_threshold(1.5);
        assert!(matches!(
            Collective::with_defaults("c", config),
            Err(CollectiveError::Config(_))
        ));
        assert!(Collective::with_defaults(" ", CollectiveConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_capacity_exceeded_without_eviction() {
        let config = CollectiveConfig::default().with_max_thoughts(2, false);
        let collective = Collective::with_defaults("c", config).unwrap();
        collective.contribute(draft("x", vec![1.0])).await.unwrap();
        collective.contribute(draft("x", vec![1.0])).await.unwrap();

        let err = collective.contribute(draft("x", vec![1.0])).await.unwrap_err();
        assert!(matches!(err, CollectiveError::CapacityExceeded { max: 2 }));
        assert_eq!(collective.stats().await.thoughts, 2);
    }

    #[tokio::test]
    async fn test_archive_removes_from_collapse() {
        let collective = Collective::with_defaults("c", CollectiveConfig::default()).unwrap();
        let a = collective.contribute(draft("x", vec![1.0, 0.0])).await.unwrap();
        collective.contribute(draft("y", vec![1.0, 0.0])).await.unwrap();

        assert!(collective.archive(a).await.unwrap());
        assert!(!collective.archive(a).await.unwrap());
        assert!(!collective.get(a).await.unwrap().superposed);
        assert!(matches!(
            collective.archive(ThoughtId(99)).await,
            Err(CollectiveError::ThoughtNotFound(_))
        ));

        let outcome = collective.collapse("", 0.5).await.unwrap();
        assert!(outcome.patterns.is_empty());
        assert_eq!(outcome.candidate_count, 1);
    }

    #[tokio::test]
    async fn test_stats_counts_levels() {
        let collective = Collective::with_defaults("c", CollectiveConfig::default()).unwrap();
        collective.contribute(draft("x", vec![1.0])).await.unwrap();
        collective.contribute(draft("y", vec![1.0])).await.unwrap();

        let stats = collective.stats().await;
        assert_eq!(stats.thoughts, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.agents, 2);
        assert_eq!(stats.next_seq, 3);
        assert_eq!(stats.agents_by_level.get(&ConsciousnessLevel::Awakening), Some(&2));
    }
}
