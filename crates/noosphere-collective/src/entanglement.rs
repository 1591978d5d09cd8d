//! Weighted undirected graph over stored thoughts.
//!
//! Edges are created once, when a new thought is compared against the
//! recent window, and are never re-scored. The only way an edge disappears
//! is eviction of one of its endpoints.

use crate::similarity::{normalized_score, SimilarityComparator};
use crate::thought::Thought;
use crate::types::ThoughtId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// An entanglement between two distinct thoughts. Endpoints are stored in
/// ascending order so `(a, b)` and `(b, a)` are the same edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub a: ThoughtId,
    pub b: ThoughtId,

    /// Similarity score at creation, in (0, 1]
    pub weight: f64,

    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(x: ThoughtId, y: ThoughtId, weight: f64) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self {
            a,
            b,
            weight,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (ThoughtId, ThoughtId) {
        (self.a, self.b)
    }

    pub fn touches(&self, id: ThoughtId) -> bool {
        self.a == id || self.b == id
    }

    /// The endpoint opposite `id`, if `id` is an endpoint.
    pub fn other(&self, id: ThoughtId) -> Option<ThoughtId> {
        if self.a == id {
            Some(self.b)
        } else if self.b == id {
            Some(self.a)
        } else {
            None
        }
    }
}

/// Result of comparing a new thought against its comparison window.
#[derive(Debug, Default)]
pub struct WindowScan {
    /// Peers that scored strictly above the threshold, with their score
    pub entangled: Vec<(ThoughtId, f64)>,

    /// Peers the comparator could not score
    pub failures: Vec<(ThoughtId, String)>,

    /// How many peers were compared
    pub compared: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EntanglementIndex {
    edges: HashMap<(ThoughtId, ThoughtId), Edge>,
    adjacency: HashMap<ThoughtId, BTreeSet<ThoughtId>>,
}

impl EntanglementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score `candidate` against every thought in `window`. Pure; touches no
    /// index state, so callers run it outside any lock.
    pub fn scan(
        comparator: &dyn SimilarityComparator,
        threshold: f64,
        candidate: &Thought,
        window: &[Arc<Thought>],
    ) -> WindowScan {
        let mut scan = WindowScan::default();

        for peer in window {
            if peer.id == candidate.id {
                continue;
            }
            scan.compared += 1;
            match normalized_score(
                comparator,
                &candidate.similarity_features,
                &peer.similarity_features,
            ) {
                Ok(score) if score > threshold => scan.entangled.push((peer.id, score)),
                Ok(_) => {}
                Err(e) => scan.failures.push((peer.id, e.to_string())),
            }
        }

        scan
    }

    /// Insert an edge. Returns false for self-loops and duplicates.
    pub fn insert(&mut self, edge: Edge) -> bool {
        if edge.a == edge.b || self.edges.contains_key(&edge.key()) {
            return false;
        }
        self.adjacency.entry(edge.a).or_default().insert(edge.b);
        self.adjacency.entry(edge.b).or_default().insert(edge.a);
        self.edges.insert(edge.key(), edge);
        true
    }

    pub fn edges_touching(&self, id: ThoughtId) -> Vec<Edge> {
        self.neighbors(id)
            .into_iter()
            .filter_map(|other| self.edge_between(id, other).cloned())
            .collect()
    }

    pub fn neighbors(&self, id: ThoughtId) -> BTreeSet<ThoughtId> {
        self.adjacency.get(&id).cloned().unwrap_or_default()
    }

    pub fn degree(&self, id: ThoughtId) -> usize {
        self.adjacency.get(&id).map(|n| n.len()).unwrap_or(0)
    }

    pub fn edge_between(&self, x: ThoughtId, y: ThoughtId) -> Option<&Edge> {
        let key = if x <= y { (x, y) } else { (y, x) };
        self.edges.get(&key)
    }

    /// All edges, in no particular order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Drop every edge incident to `id`, returning them.
    pub fn remove_thought(&mut self, id: ThoughtId) -> Vec<Edge> {
        let Some(neighbors) = self.adjacency.remove(&id) else {
            return Vec::new();
        };

        let mut removed = Vec::with_capacity(neighbors.len());
        for other in neighbors {
            if let Some(set) = self.adjacency.get_mut(&other) {
                set.remove(&id);
                if set.is_empty() {
                    self.adjacency.remove(&other);
                }
            }
            let key = if id <= other { (id, other) } else { (other, id) };
            if let Some(edge) = self.edges.remove(&key) {
                removed.push(edge);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thought::{NewThought, ThoughtType};
    use crate::similarity::CosineSimilarity;
    use crate::types::Result;
    use serde_json::json;

    fn thought(id: u64, features: Vec<f32>) -> Arc<Thought> {
        Arc::new(
            NewThought::new("agent", ThoughtType::Observation, json!(null), 0.5, features)
                .into_thought(ThoughtId(id), Utc::now()),
        )
    }

    #[test]
    fn test_edges_are_undirected() {
        let mut index = EntanglementIndex::new();
        assert!(index.insert(Edge::new(ThoughtId(2), ThoughtId(1), 0.8)));
        assert!(!index.insert(Edge::new(ThoughtId(1), ThoughtId(2), 0.9)));
        assert!(!index.insert(Edge::new(ThoughtId(3), ThoughtId(3), 0.9)));

        assert!(index.neighbors(ThoughtId(1)).contains(&ThoughtId(2)));
        assert!(index.neighbors(ThoughtId(2)).contains(&ThoughtId(1)));
        assert_eq!(index.degree(ThoughtId(1)), 1);
        assert_eq!(index.edge_between(ThoughtId(2), ThoughtId(1)).unwrap().weight, 0.8);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_scan_uses_strict_threshold() {
        let exact = |a: &[f32], b: &[f32]| -> Result<f64> { Ok((a[0] * b[0]) as f64) };
        let candidate = thought(10, vec![1.0]);
        let window = vec![thought(1, vec![0.5]), thought(2, vec![0.75]), thought(3, vec![0.25])];

        let scan = EntanglementIndex::scan(&exact, 0.5, &candidate, &window);
        let ids: Vec<u64> = scan.entangled.iter().map(|(id, _)| id.seq()).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(scan.compared, 3);
    }

    #[test]
    fn test_scan_reports_comparator_failures() {
        let candidate = thought(10, vec![1.0, 0.0]);
        let window = vec![thought(1, vec![1.0]), thought(2, vec![1.0, 0.0])];

        let scan = EntanglementIndex::scan(&CosineSimilarity, 0.6, &candidate, &window);
        assert_eq!(scan.entangled.len(), 1);
        assert_eq!(scan.failures.len(), 1);
        assert_eq!(scan.failures[0].0, ThoughtId(1));
    }

    #[test]
    fn test_remove_thought_drops_incident_edges() {
        let mut index = EntanglementIndex::new();
        index.insert(Edge::new(ThoughtId(1), ThoughtId(2), 0.7));
        index.insert(Edge::new(ThoughtId(1), ThoughtId(3), 0.7));
        index.insert(Edge::new(ThoughtId(2), ThoughtId(3), 0.7));

        let removed = index.remove_thought(ThoughtId(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(index.len(), 1);
        assert_eq!(index.degree(ThoughtId(1)), 0);
        assert!(!index.neighbors(ThoughtId(2)).contains(&ThoughtId(1)));
        assert_eq!(index.edges_touching(ThoughtId(3)).len(), 1);
    }
}
