//! Versioned, self-validating snapshot format.
//!
//! A snapshot is a JSON envelope carrying the format name, version, owning
//! collective, and a blake3 checksum over the body text. The body holds
//! every thought, edge, pattern and awareness record. Loading re-validates
//! each record on its own before anything is handed back to a collective.

use crate::awareness::{AwarenessRecord, ConsciousnessLevel};
use crate::collapse::{Pattern, PatternHistory};
use crate::entanglement::{Edge, EntanglementIndex};
use crate::store::ThoughtStore;
use crate::thought::Thought;
use crate::types::{AgentId, CollectiveError, CollectiveId, Result, ThoughtId};
use chrono::{DateTime, Utc};
use noosphere_config::CollectiveConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const SNAPSHOT_FORMAT: &str = "noosphere.collective";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Opaque serialized collective state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBlob(Vec<u8>);

impl StateBlob {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read the envelope header without validating the body.
    pub fn info(&self) -> Result<SnapshotInfo> {
        let envelope = parse_envelope(self)?;
        Ok(SnapshotInfo {
            collective_id: envelope.collective_id,
            version: envelope.version,
            created_at: envelope.created_at,
        })
    }
}

/// Envelope header of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub collective_id: CollectiveId,
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format: String,
    version: u32,
    collective_id: CollectiveId,
    created_at: DateTime<Utc>,
    checksum: String,
    body: String,
}

/// Full persisted state of one collective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SnapshotBody {
    pub config: CollectiveConfig,
    pub collective_created_at: DateTime<Utc>,
    pub next_seq: u64,
    pub thoughts: Vec<Thought>,
    pub edges: Vec<Edge>,
    pub patterns: Vec<Pattern>,
    pub participation: Vec<(ThoughtId, u64)>,
    pub awareness: Vec<AwarenessRecord>,
}

/// Validated state ready to be swapped into a collective.
#[derive(Debug)]
pub(crate) struct RestoredState {
    pub config: CollectiveConfig,
    pub collective_created_at: DateTime<Utc>,
    pub store: ThoughtStore,
    pub index: EntanglementIndex,
    pub history: PatternHistory,
    pub awareness: Vec<AwarenessRecord>,
}

pub(crate) fn encode(collective_id: &str, body: &SnapshotBody) -> Result<StateBlob> {
    let body_text = serde_json::to_string(body)
        .map_err(|e| CollectiveError::Internal(anyhow::anyhow!("snapshot encode failed: {}", e)))?;
    let envelope = SnapshotEnvelope {
        format: SNAPSHOT_FORMAT.to_string(),
        version: SNAPSHOT_VERSION,
        collective_id: collective_id.to_string(),
        created_at: Utc::now(),
        checksum: blake3::hash(body_text.as_bytes()).to_hex().to_string(),
        body: body_text,
    };
    let bytes = serde_json::to_vec(&envelope)
        .map_err(|e| CollectiveError::Internal(anyhow::anyhow!("snapshot encode failed: {}", e)))?;
    Ok(StateBlob(bytes))
}

fn parse_envelope(blob: &StateBlob) -> Result<SnapshotEnvelope> {
    let envelope: SnapshotEnvelope = serde_json::from_slice(blob.as_bytes())
        .map_err(|e| CollectiveError::corrupt(format!("unreadable envelope: {}", e)))?;
    if envelope.format != SNAPSHOT_FORMAT {
        return Err(CollectiveError::corrupt(format!(
            "unexpected format '{}'",
            envelope.format
        )));
    }
    if envelope.version != SNAPSHOT_VERSION {
        return Err(CollectiveError::corrupt(format!(
            "unsupported version {} (expected {})",
            envelope.version, SNAPSHOT_VERSION
        )));
    }
    Ok(envelope)
}

pub(crate) fn decode(blob: &StateBlob, expected_collective: &str) -> Result<SnapshotBody> {
    let envelope = parse_envelope(blob)?;
    if envelope.collective_id != expected_collective {
        return Err(CollectiveError::corrupt(format!(
            "snapshot belongs to '{}', not '{}'",
            envelope.collective_id, expected_collective
        )));
    }

    let checksum = blake3::hash(envelope.body.as_bytes()).to_hex().to_string();
    if checksum != envelope.checksum {
        return Err(CollectiveError::corrupt("checksum mismatch"));
    }

    serde_json::from_str(&envelope.body)
        .map_err(|e| CollectiveError::corrupt(format!("unreadable body: {}", e)))
}

/// Validate every record and rebuild the in-memory structures.
pub(crate) fn rebuild(body: SnapshotBody) -> Result<RestoredState> {
    body.config
        .validate()
        .map_err(|e| CollectiveError::corrupt(format!("config: {}", e)))?;
    if body.next_seq == 0 {
        return Err(CollectiveError::corrupt("next_seq must be at least 1"));
    }

    let thoughts = validate_thoughts(body.thoughts, body.next_seq, &body.config)?;
    let agents_by_thought: HashMap<ThoughtId, AgentId> = thoughts
        .iter()
        .map(|t| (t.id, t.agent_id.clone()))
        .collect();

    let index = rebuild_index(body.edges, &agents_by_thought, &body.config)?;
    validate_patterns(&body.patterns, &agents_by_thought)?;

    let mut participation = HashMap::new();
    for (id, count) in body.participation {
        if count == 0 || participation.insert(id, count).is_some() {
            return Err(CollectiveError::corrupt(format!(
                "bad participation entry for {}",
                id
            )));
        }
    }

    let awareness = reconcile_awareness(body.awareness, &thoughts, &index, &body.patterns)?;
    let history = PatternHistory::from_parts(body.patterns, participation);
    let store = ThoughtStore::from_parts(thoughts, body.next_seq);

    Ok(RestoredState {
        config: body.config,
        collective_created_at: body.collective_created_at,
        store,
        index,
        history,
        awareness,
    })
}

fn validate_thoughts(
    mut thoughts: Vec<Thought>,
    next_seq: u64,
    config: &CollectiveConfig,
) -> Result<Vec<Thought>> {
    thoughts.sort_by_key(|t| t.id);

    let mut previous: Option<&Thought> = None;
    for thought in &thoughts {
        if thought.id.seq() == 0 || thought.id.seq() >= next_seq {
            return Err(CollectiveError::corrupt(format!(
                "{} outside assigned range",
                thought.id
            )));
        }
        Thought::validate_fields(
            &thought.agent_id,
            thought.confidence,
            &thought.similarity_features,
            config.feature_dimensions,
        )
        .map_err(|e| CollectiveError::corrupt(format!("{}: {}", thought.id, e)))?;

        if let Some(prev) = previous {
            if prev.id == thought.id {
                return Err(CollectiveError::corrupt(format!("duplicate {}", thought.id)));
            }
            if prev.created_at > thought.created_at {
                return Err(CollectiveError::corrupt(format!(
                    "{} predates {}",
                    thought.id, prev.id
                )));
            }
        }
        previous = Some(thought);
    }

    Ok(thoughts)
}

fn rebuild_index(
    edges: Vec<Edge>,
    agents_by_thought: &HashMap<ThoughtId, AgentId>,
    config: &CollectiveConfig,
) -> Result<EntanglementIndex> {
    let mut index = EntanglementIndex::new();
    for edge in edges {
        if edge.a >= edge.b {
            return Err(CollectiveError::corrupt(format!(
                "edge {}-{} is not normalized",
                edge.a, edge.b
            )));
        }
        if !agents_by_thought.contains_key(&edge.a) || !agents_by_thought.contains_key(&edge.b) {
            return Err(CollectiveError::corrupt(format!(
                "edge {}-{} references a missing thought",
                edge.a, edge.b
            )));
        }
        if !edge.weight.is_finite()
            || edge.weight > 1.0
            || edge.weight <= config.entanglement_threshold
        {
            return Err(CollectiveError::corrupt(format!(
                "edge {}-{} has weight {} outside ({}, 1]",
                edge.a, edge.b, edge.weight, config.entanglement_threshold
            )));
        }
        let (a, b) = (edge.a, edge.b);
        if !index.insert(edge) {
            return Err(CollectiveError::corrupt(format!("duplicate edge {}-{}", a, b)));
        }
    }
    Ok(index)
}

fn validate_patterns(
    patterns: &[Pattern],
    agents_by_thought: &HashMap<ThoughtId, AgentId>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for pattern in patterns {
        let fail = |reason: &str| {
            Err(CollectiveError::corrupt(format!(
                "pattern {}: {}",
                pattern.id, reason
            )))
        };

        if !seen.insert(pattern.id.as_str()) {
            return fail("duplicate id");
        }
        let members: HashSet<ThoughtId> = pattern.contributing_thoughts.iter().copied().collect();
        if members.len() < 2 || members.len() != pattern.contributing_thoughts.len() {
            return fail("needs at least two distinct thoughts");
        }
        if pattern.contributing_agents.is_empty() {
            return fail("no contributing agents");
        }
        if !unit_interval(pattern.coherence_score) || !unit_interval(pattern.novelty_score) {
            return fail("score outside [0, 1]");
        }
        if !pattern.impact_potential.is_finite() || pattern.impact_potential < 0.0 {
            return fail("impact potential must be finite and non-negative");
        }
        // Evicted members are historical; live ones must agree on authorship.
        for id in &pattern.contributing_thoughts {
            if let Some(agent) = agents_by_thought.get(id) {
                if !pattern.contributing_agents.contains(agent) {
                    return fail("contributing agents disagree with thoughts");
                }
            }
        }
    }
    Ok(())
}

fn unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// Bring awareness records in line with the restored graph: degrees are
/// recomputed from edges, counters never fall below what the graph shows,
/// and levels never fall below what was stored.
fn reconcile_awareness(
    records: Vec<AwarenessRecord>,
    thoughts: &[Thought],
    index: &EntanglementIndex,
    patterns: &[Pattern],
) -> Result<Vec<AwarenessRecord>> {
    let mut by_agent: BTreeMap<AgentId, AwarenessRecord> = BTreeMap::new();
    for record in records {
        if record.agent_id.trim().is_empty() {
            return Err(CollectiveError::corrupt("awareness record without agent id"));
        }
        let agent_id = record.agent_id.clone();
        if by_agent.insert(agent_id.clone(), record).is_some() {
            return Err(CollectiveError::corrupt(format!(
                "duplicate awareness record for {}",
                agent_id
            )));
        }
    }

    let mut live: HashMap<&str, (u64, u64)> = HashMap::new();
    for thought in thoughts {
        let entry = live.entry(thought.agent_id.as_str()).or_default();
        entry.0 += 1;
        entry.1 += index.degree(thought.id) as u64;
    }

    let mut pattern_counts: HashMap<&str, u64> = HashMap::new();
    for pattern in patterns {
        for agent in &pattern.contributing_agents {
            *pattern_counts.entry(agent.as_str()).or_default() += 1;
        }
    }

    for (agent, _) in live.iter() {
        by_agent
            .entry(agent.to_string())
            .or_insert_with(|| AwarenessRecord::new(*agent));
    }

    for record in by_agent.values_mut() {
        let (live_count, degree) = live.get(record.agent_id.as_str()).copied().unwrap_or((0, 0));
        record.thoughts_contributed = record.thoughts_contributed.max(live_count);
        record.entanglement_degree = degree;
        record.patterns_contributed = record
            .patterns_contributed
            .max(pattern_counts.get(record.agent_id.as_str()).copied().unwrap_or(0));

        let computed = record.computed_level();
        if computed > record.consciousness_level {
            record.consciousness_level = computed;
        }
        if record.thoughts_contributed == 0 && record.consciousness_level > ConsciousnessLevel::Unaware {
            return Err(CollectiveError::corrupt(format!(
                "{} is {:?} without any contributions",
                record.agent_id, record.consciousness_level
            )));
        }
    }

    Ok(by_agent.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thought::{NewThought, ThoughtType};
    use serde_json::json;

    fn sample_body() -> SnapshotBody {
        let mut store = ThoughtStore::new();
        let a = store
            .append(
                NewThought::new("x", ThoughtType::Insight, json!("a"), 0.9, vec![1.0, 0.0]),
                None,
            )
            .unwrap();
        let b = store
            .append(
                NewThought::new("y", ThoughtType::Insight, json!("b"), 0.4, vec![1.0, 0.1]),
                None,
            )
            .unwrap();

        let mut x = AwarenessRecord::new("x");
        x.thoughts_contributed = 1;
        x.entanglement_degree = 1;
        x.consciousness_level = ConsciousnessLevel::Awakening;

        SnapshotBody {
            config: CollectiveConfig::default(),
            collective_created_at: Utc::now(),
            next_seq: store.next_seq(),
            thoughts: vec![(*a).clone(), (*b).clone()],
            edges: vec![Edge::new(a.id, b.id, 0.95)],
            patterns: Vec::new(),
            participation: Vec::new(),
            awareness: vec![x],
        }
    }

    #[test]
    fn test_encode_decode_rebuild() {
        let blob = encode("c1", &sample_body()).unwrap();
        let info = blob.info().unwrap();
        assert_eq!(info.collective_id, "c1");
        assert_eq!(info.version, SNAPSHOT_VERSION);

        let restored = rebuild(decode(&blob, "c1").unwrap()).unwrap();
        assert_eq!(restored.store.len(), 2);
        assert_eq!(restored.index.len(), 1);
        // y had no record; one is synthesized from the graph
        assert_eq!(restored.awareness.len(), 2);
        assert_eq!(restored.awareness[1].agent_id, "y");
        assert_eq!(restored.awareness[1].entanglement_degree, 1);
        assert_eq!(
            restored.awareness[1].consciousness_level,
            ConsciousnessLevel::Awakening
        );
    }

    #[test]
    fn test_tampered_body_fails_checksum() {
        let blob = encode("c1", &sample_body()).unwrap();
        let text = String::from_utf8(blob.into_bytes()).unwrap();
        let tampered = text.replacen(r#"\"y\""#, r#"\"z\""#, 1);
        assert_ne!(tampered, text);
        let err = decode(&StateBlob::from_bytes(tampered.into_bytes()), "c1").unwrap_err();
        assert!(matches!(err, CollectiveError::CorruptSnapshot(_)));
    }

    #[test]
    fn test_wrong_collective_is_rejected() {
        let blob = encode("c1", &sample_body()).unwrap();
        assert!(matches!(
            decode(&blob, "c2"),
            Err(CollectiveError::CorruptSnapshot(_))
        ));
        assert!(StateBlob::from_bytes(b"not json".to_vec()).info().is_err());
    }

    #[test]
    fn test_invalid_records_are_rejected() {
        let mut body = sample_body();
        body.edges[0].weight = 0.5;
        assert!(rebuild(body).is_err());

        let mut body = sample_body();
        body.edges.push(Edge::new(ThoughtId(1), ThoughtId(9), 0.9));
        assert!(rebuild(body).is_err());

        let mut body = sample_body();
        body.thoughts[1].confidence = 2.0;
        assert!(rebuild(body).is_err());

        let mut body = sample_body();
        body.next_seq = 2;
        assert!(rebuild(body).is_err());

        let mut body = sample_body();
        body.awareness.push(AwarenessRecord::new("x"));
        assert!(rebuild(body).is_err());
    }
}
