//! Append-only thought storage for one collective.
//!
//! Thoughts are addressed by their sequence id and held behind `Arc` so
//! comparison windows and collapse snapshots can share them without copying
//! payloads.

use crate::thought::{NewThought, Thought};
use crate::types::{AgentId, CollectiveError, Result, ThoughtId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ThoughtStore {
    /// Live thoughts ordered by sequence
    thoughts: BTreeMap<ThoughtId, Arc<Thought>>,

    /// Live thought count per agent
    per_agent: HashMap<AgentId, usize>,

    /// Next sequence number to assign
    next_seq: u64,

    /// Timestamp of the most recent append, to keep `created_at` monotonic
    last_created_at: Option<DateTime<Utc>>,
}

impl Default for ThoughtStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThoughtStore {
    pub fn new() -> Self {
        Self {
            thoughts: BTreeMap::new(),
            per_agent: HashMap::new(),
            next_seq: 1,
            last_created_at: None,
        }
    }

    /// Validate and append a draft, assigning its id and timestamp.
    pub fn append(
        &mut self,
        draft: NewThought,
        feature_dimensions: Option<usize>,
    ) -> Result<Arc<Thought>> {
        draft.validate(feature_dimensions)?;

        let id = ThoughtId(self.next_seq);
        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };

        let thought = Arc::new(draft.into_thought(id, created_at));
        self.next_seq += 1;
        self.last_created_at = Some(created_at);
        *self.per_agent.entry(thought.agent_id.clone()).or_default() += 1;
        self.thoughts.insert(id, thought.clone());

        Ok(thought)
    }

    pub fn get(&self, id: ThoughtId) -> Result<&Arc<Thought>> {
        self.thoughts
            .get(&id)
            .ok_or(CollectiveError::ThoughtNotFound(id))
    }

    pub fn contains(&self, id: ThoughtId) -> bool {
        self.thoughts.contains_key(&id)
    }

    /// The `window_size` most recent thoughts, newest first.
    pub fn recent(&self, window_size: usize) -> impl Iterator<Item = &Arc<Thought>> {
        self.thoughts.values().rev().take(window_size)
    }

    /// Every live thought, oldest first.
    pub fn all(&self) -> impl Iterator<Item = &Arc<Thought>> {
        self.thoughts.values()
    }

    pub fn len(&self) -> usize {
        self.thoughts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn oldest(&self) -> Option<ThoughtId> {
        self.thoughts.keys().next().copied()
    }

    /// Live thoughts currently held for an agent.
    pub fn live_count_for(&self, agent_id: &str) -> usize {
        self.per_agent.get(agent_id).copied().unwrap_or(0)
    }

    /// Mark a thought as no longer superposed. Returns whether it changed.
    pub fn archive(&mut self, id: ThoughtId) -> Result<bool> {
        let entry = self
            .thoughts
            .get_mut(&id)
            .ok_or(CollectiveError::ThoughtNotFound(id))?;
        if !entry.superposed {
            return Ok(false);
        }
        Arc::make_mut(entry).superposed = false;
        Ok(true)
    }

    /// Remove a thought under the capacity policy.
    pub(crate) fn evict(&mut self, id: ThoughtId) -> Option<Arc<Thought>> {
        let thought = self.thoughts.remove(&id)?;
        if let Some(count) = self.per_agent.get_mut(&thought.agent_id) {
            *count -= 1;
            if *count == 0 {
                self.per_agent.remove(&thought.agent_id);
            }
        }
        Some(thought)
    }

    /// Rebuild a store from validated snapshot records.
    pub(crate) fn from_parts(thoughts: Vec<Thought>, next_seq: u64) -> Self {
        let mut store = Self::new();
        store.next_seq = next_seq;
        for thought in thoughts {
            store.last_created_at = Some(match store.last_created_at {
                Some(last) if last > thought.created_at => last,
                _ => thought.created_at,
            });
            *store.per_agent.entry(thought.agent_id.clone()).or_default() += 1;
            store.thoughts.insert(thought.id, Arc::new(thought));
        }
        store
    }
}
