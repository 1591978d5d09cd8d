//! Notification hooks for transport layers.
//!
//! Observers are called synchronously, after the change they describe is
//! visible to readers, and outside every engine lock. Keep them cheap; a
//! transport that needs to fan out should hand events to a channel, which
//! is what [`BroadcastObserver`] does.

use crate::awareness::AwarenessChange;
use crate::collapse::Pattern;
use crate::entanglement::Edge;
use crate::thought::Thought;
use crate::types::CollectiveId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Receives change notifications from a collective.
pub trait CollectiveObserver: Send + Sync {
    fn on_thought_added(&self, _collective_id: &str, _thought: &Thought, _edges: &[Edge]) {}

    fn on_pattern_emitted(&self, _collective_id: &str, _pattern: &Pattern) {}

    fn on_awareness_changed(&self, _collective_id: &str, _change: &AwarenessChange) {}
}

/// A change notification in owned form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CollectiveEvent {
    ThoughtAdded {
        collective_id: CollectiveId,
        thought: Thought,
        edges: Vec<Edge>,
    },
    PatternEmitted {
        collective_id: CollectiveId,
        pattern: Pattern,
    },
    AwarenessChanged {
        collective_id: CollectiveId,
        change: AwarenessChange,
    },
}

/// Forwards every notification into a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<CollectiveEvent>,
}

impl BroadcastObserver {
    /// Create an observer whose channel buffers up to `capacity` events per
    /// lagging receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectiveEvent> {
        self.sender.subscribe()
    }

    fn send(&self, event: CollectiveEvent) {
        // No receivers is not an error for a notification hook.
        let _ = self.sender.send(event);
    }
}

impl CollectiveObserver for BroadcastObserver {
    fn on_thought_added(&self, collective_id: &str, thought: &Thought, edges: &[Edge]) {
        self.send(CollectiveEvent::ThoughtAdded {
            collective_id: collective_id.to_string(),
            thought: thought.clone(),
            edges: edges.to_vec(),
        });
    }

    fn on_pattern_emitted(&self, collective_id: &str, pattern: &Pattern) {
        self.send(CollectiveEvent::PatternEmitted {
            collective_id: collective_id.to_string(),
            pattern: pattern.clone(),
        });
    }

    fn on_awareness_changed(&self, collective_id: &str, change: &AwarenessChange) {
        self.send(CollectiveEvent::AwarenessChanged {
            collective_id: collective_id.to_string(),
            change: change.clone(),
        });
    }
}
