//! Collective consciousness engine.
//!
//! Independent agents contribute thoughts to a named collective. Each
//! thought is compared against a bounded window of recent thoughts and
//! linked to the similar ones by weighted entanglement edges. On demand, a
//! collapse clusters the entangled thoughts relevant to a query into ranked
//! emergent patterns, while every contributor climbs a monotonic ladder of
//! consciousness levels.
//!
//! # Components
//!
//! - [`ThoughtStore`]: append-only, id-addressed thought storage
//! - [`EntanglementIndex`]: weighted undirected graph over stored thoughts
//! - [`AwarenessTracker`]: per-agent consciousness levels
//! - [`CollapseEngine`]: clustering and scoring of the graph into patterns
//! - [`Collective`]: the façade owning concurrency control, snapshots and
//!   observer hooks
//! - [`CollectiveRegistry`]: named instances within one process
//!
//! # Usage
//!
//! ```ignore
//! use noosphere_collective::{Collective, NewThought, ThoughtType};
//! use noosphere_config::CollectiveConfig;
//!
//! let collective = Collective::with_defaults("ops", CollectiveConfig::default())?;
//! collective
//!     .contribute(NewThought::new("scout", ThoughtType::Observation, payload, 0.8, features))
//!     .await?;
//! let outcome = collective.collapse("type:observation latency", 0.5).await?;
//! ```

pub mod awareness;
pub mod collapse;
pub mod collective;
pub mod entanglement;
pub mod events;
pub mod query;
pub mod registry;
pub mod similarity;
pub mod snapshot;
pub mod store;
pub mod thought;
pub mod types;

pub use awareness::{
    AwarenessChange, AwarenessDelta, AwarenessRecord, AwarenessTracker, ConsciousnessLevel,
};
pub use collapse::{
    impact_potential, CollapseEngine, CollapseOutcome, Exclusion, Pattern, PatternHistory,
};
pub use collective::{Collective, CollectiveStats, Strategies};
pub use entanglement::{Edge, EntanglementIndex, WindowScan};
pub use events::{BroadcastObserver, CollectiveEvent, CollectiveObserver};
pub use query::{CollapseQuery, MatchAll, QueryScope, RelevancePredicate, ScopeRelevance};
pub use registry::CollectiveRegistry;
pub use similarity::{cosine_similarity, CosineSimilarity, SimilarityComparator};
pub use snapshot::{SnapshotInfo, StateBlob, SNAPSHOT_FORMAT, SNAPSHOT_VERSION};
pub use store::ThoughtStore;
pub use thought::{NewThought, Thought, ThoughtType};
pub use types::{AgentId, CollectiveError, CollectiveId, PatternId, Result, ThoughtId};
