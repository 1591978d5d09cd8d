//! Durability for noosphere collectives.
//!
//! The engine only produces and consumes opaque [`StateBlob`]s; this crate
//! decides where they live. A [`PersistenceAdapter`] stores one blob per
//! collective, [`open_collective`] restores a collective at startup, and the
//! [`CheckpointCoordinator`] snapshots every registered collective on an
//! interval and once more on shutdown.
//!
//! [`StateBlob`]: noosphere_collective::StateBlob

pub mod adapter;
pub mod checkpoint;

pub use adapter::{FilePersistence, MemoryPersistence, PersistenceAdapter};
pub use checkpoint::{
    checkpoint, open_collective, CheckpointCoordinator, CheckpointCoordinatorConfig,
    CheckpointHandle, CheckpointReport,
};
