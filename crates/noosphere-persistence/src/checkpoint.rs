//! Startup restore and periodic checkpointing.

use crate::adapter::PersistenceAdapter;
use anyhow::Result;
use noosphere_collective::{Collective, CollectiveError, CollectiveRegistry, Strategies};
use noosphere_config::{CollectiveConfig, PersistenceSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Snapshot a collective and hand it to the adapter. Returns the blob size.
pub async fn checkpoint(collective: &Collective, adapter: &dyn PersistenceAdapter) -> Result<usize> {
    let blob = collective.snapshot().await?;
    adapter.save(collective.id(), &blob).await?;
    debug!(
        "Checkpointed collective {} ({} bytes)",
        collective.id(),
        blob.len()
    );
    Ok(blob.len())
}

/// Build a collective, restoring it from the adapter when a snapshot
/// exists. A snapshot that fails validation is returned as
/// [`CollectiveError::CorruptSnapshot`] rather than starting empty.
pub async fn open_collective(
    id: &str,
    config: CollectiveConfig,
    strategies: Strategies,
    adapter: &dyn PersistenceAdapter,
) -> std::result::Result<Collective, CollectiveError> {
    let collective = Collective::new(id, config, strategies)?;

    match adapter.load(id).await.map_err(CollectiveError::Internal)? {
        Some(blob) => {
            if let Err(e) = collective.restore(&blob).await {
                error!("Snapshot for collective {} is unusable: {}", id, e);
                return Err(e);
            }
            info!("Opened collective {} from snapshot", id);
        }
        None => info!("No snapshot for collective {}; starting empty", id),
    }

    Ok(collective)
}

/// Configuration for the checkpoint coordinator
#[derive(Debug, Clone)]
pub struct CheckpointCoordinatorConfig {
    /// Seconds between checkpoint cycles
    pub interval_secs: u64,
}

impl Default for CheckpointCoordinatorConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl From<&PersistenceSettings> for CheckpointCoordinatorConfig {
    fn from(settings: &PersistenceSettings) -> Self {
        Self {
            interval_secs: settings.checkpoint_interval_secs,
        }
    }
}

/// Outcome of one checkpoint cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointReport {
    pub saved: Vec<String>,
    pub failed: Vec<String>,
}

/// Background task that checkpoints every registered collective on an
/// interval and once more when shut down.
#[derive(Clone)]
pub struct CheckpointCoordinator {
    registry: CollectiveRegistry,
    adapter: Arc<dyn PersistenceAdapter>,
    config: CheckpointCoordinatorConfig,
}

impl CheckpointCoordinator {
    pub fn new(
        registry: CollectiveRegistry,
        adapter: Arc<dyn PersistenceAdapter>,
        config: CheckpointCoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            adapter,
            config,
        }
    }

    /// Checkpoint every registered collective once. A failure for one
    /// collective does not stop the others.
    pub async fn run_checkpoint_cycle(&self) -> CheckpointReport {
        let mut report = CheckpointReport::default();

        for id in self.registry.list().await {
            let collective = match self.registry.get(&id).await {
                Ok(collective) => collective,
                // Torn down since the listing
                Err(_) => continue,
            };
            match checkpoint(&collective, self.adapter.as_ref()).await {
                Ok(_) => report.saved.push(id),
                Err(e) => {
                    warn!("Checkpoint of collective {} failed: {}", id, e);
                    report.failed.push(id);
                }
            }
        }

        debug!(
            "Checkpoint cycle saved {} collective(s), {} failed",
            report.saved.len(),
            report.failed.len()
        );
        report
    }

    /// Run until `shutdown` flips to true or its sender is dropped, then
    /// take a final checkpoint.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> CheckpointReport {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        info!(
            "Starting checkpoint coordinator with interval {} seconds",
            period.as_secs()
        );

        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_checkpoint_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let report = self.run_checkpoint_cycle().await;
        info!(
            "Checkpoint coordinator stopped after final checkpoint of {} collective(s)",
            report.saved.len()
        );
        report
    }

    /// Run on a background task.
    pub fn spawn(self) -> CheckpointHandle {
        let (sender, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        CheckpointHandle { sender, task }
    }
}

/// Control handle for a spawned [`CheckpointCoordinator`].
#[derive(Debug)]
pub struct CheckpointHandle {
    sender: watch::Sender<bool>,
    task: JoinHandle<CheckpointReport>,
}

impl CheckpointHandle {
    /// Stop the coordinator and wait for its final checkpoint.
    pub async fn shutdown(self) -> Result<CheckpointReport> {
        // The task may already have exited; its result is still awaited below.
        let _ = self.sender.send(true);
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryPersistence;
    use noosphere_collective::{NewThought, StateBlob, ThoughtType};

    fn draft(agent: &str) -> NewThought {
        NewThought::new(agent, ThoughtType::Observation, "ping".into(), 0.5, vec![1.0, 0.0])
    }

    #[tokio::test]
    async fn test_checkpoint_then_open() {
        let adapter = MemoryPersistence::new();
        let collective = Collective::with_defaults("ops", CollectiveConfig::default()).unwrap();
        collective.contribute(draft("a")).await.unwrap();
        collective.contribute(draft("b")).await.unwrap();

        let size = checkpoint(&collective, &adapter).await.unwrap();
        assert!(size > 0);

        let reopened = open_collective(
            "ops",
            CollectiveConfig::default(),
            Strategies::default(),
            &adapter,
        )
        .await
        .unwrap();
        assert_eq!(reopened.stats().await, collective.stats().await);
    }

    #[tokio::test]
    async fn test_open_without_snapshot_starts_empty() {
        let adapter = MemoryPersistence::new();
        let collective = open_collective(
            "fresh",
            CollectiveConfig::default(),
            Strategies::default(),
            &adapter,
        )
        .await
        .unwrap();
        assert_eq!(collective.stats().await.thoughts, 0);
    }

    #[tokio::test]
    async fn test_open_surfaces_corrupt_snapshot() {
        let adapter = MemoryPersistence::new();
        adapter
            .save("ops", &StateBlob::from_bytes(b"garbage".to_vec()))
            .await
            .unwrap();

        let err = open_collective(
            "ops",
            CollectiveConfig::default(),
            Strategies::default(),
            &adapter,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CollectiveError::CorruptSnapshot(_)));
    }

    #[tokio::test]
    async fn test_coordinator_checkpoints_on_shutdown() {
        let registry = CollectiveRegistry::new();
        let adapter = Arc::new(MemoryPersistence::new());
        for id in ["one", "two"] {
            let collective = registry
                .create(id, CollectiveConfig::default(), Strategies::default())
                .await
                .unwrap();
            collective.contribute(draft("a")).await.unwrap();
        }

        let coordinator = CheckpointCoordinator::new(
            registry.clone(),
            adapter.clone(),
            CheckpointCoordinatorConfig {
                interval_secs: 3600,
            },
        );
        let report = coordinator.spawn().shutdown().await.unwrap();

        assert_eq!(report.saved, vec!["one".to_string(), "two".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(
            adapter.list().await.unwrap(),
            vec!["one".to_string(), "two".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_checkpoints_on_interval() {
        let registry = CollectiveRegistry::new();
        let adapter = Arc::new(MemoryPersistence::new());
        registry
            .create("ticking", CollectiveConfig::default(), Strategies::default())
            .await
            .unwrap();

        let handle = CheckpointCoordinator::new(
            registry,
            adapter.clone(),
            CheckpointCoordinatorConfig { interval_secs: 10 },
        )
        .spawn();

        time::sleep(Duration::from_secs(5)).await;
        assert!(adapter.list().await.unwrap().is_empty());

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(adapter.list().await.unwrap(), vec!["ticking".to_string()]);

        handle.shutdown().await.unwrap();
    }
}
