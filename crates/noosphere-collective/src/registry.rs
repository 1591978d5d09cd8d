//! Named collective instances within one process.

use crate::collective::{Collective, Strategies};
use crate::types::{CollectiveError, CollectiveId, Result};
use noosphere_config::CollectiveConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Registry of live collectives, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct CollectiveRegistry {
    collectives: Arc<RwLock<HashMap<CollectiveId, Arc<Collective>>>>,
}

impl CollectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new collective.
    ///
    /// # Returns
    /// * `Err(CollectiveExists)` if the id is already registered
    pub async fn create(
        &self,
        id: impl Into<CollectiveId>,
        config: CollectiveConfig,
        strategies: Strategies,
    ) -> Result<Arc<Collective>> {
        let id = id.into();
        let mut collectives = self.collectives.write().await;
        if collectives.contains_key(&id) {
            return Err(CollectiveError::CollectiveExists(id));
        }

        let collective = Arc::new(Collective::new(id.clone(), config, strategies)?);
        collectives.insert(id.clone(), collective.clone());
        info!("Created collective {}", id);
        Ok(collective)
    }

    /// Register an already constructed collective, e.g. one restored from
    /// persistence.
    pub async fn insert(&self, collective: Arc<Collective>) -> Result<()> {
        let mut collectives = self.collectives.write().await;
        let id = collective.id().to_string();
        if collectives.contains_key(&id) {
            return Err(CollectiveError::CollectiveExists(id));
        }
        collectives.insert(id, collective);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Collective>> {
        self.collectives
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CollectiveError::CollectiveNotFound(id.to_string()))
    }

    /// Registered ids, sorted.
    pub async fn list(&self) -> Vec<CollectiveId> {
        let mut ids: Vec<_> = self.collectives.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove a collective and hand it back so the caller can checkpoint it.
    pub async fn teardown(&self, id: &str) -> Result<Arc<Collective>> {
        let removed = self
            .collectives
            .write()
            .await
            .remove(id)
            .ok_or_else(|| CollectiveError::CollectiveNotFound(id.to_string()))?;
        info!("Tore down collective {}", id);
        Ok(removed)
    }
}
