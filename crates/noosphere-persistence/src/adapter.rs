//! Storage backends for collective snapshots.

use anyhow::{Context, Result};
use async_trait::async_trait;
use noosphere_collective::{CollectiveId, StateBlob};
use noosphere_config::PersistenceSettings;
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Storage contract for snapshots, one blob per collective.
///
/// Implementations treat blobs as opaque bytes; validation happens when a
/// collective restores from them.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Store a blob, replacing any previous one for this collective.
    async fn save(&self, collective_id: &str, blob: &StateBlob) -> Result<()>;

    /// The stored blob, or `None` if this collective was never saved.
    async fn load(&self, collective_id: &str) -> Result<Option<StateBlob>>;

    /// Remove the stored blob. Returns whether one existed.
    async fn delete(&self, collective_id: &str) -> Result<bool>;

    /// Ids of every stored collective, sorted.
    async fn list(&self) -> Result<Vec<CollectiveId>>;
}

/// Process-local adapter, for tests and ephemeral deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    blobs: Arc<RwLock<HashMap<CollectiveId, Vec<u8>>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryPersistence {
    async fn save(&self, collective_id: &str, blob: &StateBlob) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(collective_id.to_string(), blob.as_bytes().to_vec());
        Ok(())
    }

    async fn load(&self, collective_id: &str) -> Result<Option<StateBlob>> {
        Ok(self
            .blobs
            .read()
            .await
            .get(collective_id)
            .map(|bytes| StateBlob::from_bytes(bytes.clone())))
    }

    async fn delete(&self, collective_id: &str) -> Result<bool> {
        Ok(self.blobs.write().await.remove(collective_id).is_some())
    }

    async fn list(&self) -> Result<Vec<CollectiveId>> {
        let mut ids: Vec<_> = self.blobs.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

const SNAPSHOT_SUFFIX: &str = ".snapshot.json";

/// One file per collective in a directory. Writes go to a temporary file
/// in the same directory and are renamed over the target, so a crash never
/// leaves a half-written snapshot behind.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    directory: PathBuf,
}

impl FilePersistence {
    /// Use `directory`, creating it if needed.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("creating snapshot directory {}", directory.display()))?;
        Ok(Self { directory })
    }

    /// Use the configured directory, or the platform data directory.
    pub async fn from_settings(settings: &PersistenceSettings) -> Result<Self> {
        let directory = settings
            .resolved_directory()
            .context("no snapshot directory configured and no platform data directory found")?;
        Self::open(directory).await
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, collective_id: &str) -> PathBuf {
        self.directory
            .join(format!("{}{}", encode_file_stem(collective_id), SNAPSHOT_SUFFIX))
    }
}

#[async_trait]
impl PersistenceAdapter for FilePersistence {
    async fn save(&self, collective_id: &str, blob: &StateBlob) -> Result<()> {
        let directory = self.directory.clone();
        let target = self.path_for(collective_id);
        let bytes = blob.as_bytes().to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = tempfile::NamedTempFile::new_in(&directory)
                .with_context(|| format!("creating temporary file in {}", directory.display()))?;
            file.write_all(&bytes)?;
            file.as_file().sync_all()?;
            file.persist(&target)
                .with_context(|| format!("replacing {}", target.display()))?;
            Ok(())
        })
        .await
        .context("snapshot writer task failed")??;

        debug!("Saved snapshot for collective {} to {}", collective_id, self.directory.display());
        Ok(())
    }

    async fn load(&self, collective_id: &str) -> Result<Option<StateBlob>> {
        let path = self.path_for(collective_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(StateBlob::from_bytes(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn delete(&self, collective_id: &str) -> Result<bool> {
        let path = self.path_for(collective_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }

    async fn list(&self) -> Result<Vec<CollectiveId>> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .with_context(|| format!("listing {}", self.directory.display()))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(SNAPSHOT_SUFFIX)) else {
                continue;
            };
            if let Some(id) = decode_file_stem(stem) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Escape an id into a portable file name: ASCII alphanumerics, `-` and `_`
/// pass through, every other byte becomes `%XX`.
fn encode_file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

fn decode_file_stem(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(text: &str) -> StateBlob {
        StateBlob::from_bytes(text.as_bytes().to_vec())
    }

    async fn exercise(adapter: &dyn PersistenceAdapter) {
        assert!(adapter.load("alpha").await.unwrap().is_none());
        assert!(adapter.list().await.unwrap().is_empty());

        adapter.save("beta", &blob("one")).await.unwrap();
        adapter.save("alpha", &blob("two")).await.unwrap();
        adapter.save("beta", &blob("three")).await.unwrap();

        assert_eq!(adapter.load("beta").await.unwrap().unwrap(), blob("three"));
        assert_eq!(
            adapter.list().await.unwrap(),
            vec!["alpha".to_string(), "beta".to_string()]
        );

        assert!(adapter.delete("alpha").await.unwrap());
        assert!(!adapter.delete("alpha").await.unwrap());
        assert_eq!(adapter.list().await.unwrap(), vec!["beta".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_adapter_contract() {
        exercise(&MemoryPersistence::new()).await;
    }

    #[tokio::test]
    async fn test_file_adapter_contract() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilePersistence::open(dir.path().join("snapshots")).await.unwrap();
        exercise(&adapter).await;

        // Only the final file remains; the temporary one was renamed away.
        let files: Vec<_> = std::fs::read_dir(adapter.directory()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_file_adapter_escapes_ids() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilePersistence::open(dir.path()).await.unwrap();

        let awkward = "../team/ops 1%";
        adapter.save(awkward, &blob("x")).await.unwrap();
        adapter.save("team_ops", &blob("y")).await.unwrap();

        assert_eq!(adapter.load(awkward).await.unwrap().unwrap(), blob("x"));
        assert_eq!(
            adapter.list().await.unwrap(),
            vec![awkward.to_string(), "team_ops".to_string()]
        );
        assert!(dir.path().join("%2E%2E%2Fteam%2Fops%201%25.snapshot.json").exists());
    }

    #[test]
    fn test_file_stem_round_trip() {
        for id in ["plain", "with space", "ünïcode", "a%b", ""] {
            assert_eq!(decode_file_stem(&encode_file_stem(id)).as_deref(), Some(id));
        }
        assert_eq!(decode_file_stem("bad%zz"), None);
        assert_eq!(decode_file_stem("short%4"), None);
    }
}
