use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

use crate::block::Block;
use crate::error::{DownloadError, Result};
use crate::hashing::ResourceKey;
use crate::state::Snapshot;

const SNAPSHOT_FILE: &str = "snapshot.json";

/// On-disk working state, one directory per resource under `root`.
///
/// Each resource directory holds the progress snapshot and one payload file per
/// completed block, named `<start>-<end>`.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resource_dir(&self, key: &ResourceKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    pub fn snapshot_path(&self, key: &ResourceKey) -> PathBuf {
        self.resource_dir(key).join(SNAPSHOT_FILE)
    }

    pub fn part_path(&self, key: &ResourceKey, block: &Block) -> PathBuf {
        self.resource_dir(key).join(block.file_name())
    }

    pub async fn ensure_resource_dir(&self, key: &ResourceKey) -> Result<PathBuf> {
        let dir = self.resource_dir(key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DownloadError::persistence("create", &dir, e))?;
        Ok(dir)
    }

    /// Loads the snapshot for `key`.
    ///
    /// A missing snapshot is `None`. A snapshot that does not parse, or whose
    /// blocks fall outside the resource, is treated as absent so the run starts
    /// over; other read failures are fatal.
    pub async fn load(&self, key: &ResourceKey) -> Result<Option<Snapshot>> {
        let path = self.snapshot_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DownloadError::persistence("read", &path, e)),
        };

        match serde_json::from_str::<Snapshot>(&content) {
            Ok(snapshot) if snapshot.is_well_formed() => Ok(Some(snapshot)),
            Ok(_) => {
                warn!(path = %path.display(), "ignoring snapshot with blocks outside the resource");
                Ok(None)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable snapshot");
                Ok(None)
            }
        }
    }

    /// Persists `snapshot`, replacing any previous one atomically.
    ///
    /// Callers serialize saves for the same key.
    pub async fn save(&self, key: &ResourceKey, snapshot: &Snapshot) -> Result<()> {
        let dir = self.ensure_resource_dir(key).await?;
        let path = dir.join(SNAPSHOT_FILE);
        let staging = dir.join(format!("{SNAPSHOT_FILE}.tmp"));

        let content = serde_json::to_vec(snapshot)
            .map_err(|e| DownloadError::persistence("encode", &path, e))?;
        fs::write(&staging, content)
            .await
            .map_err(|e| DownloadError::persistence("write", &staging, e))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| DownloadError::persistence("replace", &path, e))?;

        debug!(key = %key, completed = snapshot.completed.len(), "saved snapshot");
        Ok(())
    }

    /// Removes the snapshot and every payload file of a resource.
    pub async fn remove(&self, key: &ResourceKey) -> Result<()> {
        let dir = self.resource_dir(key);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::persistence("remove", &dir, e)),
        }
    }

    /// All readable snapshots under the store root.
    pub async fn list(&self) -> Result<Vec<Snapshot>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(DownloadError::persistence("list", &self.root, e)),
        };

        let mut snapshots = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DownloadError::persistence("list", &self.root, e))?
        {
            let path = entry.path().join(SNAPSHOT_FILE);
            if let Ok(content) = fs::read_to_string(&path).await {
                match serde_json::from_str::<Snapshot>(&content) {
                    Ok(snapshot) if snapshot.is_well_formed() => snapshots.push(snapshot),
                    Ok(_) => warn!(path = %path.display(), "skipping snapshot with blocks outside the resource"),
                    Err(_) => {}
                }
            }
        }
        snapshots.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(snapshots)
    }

    /// Whether the payload file of `block` exists with exactly the block's length.
    pub async fn has_payload(&self, key: &ResourceKey, block: &Block) -> bool {
        match fs::metadata(self.part_path(key, block)).await {
            Ok(meta) => meta.is_file() && meta.len() == block.len(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Identity;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        let key = ResourceKey::from_url("http://host/a.bin");
        assert!(store.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_snapshot_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        let key = ResourceKey::from_url("http://host/a.bin");

        let mut snapshot = Snapshot::new("http://host/a.bin", "a.bin", 20, Identity::default());
        snapshot.completed.push(Block::new(0, 9));
        store.save(&key, &snapshot).await.unwrap();
        snapshot.completed.push(Block::new(10, 19));
        store.save(&key, &snapshot).await.unwrap();

        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded.completed, vec![Block::new(0, 9), Block::new(10, 19)]);
        assert!(!store.resource_dir(&key).join("snapshot.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        let key = ResourceKey::from_url("http://host/a.bin");
        store.ensure_resource_dir(&key).await.unwrap();
        std::fs::write(store.snapshot_path(&key), b"{not json").unwrap();

        assert!(store.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inverted_block_snapshot_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());

        let good = ResourceKey::from_url("http://host/good.bin");
        store
            .save(&good, &Snapshot::new("http://host/good.bin", "good.bin", 100, Identity::default()))
            .await
            .unwrap();

        let bad = ResourceKey::from_url("http://host/bad.bin");
        store.ensure_resource_dir(&bad).await.unwrap();
        let json = r#"{"url":"http://host/bad.bin","display_name":"bad.bin","total_size":100,
            "identity":{"etag":null,"last_modified":null},"completed":[{"start":50,"end":10}]}"#;
        std::fs::write(store.snapshot_path(&bad), json).unwrap();

        assert!(store.load(&bad).await.unwrap().is_none());
        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|s| s.display_name).collect();
        assert_eq!(names, vec!["good.bin"]);
    }

    #[tokio::test]
    async fn payload_check_compares_length() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        let key = ResourceKey::from_url("http://host/a.bin");
        store.ensure_resource_dir(&key).await.unwrap();

        let block = Block::new(0, 3);
        assert!(!store.has_payload(&key, &block).await);
        std::fs::write(store.part_path(&key, &block), b"abc").unwrap();
        assert!(!store.has_payload(&key, &block).await);
        std::fs::write(store.part_path(&key, &block), b"abcd").unwrap();
        assert!(store.has_payload(&key, &block).await);
    }

    #[tokio::test]
    async fn list_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path().join("meta"));
        assert!(store.list().await.unwrap().is_empty());

        for name in ["b.bin", "a.bin"] {
            let url = format!("http://host/{name}");
            let key = ResourceKey::from_url(&url);
            store
                .save(&key, &Snapshot::new(&url, name, 10, Identity::default()))
                .await
                .unwrap();
        }
        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|s| s.display_name).collect();
        assert_eq!(names, vec!["a.bin", "b.bin"]);

        let key = ResourceKey::from_url("http://host/a.bin");
        store.remove(&key).await.unwrap();
        assert!(!store.resource_dir(&key).exists());
        store.remove(&key).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
