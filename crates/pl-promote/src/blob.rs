//! Blob store abstraction with filesystem and in-memory backends.

use async_trait::async_trait;
use parking_lot::Mutex;
use pl_types::{PlResult, StorageError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

/// A container of named blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `blob_name`. With `overwrite == false` an existing
    /// blob is left alone and [`StorageError::AlreadyExists`] is returned.
    async fn upload_blob(&self, blob_name: &str, data: Vec<u8>, overwrite: bool) -> PlResult<()>;

    fn container(&self) -> &str;

    /// Backend type name
    fn backend_type(&self) -> &'static str;
}

fn upload_error(blob: &str, message: impl Into<String>) -> pl_types::PlError {
    StorageError::Upload {
        blob: blob.to_string(),
        message: message.into(),
    }
    .into()
}

// =============================================================================
// Local Filesystem Backend
// =============================================================================

/// Blobs as files under `<root>/<container>/`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    container: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            container: container.into(),
        }
    }

    pub fn container_dir(&self) -> PathBuf {
        self.root.join(&self.container)
    }

    /// File backing `blob_name`; rejects names that would escape the container.
    pub fn blob_path(&self, blob_name: &str) -> PlResult<PathBuf> {
        let relative = Path::new(blob_name);
        let safe = !blob_name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(upload_error(blob_name, "blob name is not a relative path"));
        }
        Ok(self.container_dir().join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload_blob(&self, blob_name: &str, data: Vec<u8>, overwrite: bool) -> PlResult<()> {
        let path = self.blob_path(blob_name)?;
        if !overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::AlreadyExists {
                blob: blob_name.to_string(),
            }
            .into());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| upload_error(blob_name, e.to_string()))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| upload_error(blob_name, e.to_string()))?;
        Ok(())
    }

    fn container(&self) -> &str {
        &self.container
    }

    fn backend_type(&self) -> &'static str {
        "filesystem"
    }
}

// =============================================================================
// In-Memory Backend (for testing)
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    blobs: BTreeMap<String, Vec<u8>>,
    failing: BTreeSet<String>,
    attempts: usize,
}

/// Blobs held in a map. Names registered with [`fail_on`](Self::fail_on)
/// fail every upload.
#[derive(Debug)]
pub struct MemoryBlobStore {
    container: String,
    state: Mutex<MemoryState>,
}

impl MemoryBlobStore {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn fail_on(&self, blob_name: impl Into<String>) {
        self.state.lock().failing.insert(blob_name.into());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    pub fn get(&self, blob_name: &str) -> Option<Vec<u8>> {
        self.state.lock().blobs.get(blob_name).cloned()
    }

    pub fn blobs(&self) -> BTreeMap<String, Vec<u8>> {
        self.state.lock().blobs.clone()
    }

    pub fn blob_names(&self) -> Vec<String> {
        self.state.lock().blobs.keys().cloned().collect()
    }

    /// Upload calls made so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_blob(&self, blob_name: &str, data: Vec<u8>, overwrite: bool) -> PlResult<()> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if state.failing.contains(blob_name) {
            return Err(upload_error(blob_name, "injected failure"));
        }
        if !overwrite && state.blobs.contains_key(blob_name) {
            return Err(StorageError::AlreadyExists {
                blob: blob_name.to_string(),
            }
            .into());
        }
        state.blobs.insert(blob_name.to_string(), data);
        Ok(())
    }

    fn container(&self) -> &str {
        &self.container
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_types::PlError;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fs_store_writes_nested_blobs() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "models");
        store
            .upload_blob("iris_v1/data/model.json", b"{}".to_vec(), true)
            .await
            .unwrap();
        let written = dir.path().join("models/iris_v1/data/model.json");
        assert_eq!(std::fs::read(written).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn fs_store_honours_overwrite_flag() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "models");
        store.upload_blob("a/b", b"1".to_vec(), true).await.unwrap();
        store.upload_blob("a/b", b"2".to_vec(), true).await.unwrap();
        let err = store.upload_blob("a/b", b"3".to_vec(), false).await.unwrap_err();
        assert!(matches!(err, PlError::Storage(StorageError::AlreadyExists { .. })));
        assert_eq!(std::fs::read(store.blob_path("a/b").unwrap()).unwrap(), b"2");
    }

    #[tokio::test]
    async fn fs_store_rejects_escaping_names() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "models");
        assert!(store.upload_blob("../x", vec![], true).await.is_err());
        assert!(store.upload_blob("/etc/x", vec![], true).await.is_err());
        assert!(store.upload_blob("", vec![], true).await.is_err());
    }

    #[tokio::test]
    async fn memory_store_injects_failures() {
        let store = MemoryBlobStore::new("models");
        store.fail_on("bad");
        assert!(store.upload_blob("bad", vec![1], true).await.is_err());
        store.upload_blob("good", vec![2], true).await.unwrap();
        assert_eq!(store.blob_names(), vec!["good".to_string()]);
        assert_eq!(store.attempts(), 2);
    }
}
