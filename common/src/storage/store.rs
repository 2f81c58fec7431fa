use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Byte storage for raw record payloads.
///
/// Metadata lives in SurrealDB; the content itself is written here under
/// `raw/{user}/{dataset}/{record}` so a dataset can be dropped by prefix.
#[derive(Clone)]
pub struct PayloadStore {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl PayloadStore {
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Wrap an already constructed backend, mostly for tests.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    /// Delete all objects below the specified prefix.
    ///
    /// For local filesystem backends, this also attempts to clean up empty directories.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await?;
        }

        Ok(())
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Best effort; errors other than a non-empty directory are only logged.
    async fn cleanup_filesystem_directories(&self, prefix: &str) -> object_store::Result<()> {
        let Some(base) = &self.local_base else {
            return Ok(());
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return Ok(());
        }

        let mut current = base.join(relative);

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(_) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(
                        error = %err,
                        path = %current.display(),
                        "Failed to remove directory during cleanup"
                    ),
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(())
    }
}

async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Relative `data_dir` values resolve against the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    let configured = Path::new(&cfg.data_dir);
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(configured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> AppConfig {
        AppConfig {
            storage: StorageKind::Memory,
            data_dir: "/tmp/unused".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_prefix_delete() {
        let store = PayloadStore::new(&memory_config())
            .await
            .expect("create payload store");
        assert!(store.local_base_path().is_none());

        let location = "raw/user-1/dataset-1/record-1";
        store
            .put(location, Bytes::from_static(b"[{\"type\":\"cbg\"}]"))
            .await
            .expect("put");
        assert_eq!(
            store.get(location).await.expect("get").as_ref(),
            b"[{\"type\":\"cbg\"}]"
        );
        assert!(store.exists(location).await.expect("exists"));

        store
            .delete_prefix("raw/user-1/dataset-1")
            .await
            .expect("delete prefix");
        assert!(!store.exists(location).await.expect("exists after delete"));
    }

    #[tokio::test]
    async fn test_local_store_cleans_up_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = AppConfig {
            storage: StorageKind::Local,
            data_dir: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        let store = PayloadStore::new(&cfg).await.expect("create payload store");
        assert_eq!(store.backend_kind(), &StorageKind::Local);

        let location = "raw/user-1/dataset-1/record-1";
        store
            .put(location, Bytes::from_static(b"[]"))
            .await
            .expect("put");
        assert!(dir.path().join(location).exists());

        store
            .delete_prefix("raw/user-1/dataset-1")
            .await
            .expect("delete prefix");
        assert!(!dir.path().join("raw/user-1/dataset-1").exists());
    }

    #[tokio::test]
    async fn test_missing_object_reports_not_found() {
        let store = PayloadStore::in_memory();

        assert!(!store.exists("raw/none").await.expect("exists"));
        let err = store.get("raw/none").await.expect_err("missing object");
        assert!(matches!(err, object_store::Error::NotFound { .. }));
    }
}
