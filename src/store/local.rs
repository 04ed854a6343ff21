//! Filesystem store: archives are copied into a directory and shared as
//! `file://` URLs. Useful offline and as the store behind the test suite.

use crate::error::StoreError;
use crate::store::ObjectStore;
use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Directory-backed [`ObjectStore`].
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    links: Mutex<HashSet<String>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            links: Mutex::new(HashSet::new()),
        }
    }

    /// Filesystem location of the blob at store `path`.
    pub fn blob_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = path.trim_start_matches('/');
        let safe = !relative.is_empty()
            && Path::new(relative)
                .components()
                .all(|c| matches!(c, std::path::Component::Normal(_)));
        if !safe {
            return Err(StoreError::Request(format!("invalid store path '{path}'")));
        }
        Ok(self.root.join(relative))
    }

    fn link_for(&self, path: &str) -> Result<String, StoreError> {
        let blob = self.blob_path(path)?;
        let absolute = if blob.is_absolute() {
            blob
        } else {
            std::env::current_dir()?.join(blob)
        };
        Url::from_file_path(&absolute)
            .map(|u| u.to_string())
            .map_err(|()| StoreError::Request(format!("no file URL for {}", absolute.display())))
    }

    fn shared(&self) -> Result<std::sync::MutexGuard<'_, HashSet<String>>, StoreError> {
        self.links
            .lock()
            .map_err(|_| StoreError::Request("link registry poisoned".to_string()))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn verify(&self) -> Result<String, StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(format!("directory {}", self.root.display()))
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let blob = self.blob_path(path)?;
        if let Some(parent) = blob.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&blob, bytes).await?;
        debug!("Stored {}", blob.display());
        Ok(())
    }

    async fn create_shared_link(&self, path: &str) -> Result<String, StoreError> {
        let blob = self.blob_path(path)?;
        if !tokio::fs::try_exists(&blob).await? {
            return Err(StoreError::NotFound {
                path: path.to_string(),
            });
        }
        if !self.shared()?.insert(path.to_string()) {
            return Err(StoreError::LinkAlreadyExists {
                path: path.to_string(),
            });
        }
        self.link_for(path)
    }

    async fn existing_link(&self, path: &str) -> Result<Option<String>, StoreError> {
        if !self.shared()?.contains(path) {
            return Ok(None);
        }
        self.link_for(path).map(Some)
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let blob = self.blob_path(path)?;
        match tokio::fs::remove_file(&blob).await {
            Ok(()) => {
                self.shared()?.remove(path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn upload_link_delete() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store.upload("/manga_00000001.zip", b"zip".to_vec()).await.unwrap();
        assert!(tmp.path().join("manga_00000001.zip").exists());

        let link = store.create_shared_link("/manga_00000001.zip").await.unwrap();
        assert!(link.starts_with("file://"));
        assert!(link.ends_with("manga_00000001.zip"));

        store.delete("/manga_00000001.zip").await.unwrap();
        assert!(!tmp.path().join("manga_00000001.zip").exists());
        assert!(matches!(
            store.delete("/manga_00000001.zip").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn second_link_reports_existing() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store.upload("/a.zip", vec![1]).await.unwrap();

        let first = store.create_shared_link("/a.zip").await.unwrap();
        assert!(matches!(
            store.create_shared_link("/a.zip").await,
            Err(StoreError::LinkAlreadyExists { .. })
        ));
        assert_eq!(store.existing_link("/a.zip").await.unwrap(), Some(first));
        assert_eq!(store.existing_link("/b.zip").await.unwrap(), None);
    }

    #[tokio::test]
    async fn link_for_missing_blob_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        assert!(matches!(
            store.create_shared_link("/nope.zip").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn traversal_is_rejected() {
        let store = LocalStore::new("/srv/archives");
        assert!(store.blob_path("/../etc/passwd").is_err());
        assert!(store.blob_path("/").is_err());
        assert_eq!(
            store.blob_path("/x.zip").unwrap(),
            PathBuf::from("/srv/archives/x.zip")
        );
    }
}
