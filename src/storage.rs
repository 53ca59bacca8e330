//! Object storage collaborator.
//!
//! Received raw messages live in a bucket under `prefix + message_id`.
//! The pipeline needs exactly two operations: re-copying an object onto
//! a key (real object stores use this to take ownership and reset the
//! ACL before reading) and fetching its bytes.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::StorageError;

/// Asynchronous object storage holding received raw messages.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy `source_key` to `dest_key` within `bucket`. `private` asks
    /// for a private ACL on the copy where the backend supports ACLs.
    async fn copy(
        &self,
        bucket: &str,
        source_key: &str,
        dest_key: &str,
        private: bool,
    ) -> Result<(), StorageError>;

    /// Fetch the full content of `key`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Filesystem-backed store: one directory per bucket under a root.
/// Bucket and key segments must be relative paths without parent
/// components; anything else is rejected before touching the
/// filesystem. ACL flags are accepted and ignored.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an object path. Keys arrive from untrusted
    /// notifications (the message id is a key segment), so both
    /// segments are validated to stay inside the root.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        if !is_contained(bucket) || !is_contained(key) {
            return Err(StorageError::InvalidKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(self.root.join(bucket).join(key))
    }
}

/// A bucket or key segment must be a non-empty relative path made of
/// normal components only (no `..`, no leading `/`, no prefix).
fn is_contained(segment: &str) -> bool {
    !segment.is_empty()
        && Path::new(segment)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn copy(
        &self,
        bucket: &str,
        source_key: &str,
        dest_key: &str,
        _private: bool,
    ) -> Result<(), StorageError> {
        let source = self.object_path(bucket, source_key)?;
        if source_key == dest_key {
            // An object copied onto itself only needs to exist here; the
            // ownership/ACL reset is an object-store concern.
            return fs::metadata(&source)
                .await
                .map(|_| ())
                .map_err(|e| map_io(bucket, source_key, e));
        }
        let dest = self.object_path(bucket, dest_key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(bucket, dest_key, e))?;
        }
        fs::copy(&source, &dest)
            .await
            .map(|_| ())
            .map_err(|e| map_io(bucket, source_key, e))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        fs::read(path).await.map_err(|e| map_io(bucket, key, e))
    }
}

fn map_io(bucket: &str, key: &str, source: std::io::Error) -> StorageError {
    if source.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StorageError::Io {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        }
    }
}
