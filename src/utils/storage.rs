// src/utils/storage.rs

//! Object storage for uploaded course resources.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;

/// What the store returns after writing an object.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredObject {
    /// Key relative to the store root, e.g. `courses/3/<uuid>-notes.pdf`.
    pub path: String,
    /// Publicly reachable URL for the object.
    pub url: String,
    pub size: i64,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, data: &[u8]) -> Result<StoredObject, AppError>;

    /// Removing a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<(), AppError>;

    /// Removes every object under `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError>;
}

/// Stores objects on the local filesystem; the router serves `root` under `public_base`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    public_base: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(key);
        let only_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !only_normal {
            return Err(AppError::BadRequest(format!("Invalid storage key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, content_type: &str, data: &[u8]) -> Result<StoredObject, AppError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                tracing::error!("Failed to create upload directory {:?}: {:?}", parent, e);
                AppError::InternalServerError(e.to_string())
            })?;
        }
        tokio::fs::write(&path, data).await.map_err(|e| {
            tracing::error!("Failed to write object {}: {:?}", key, e);
            AppError::InternalServerError(e.to_string())
        })?;

        tracing::debug!(key, size = data.len(), "Object stored");
        Ok(StoredObject {
            path: key.to_string(),
            url: format!("{}/{}", self.public_base, key),
            size: data.len() as i64,
            content_type: content_type.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::InternalServerError(e.to_string())),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError> {
        let path = self.resolve(prefix)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::InternalServerError(e.to_string())),
        }
    }
}

/// Reduces a client-supplied file name to `[A-Za-z0-9._-]`, keeping at most 100 chars.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
