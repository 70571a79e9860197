// 🖼️ Object Store - profile photos and team logos
//
// The store hands back a URL; records keep only that URL. Nothing here is
// transactional with the database: a failed cleanup leaves an orphaned
// object, never a failed registration.

use crate::error::{AuctionError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// An uploaded file as received from the client
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

impl Upload {
    pub fn new(bytes: Vec<u8>, content_type: &str, file_name: &str) -> Self {
        Upload {
            bytes,
            content_type: content_type.to_string(),
            file_name: file_name.to_string(),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `upload` under `folder` and return its public URL.
    async fn store(&self, upload: &Upload, folder: &str) -> Result<String>;

    /// Remove the object behind `url`. Malformed or already-deleted
    /// references are not errors.
    async fn delete(&self, url: &str) -> Result<()>;
}

pub type SharedObjectStore = Arc<dyn ObjectStore>;

/// Best-effort delete: failures are logged and swallowed.
pub async fn release(store: &dyn ObjectStore, url: Option<&str>) {
    let Some(url) = url else {
        return;
    };
    if let Err(e) = store.delete(url).await {
        tracing::warn!(url = %url, error = %e, "Failed to release stored object");
    }
}

/// Extract the object name from `.../o/<encoded name>?...`
pub fn object_name(url: &str) -> Option<String> {
    let start = url.find("/o/")? + 3;
    let rest = &url[start..];
    let encoded = match rest.find('?') {
        Some(end) => &rest[..end],
        None => rest,
    };
    if encoded.is_empty() {
        return None;
    }
    let name = urlencoding::decode(encoded).ok()?.into_owned();
    is_safe_name(&name).then_some(name)
}

/// Relative path made only of normal components
fn is_safe_name(name: &str) -> bool {
    let path = Path::new(name);
    path.components().count() > 0
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

// ============================================================================
// LOCAL DISK STORE
// ============================================================================

/// Writes objects under a root directory and serves them back at
/// `{public_base}/o/{name}`.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base: String,
    timeout: Duration,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base: &str, timeout: Duration) -> Self {
        LocalObjectStore {
            root: root.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, name: &str) -> String {
        format!(
            "{}/o/{}?alt=media",
            self.public_base,
            urlencoding::encode(name)
        )
    }

    async fn timed<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::io::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(AuctionError::Storage(format!("{} failed: {}", op, e))),
            Err(_) => Err(AuctionError::Storage(format!(
                "{} timed out after {:?}",
                op, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn store(&self, upload: &Upload, folder: &str) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(&upload.bytes);
        let digest = format!("{:x}", hasher.finalize());

        let name = format!(
            "{}/{}-{}-{}",
            sanitize_file_name(folder),
            chrono::Utc::now().timestamp_millis(),
            &digest[..12],
            sanitize_file_name(&upload.file_name)
        );
        let path = self.root.join(&name);

        if let Some(parent) = path.parent() {
            self.timed("create upload folder", tokio::fs::create_dir_all(parent))
                .await?;
        }
        self.timed("write object", tokio::fs::write(&path, &upload.bytes))
            .await?;

        tracing::debug!(
            object = %name,
            bytes = upload.bytes.len(),
            content_type = %upload.content_type,
            "Stored object"
        );
        Ok(self.url_for(&name))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let Some(name) = object_name(url) else {
            tracing::warn!(url = %url, "Ignoring delete of malformed object URL");
            return Ok(());
        };

        let path = self.root.join(&name);
        match tokio::time::timeout(self.timeout, tokio::fs::remove_file(&path)).await {
            Ok(Ok(())) => {
                tracing::debug!(object = %name, "Deleted object");
                Ok(())
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(object = %name, "Object already gone");
                Ok(())
            }
            Ok(Err(e)) => Err(AuctionError::Storage(format!("delete object failed: {}", e))),
            Err(_) => Err(AuctionError::Storage(format!(
                "delete object timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

// ============================================================================
// TEST DOUBLE
// ============================================================================
