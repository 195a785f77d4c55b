//! Blob storage for message attachments

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::error::{ChatError, Result};

/// Upload-and-resolve blob storage
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store `data` under `object_path` and return a URL it can be downloaded from
    async fn upload(&self, object_path: &str, data: Bytes, content_type: &str) -> Result<String>;
}

/// Media store backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    /// Serve download URLs as `{base_url}/{object_path}` instead of `file://` URLs
    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.public_base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, object_path: &str) -> Result<PathBuf> {
        let relative = Path::new(object_path);
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => {
                    return Err(ChatError::Media(format!(
                        "object path '{}' escapes the media root",
                        object_path
                    )))
                }
            }
        }
        if depth == 0 {
            return Err(ChatError::Media("object path is empty".to_string()));
        }
        Ok(resolved)
    }

    fn download_url(&self, object_path: &str, file_path: &Path) -> Result<String> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{}/{}", base, object_path.trim_start_matches('/')));
        }

        let absolute = if file_path.is_absolute() {
            file_path.to_path_buf()
        } else {
            std::env::current_dir()?.join(file_path)
        };
        Url::from_file_path(&absolute)
            .map(String::from)
            .map_err(|_| {
                ChatError::Media(format!(
                    "cannot build a file URL for {}",
                    absolute.display()
                ))
            })
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn upload(&self, object_path: &str, data: Bytes, content_type: &str) -> Result<String> {
        let target = self.resolve(object_path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &data).await?;
        debug!(
            "Stored {} bytes ({}) at {}",
            data.len(),
            content_type,
            target.display()
        );
        self.download_url(object_path, &target)
    }
}

/// Reduce a caller-supplied file name to a safe single path segment
pub(crate) fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}
