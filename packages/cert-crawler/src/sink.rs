//! Resource download and artifact persistence.
//!
//! Both sides are best effort from the chain walker's point of view: a
//! failed resource is logged and the job still completes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::classify::ResourceRef;
use crate::error::{ResourceError, SinkError};
use crate::ledger::JobId;

/// Downloaded bytes of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub name: String,
    /// URL the bytes actually came from
    pub source_url: String,
    pub bytes: Vec<u8>,
}

impl FetchedResource {
    /// File extension taken from the source URL path, `bin` if none.
    pub fn extension(&self) -> String {
        Url::parse(&self.source_url)
            .ok()
            .and_then(|url| {
                let path = url.path();
                let file = path.rsplit('/').next()?;
                let (_, ext) = file.rsplit_once('.')?;
                (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
                    .then(|| ext.to_ascii_lowercase())
            })
            .unwrap_or_else(|| "bin".to_string())
    }
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, resource: &ResourceRef) -> Result<FetchedResource, ResourceError>;
}

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist one artifact; returns the path it was stored under.
    async fn store(
        &self,
        id: JobId,
        label: &str,
        resource: &FetchedResource,
    ) -> Result<String, SinkError>;

    /// Remove a stored artifact. Not used by the crawl loop itself.
    async fn delete(&self, path: &str) -> Result<(), SinkError>;
}

/// Relative artifact path: `{label}/{id}_{name}.{ext}`.
pub fn artifact_path(id: JobId, label: &str, resource: &FetchedResource) -> String {
    format!(
        "{}/{}_{}.{}",
        sanitize(label),
        id,
        sanitize(&resource.name),
        resource.extension()
    )
}

fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Downloads resources over HTTP, falling back to the alternate URL.
pub struct HttpResourceFetcher {
    client: reqwest::Client,
}

impl HttpResourceFetcher {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ResourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResourceError::Http {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| ResourceError::Http {
            url: url.to_string(),
            source: Box::new(e),
        })?;

        if bytes.is_empty() {
            return Err(ResourceError::Empty {
                url: url.to_string(),
            });
        }

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self, resource: &ResourceRef) -> Result<FetchedResource, ResourceError> {
        let (source_url, bytes) = match self.download(&resource.url).await {
            Ok(bytes) => (resource.url.clone(), bytes),
            Err(primary) => match &resource.fallback_url {
                Some(fallback) => {
                    debug!(url = %resource.url, error = %primary, "falling back to alternate rendition");
                    (fallback.clone(), self.download(fallback).await?)
                }
                None => return Err(primary),
            },
        };

        Ok(FetchedResource {
            name: resource.name.clone(),
            source_url,
            bytes,
        })
    }
}

/// Stores artifacts as files under a root directory.
pub struct FsArtifactSink {
    root: PathBuf,
}

impl FsArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SinkError> {
        if path.split('/').any(|segment| segment == ".." || segment.is_empty()) {
            return Err(SinkError::Rejected {
                reason: format!("invalid artifact path {path}"),
            });
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn store(
        &self,
        id: JobId,
        label: &str,
        resource: &FetchedResource,
    ) -> Result<String, SinkError> {
        let relative = artifact_path(id, label, resource);
        let full = self.resolve(&relative)?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, &resource.bytes).await?;

        info!(job_id = id, path = %relative, bytes = resource.bytes.len(), "stored artifact");
        Ok(relative)
    }

    async fn delete(&self, path: &str) -> Result<(), SinkError> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(full).await?;
        Ok(())
    }
}
