//! Fetch collaborator: turns an identifier into a rendered document.
//!
//! Browser automation lives outside this crate. [`HttpDocumentFetcher`]
//! talks to whatever serves the rendered page (the site itself or a
//! rendering proxy) through `DOCUMENT_URL_TEMPLATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::ledger::JobId;

/// A fetched, fully rendered document.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    /// Identifier the document was requested for
    pub id: JobId,
    pub url: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

impl RenderedDocument {
    pub fn new(id: JobId, url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            html: html.into(),
            fetched_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch and render the document for `id`.
    async fn fetch(&self, id: JobId) -> Result<RenderedDocument, FetchError>;

    /// Whether `document` actually shows identifier `id`.
    ///
    /// A document for a different identifier (or a half-rendered page) means
    /// the fetch path itself is misbehaving.
    fn is_document_for(&self, document: &RenderedDocument, id: JobId) -> bool {
        document_shows_id(&document.html, id)
    }

    fn name(&self) -> &str {
        "unknown"
    }
}

/// True when some element's entire text is `#<id>`.
pub fn document_shows_id(html: &str, id: JobId) -> bool {
    let marker = format!("#{id}");
    html.split('>')
        .filter_map(|chunk| chunk.split_once('<').map(|(text, _)| text))
        .any(|text| text.trim() == marker)
}

/// Fetches documents over HTTP.
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpDocumentFetcher {
    pub fn new(config: FetchConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, id: JobId) -> Result<RenderedDocument, FetchError> {
        let url = self.config.url_for(id);
        debug!(job_id = id, url = %url, "fetching document");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { id }
            } else {
                FetchError::Http {
                    id,
                    source: Box::new(e),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(job_id = id, status = status.as_u16(), "document fetch rejected");
            return Err(FetchError::Status {
                id,
                status: status.as_u16(),
            });
        }

        let html = response.text().await.map_err(|e| FetchError::Http {
            id,
            source: Box::new(e),
        })?;

        if html.trim().is_empty() {
            return Err(FetchError::Render {
                id,
                reason: "empty document".to_string(),
            });
        }

        Ok(RenderedDocument::new(id, url, html))
    }

    fn name(&self) -> &str {
        "http"
    }
}
