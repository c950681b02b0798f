//! Testing utilities including mock collaborators.
//!
//! These drive the chain walker and orchestrator against
//! [`MemoryJobLedger`] without network, browser or filesystem access.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::classify::{KeywordClassifier, ResourceRef};
use crate::config::ClassifierConfig;
use crate::context::{CrawlContext, CrawlSettings};
use crate::error::{FetchError, ResourceError, SinkError};
use crate::fetch::{DocumentFetcher, RenderedDocument};
use crate::identity::WorkerIdentity;
use crate::ledger::{JobId, MemoryJobLedger};
use crate::pacing::Sleeper;
use crate::sink::{artifact_path, ArtifactSink, FetchedResource, ResourceFetcher};

/// Rendered certificate page for `id` in the target category.
pub fn card_html(id: JobId, grade: &str) -> String {
    format!(
        r#"<html><body>
        <p class="text-subtitle1">#{id}</p>
        <dl><dt>Brand/Title</dt><dd>2023 Pokemon Scarlet &amp; Violet</dd>
        <dt>Item Grade</dt><dd>GEM MT {grade}</dd></dl>
        <img itemprop="contentUrl" src="https://img.example.com/cert/{id}/small/front.jpg">
        <img itemprop="contentUrl" src="https://img.example.com/cert/{id}/small/back.jpg">
        </body></html>"#
    )
}

/// Rendered page for `id` outside the target category.
pub fn other_category_html(id: JobId) -> String {
    format!(
        r#"<p class="text-subtitle1">#{id}</p>
        <dd>1952 Topps Baseball</dd>
        <img itemprop="contentUrl" src="https://img.example.com/cert/{id}/front.jpg">
        <img itemprop="contentUrl" src="https://img.example.com/cert/{id}/back.jpg">"#
    )
}

/// Target-category page in an excluded subcategory.
pub fn excluded_html(id: JobId) -> String {
    format!(
        r#"<p class="text-subtitle1">#{id}</p>
        <dd>Pokemon Japanese Promo</dd>
        <img itemprop="contentUrl" src="https://img.example.com/cert/{id}/front.jpg">
        <img itemprop="contentUrl" src="https://img.example.com/cert/{id}/back.jpg">"#
    )
}

/// Target-category page with only one image.
pub fn single_image_html(id: JobId) -> String {
    format!(
        r#"<p class="text-subtitle1">#{id}</p>
        <dd>Pokemon Base Set</dd><dd>NM-MT 8</dd>
        <img itemprop="contentUrl" src="https://img.example.com/cert/{id}/front.jpg">"#
    )
}

#[derive(Debug, Clone)]
enum MockDocument {
    Page(String),
    Fail,
}

/// Mock document fetcher.
///
/// Identifiers without a configured response fail with a 404, which
/// makes "ran off the end of the fixture" visible as an `error` job.
#[derive(Default, Clone)]
pub struct MockDocumentFetcher {
    documents: Arc<RwLock<HashMap<JobId, MockDocument>>>,
    calls: Arc<RwLock<Vec<JobId>>>,
}

impl MockDocumentFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` for `id`.
    pub fn add_page(&self, id: JobId, html: impl Into<String>) {
        self.documents
            .write()
            .unwrap()
            .insert(id, MockDocument::Page(html.into()));
    }

    /// Serve a matching target-category card for every id in `ids`.
    pub fn add_cards(&self, ids: impl IntoIterator<Item = JobId>) {
        for id in ids {
            self.add_page(id, card_html(id, "10"));
        }
    }

    /// Fail every fetch of `id`.
    pub fn add_failure(&self, id: JobId) {
        self.documents.write().unwrap().insert(id, MockDocument::Fail);
    }

    pub fn with_page(self, id: JobId, html: impl Into<String>) -> Self {
        self.add_page(id, html);
        self
    }

    pub fn with_cards(self, ids: impl IntoIterator<Item = JobId>) -> Self {
        self.add_cards(ids);
        self
    }

    pub fn with_failure(self, id: JobId) -> Self {
        self.add_failure(id);
        self
    }

    /// Every id fetched, in call order.
    pub fn calls(&self) -> Vec<JobId> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl DocumentFetcher for MockDocumentFetcher {
    async fn fetch(&self, id: JobId) -> Result<RenderedDocument, FetchError> {
        self.calls.write().unwrap().push(id);

        let document = self.documents.read().unwrap().get(&id).cloned();
        match document {
            Some(MockDocument::Page(html)) => Ok(RenderedDocument::new(
                id,
                format!("https://mock.example.com/cert/{id}"),
                html,
            )),
            Some(MockDocument::Fail) => Err(FetchError::Render {
                id,
                reason: "mock failure".to_string(),
            }),
            None => Err(FetchError::Status { id, status: 404 }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Mock resource fetcher returning the URL's bytes unless told to fail.
#[derive(Default, Clone)]
pub struct MockResourceFetcher {
    failing: Arc<RwLock<HashSet<String>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockResourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail downloads of resources with this name (e.g. `back`).
    pub fn fail_resource(&self, name: impl Into<String>) {
        self.failing.write().unwrap().insert(name.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl ResourceFetcher for MockResourceFetcher {
    async fn fetch(&self, resource: &ResourceRef) -> Result<FetchedResource, ResourceError> {
        self.calls.write().unwrap().push(resource.url.clone());

        if self.failing.read().unwrap().contains(&resource.name) {
            return Err(ResourceError::Status {
                url: resource.url.clone(),
                status: 503,
            });
        }

        Ok(FetchedResource {
            name: resource.name.clone(),
            source_url: resource.url.clone(),
            bytes: resource.url.as_bytes().to_vec(),
        })
    }
}

/// Artifact sink keeping everything in memory, keyed by artifact path.
#[derive(Default, Clone)]
pub struct MemoryArtifactSink {
    artifacts: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.artifacts.read().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.artifacts.read().unwrap().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().unwrap().is_empty()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn store(
        &self,
        id: JobId,
        label: &str,
        resource: &FetchedResource,
    ) -> Result<String, SinkError> {
        let path = artifact_path(id, label, resource);
        self.artifacts
            .write()
            .unwrap()
            .insert(path.clone(), resource.bytes.clone());
        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<(), SinkError> {
        match self.artifacts.write().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(SinkError::Rejected {
                reason: format!("no artifact at {path}"),
            }),
        }
    }
}

/// Sleeper that records requested waits and returns immediately.
#[derive(Default, Clone)]
pub struct RecordingSleeper {
    sleeps: Arc<RwLock<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.read().unwrap().clone()
    }

    /// Number of recorded waits exactly equal to `duration`.
    pub fn count(&self, duration: Duration) -> usize {
        self.sleeps
            .read()
            .unwrap()
            .iter()
            .filter(|d| **d == duration)
            .count()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.write().unwrap().push(duration);
    }
}

/// In-memory crawl fixture: ledger plus every mock collaborator.
///
/// Handles are shared with the contexts built from it, so tests can seed
/// and inspect state while a walker or orchestrator runs.
#[derive(Clone)]
pub struct MockCrawl {
    pub ledger: Arc<MemoryJobLedger>,
    pub fetcher: MockDocumentFetcher,
    pub resources: MockResourceFetcher,
    pub sink: MemoryArtifactSink,
    pub sleeper: RecordingSleeper,
}

impl Default for MockCrawl {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCrawl {
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(MemoryJobLedger::new()))
    }

    /// Fixture over an existing ledger (several workers sharing one).
    pub fn with_ledger(ledger: Arc<MemoryJobLedger>) -> Self {
        Self {
            ledger,
            fetcher: MockDocumentFetcher::new(),
            resources: MockResourceFetcher::new(),
            sink: MemoryArtifactSink::new(),
            sleeper: RecordingSleeper::new(),
        }
    }

    /// Build a context for `identity` using the default keyword classifier.
    pub fn context(&self, identity: WorkerIdentity, settings: CrawlSettings) -> CrawlContext {
        let classifier = KeywordClassifier::new(ClassifierConfig::default())
            .expect("default classifier patterns compile");

        CrawlContext::new(
            self.ledger.clone(),
            Arc::new(self.fetcher.clone()),
            Arc::new(classifier),
            Arc::new(self.resources.clone()),
            Arc::new(self.sink.clone()),
            identity,
            settings,
        )
        .with_sleeper(Arc::new(self.sleeper.clone()))
    }
}
