//! Chain walker scenarios against the in-memory ledger.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use cert_crawler::config::{BreakerConfig, IdBounds};
use cert_crawler::testing::{
    card_html, excluded_html, other_category_html, single_image_html, MockCrawl,
};
use cert_crawler::{
    ChainEnd, ChainWalker, CrawlContext, CrawlSettings, DocumentFetcher, FetchError, JobId,
    JobLedger, JobStatus, KeywordClassifier, MemoryJobLedger, RenderedDocument, SkipReason,
    WorkerIdentity,
};

fn settings() -> CrawlSettings {
    CrawlSettings {
        bounds: IdBounds::new(1, 10_000),
        breaker: BreakerConfig {
            threshold: 3,
            cooldown: Duration::from_secs(600),
        },
        ..CrawlSettings::default()
    }
}

fn walker(crawl: &MockCrawl, settings: CrawlSettings) -> ChainWalker {
    ChainWalker::new(crawl.context(WorkerIdentity::fixed("worker-a", 0), settings))
}

async fn status(crawl: &MockCrawl, id: JobId) -> Option<JobStatus> {
    crawl.ledger.get_status(id).await.unwrap()
}

#[tokio::test]
async fn test_chain_advances_by_one_until_category_changes() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_cards(500..=503);
    crawl.fetcher.add_page(504, other_category_html(504));
    crawl.ledger.insert_if_absent(500).await.unwrap();

    let report = walker(&crawl, settings()).walk(500, false).await.unwrap();

    assert_eq!(report.attempted, vec![500, 501, 502, 503, 504]);
    assert_eq!(report.completed, 4);
    assert_eq!(
        report.end,
        ChainEnd::Skipped {
            id: 504,
            reason: SkipReason::OtherCategory
        }
    );
    for id in 500..=503 {
        assert_eq!(status(&crawl, id).await, Some(JobStatus::Done));
    }
    assert_eq!(status(&crawl, 504).await, Some(JobStatus::Skipped));
    assert_eq!(status(&crawl, 505).await, None);
}

#[tokio::test]
async fn test_next_id_without_row_is_reserved_directly() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_cards([500, 501]);
    crawl.ledger.insert_if_absent(500).await.unwrap();

    walker(&crawl, settings()).walk(500, false).await.unwrap();

    let job = crawl.ledger.get(501).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.owner.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn test_identity_mismatch_marks_stale_and_stops() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_cards([500]);
    // Renderer served the previous certificate again
    crawl.fetcher.add_page(501, card_html(500, "10"));
    crawl.fetcher.add_cards([502]);
    crawl.ledger.insert_if_absent(500).await.unwrap();

    let report = walker(&crawl, settings()).walk(500, false).await.unwrap();

    assert_eq!(report.end, ChainEnd::Stale(501));
    assert_eq!(report.last_attempted(), Some(501));
    assert_eq!(status(&crawl, 501).await, Some(JobStatus::Stale));
    assert_eq!(status(&crawl, 502).await, None);
}

#[tokio::test]
async fn test_excluded_subcategory_is_skipped() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_page(500, excluded_html(500));
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let report = walker(&crawl, settings()).walk(500, true).await.unwrap();

    assert_eq!(
        report.end,
        ChainEnd::Skipped {
            id: 500,
            reason: SkipReason::ExcludedSubcategory
        }
    );
    assert_eq!(report.completed, 0);
    assert!(crawl.sink.is_empty());
}

#[tokio::test]
async fn test_incomplete_resources_are_skipped() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_page(500, single_image_html(500));
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let report = walker(&crawl, settings()).walk(500, true).await.unwrap();

    assert_eq!(
        report.end,
        ChainEnd::Skipped {
            id: 500,
            reason: SkipReason::IncompleteResources {
                found: 1,
                required: 2
            }
        }
    );
    assert_eq!(status(&crawl, 500).await, Some(JobStatus::Skipped));
}

#[tokio::test]
async fn test_artifacts_are_stored_under_grade() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_page(500, card_html(500, "9"));
    crawl.fetcher.add_page(501, other_category_html(501));
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let report = walker(&crawl, settings()).walk(500, true).await.unwrap();

    assert_eq!(report.artifacts, 2);
    assert_eq!(
        crawl.sink.paths(),
        vec!["9/500_back.jpg".to_string(), "9/500_front.jpg".to_string()]
    );
    assert_eq!(
        crawl.resources.calls(),
        vec![
            "https://img.example.com/cert/500/large/front.jpg".to_string(),
            "https://img.example.com/cert/500/large/back.jpg".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_failed_resource_still_completes_job() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_cards([500]);
    crawl.fetcher.add_page(501, other_category_html(501));
    crawl.resources.fail_resource("back");
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let report = walker(&crawl, settings()).walk(500, true).await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.artifacts, 1);
    assert_eq!(status(&crawl, 500).await, Some(JobStatus::Done));
    assert_eq!(crawl.sink.paths(), vec!["10/500_front.jpg".to_string()]);
}

#[tokio::test]
async fn test_handled_id_switches_to_queue() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_cards([500, 900]);
    crawl.fetcher.add_page(901, other_category_html(901));
    crawl.ledger.seed(501, JobStatus::Done);
    crawl.ledger.seed(900, JobStatus::Pending);
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let report = walker(&crawl, settings()).walk(500, true).await.unwrap();

    assert_eq!(report.attempted, vec![500, 900, 901]);
    assert_eq!(report.completed, 2);
    assert!(!crawl.fetcher.calls().contains(&501));
    assert_eq!(status(&crawl, 501).await, Some(JobStatus::Done));
}

#[tokio::test]
async fn test_pending_row_met_while_advancing_is_claimed() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_cards([500, 501]);
    crawl.fetcher.add_page(502, other_category_html(502));
    crawl.ledger.seed(501, JobStatus::Pending);
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let report = walker(&crawl, settings()).walk(500, true).await.unwrap();

    assert_eq!(report.attempted, vec![500, 501, 502]);
    let job = crawl.ledger.get(501).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.owner.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn test_chain_stops_at_upper_bound() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_cards(499..=502);
    crawl.ledger.reserve(500, "worker-a").await.unwrap();
    let settings = CrawlSettings {
        bounds: IdBounds::new(100, 501),
        ..settings()
    };

    let report = walker(&crawl, settings).walk(500, true).await.unwrap();

    assert_eq!(report.end, ChainEnd::OutOfBounds(502));
    assert_eq!(report.completed, 2);
    assert_eq!(status(&crawl, 502).await, None);
}

#[tokio::test]
async fn test_fetch_failure_marks_error_and_ends_on_empty_queue() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_failure(500);
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let mut walker = walker(&crawl, settings());
    let report = walker.walk(500, true).await.unwrap();

    assert_eq!(report.end, ChainEnd::QueueEmpty);
    assert_eq!(report.completed, 0);
    assert_eq!(status(&crawl, 500).await, Some(JobStatus::Error));
    assert_eq!(walker.breaker().consecutive_failures(), 1);
    assert!(crawl.sleeper.sleeps().is_empty());
}

#[tokio::test]
async fn test_breaker_cools_down_after_threshold_then_resets() {
    let crawl = MockCrawl::new();
    for id in [500, 600, 700] {
        crawl.fetcher.add_failure(id);
    }
    crawl.ledger.seed(600, JobStatus::Pending);
    crawl.ledger.seed(700, JobStatus::Pending);
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let mut walker = walker(&crawl, settings());
    let report = walker.walk(500, true).await.unwrap();

    assert_eq!(report.attempted, vec![500, 600, 700]);
    assert_eq!(report.end, ChainEnd::QueueEmpty);
    assert_eq!(crawl.sleeper.sleeps(), vec![Duration::from_secs(600)]);
    assert_eq!(walker.breaker().consecutive_failures(), 0);
    for id in [500, 600, 700] {
        assert_eq!(status(&crawl, id).await, Some(JobStatus::Error));
    }
}

#[tokio::test]
async fn test_breaker_counts_across_chains() {
    let crawl = MockCrawl::new();
    for id in [500, 600, 700] {
        crawl.fetcher.add_failure(id);
        crawl.ledger.reserve(id, "worker-a").await.unwrap();
    }

    let mut walker = walker(&crawl, settings());
    for id in [500, 600] {
        walker.walk(id, true).await.unwrap();
    }
    assert!(crawl.sleeper.sleeps().is_empty());

    walker.walk(700, true).await.unwrap();
    assert_eq!(crawl.sleeper.sleeps(), vec![Duration::from_secs(600)]);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let crawl = MockCrawl::new();
    crawl.fetcher.add_failure(500);
    crawl.fetcher.add_cards([600]);
    crawl.ledger.seed(600, JobStatus::Pending);
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let mut walker = walker(&crawl, settings());
    let report = walker.walk(500, true).await.unwrap();

    // 500 fails, 600 succeeds, 601 has no page and fails
    assert_eq!(report.attempted, vec![500, 600, 601]);
    assert_eq!(walker.breaker().consecutive_failures(), 1);
    assert!(crawl.sleeper.sleeps().is_empty());
}

/// Fetcher that never answers within the walker's timeout.
struct HangingFetcher;

#[async_trait]
impl DocumentFetcher for HangingFetcher {
    async fn fetch(&self, id: JobId) -> Result<RenderedDocument, FetchError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(RenderedDocument::new(id, "https://mock.example.com", card_html(id, "10")))
    }
}

#[tokio::test]
async fn test_hung_fetch_is_bounded_by_timeout() {
    let crawl = MockCrawl::new();
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let ctx = CrawlContext::new(
        crawl.ledger.clone(),
        Arc::new(HangingFetcher),
        Arc::new(KeywordClassifier::new(Default::default()).unwrap()),
        Arc::new(crawl.resources.clone()),
        Arc::new(crawl.sink.clone()),
        WorkerIdentity::fixed("worker-a", 0),
        CrawlSettings {
            fetch_timeout: Duration::from_millis(50),
            ..settings()
        },
    )
    .with_sleeper(Arc::new(crawl.sleeper.clone()));

    let report = ChainWalker::new(ctx).walk(500, true).await.unwrap();

    assert_eq!(report.end, ChainEnd::QueueEmpty);
    assert_eq!(status(&crawl, 500).await, Some(JobStatus::Error));
}

/// Finishes its job in the ledger while the document is in flight, as an
/// operator or another path would.
struct InterferingFetcher {
    ledger: Arc<MemoryJobLedger>,
    target: JobId,
}

#[async_trait]
impl DocumentFetcher for InterferingFetcher {
    async fn fetch(&self, id: JobId) -> Result<RenderedDocument, FetchError> {
        let html = if id == self.target {
            self.ledger.set_status(id, JobStatus::Error).await.unwrap();
            card_html(id, "10")
        } else {
            other_category_html(id)
        };
        Ok(RenderedDocument::new(id, "https://mock.example.com", html))
    }
}

#[tokio::test]
async fn test_job_finished_elsewhere_is_not_counted_done() {
    let crawl = MockCrawl::new();
    crawl.ledger.reserve(500, "worker-a").await.unwrap();

    let fetcher = InterferingFetcher {
        ledger: crawl.ledger.clone(),
        target: 500,
    };
    let ctx = CrawlContext::new(
        crawl.ledger.clone(),
        Arc::new(fetcher),
        Arc::new(KeywordClassifier::new(Default::default()).unwrap()),
        Arc::new(crawl.resources.clone()),
        Arc::new(crawl.sink.clone()),
        WorkerIdentity::fixed("worker-a", 0),
        settings(),
    )
    .with_sleeper(Arc::new(crawl.sleeper.clone()));

    let report = ChainWalker::new(ctx).walk(500, true).await.unwrap();

    assert_eq!(report.completed, 0);
    assert_eq!(report.attempted, vec![500, 501]);
    assert_eq!(
        report.end,
        ChainEnd::Skipped {
            id: 501,
            reason: SkipReason::OtherCategory
        }
    );
    assert_eq!(status(&crawl, 500).await, Some(JobStatus::Error));
}
