//! Integration tests for the harvester
//!
//! These tests use wiremock to create mock HTTP servers and run full
//! discovery and scheduling sessions end-to-end.

use corpus_harvester::config::{parse_config, Config};
use corpus_harvester::crawler::{Coordinator, SessionSummary, StopReason};
use corpus_harvester::output::{ProgressEvent, RecordingSink};
use corpus_harvester::storage::{open_storage, SessionStatus, Storage, UrlRecord};
use corpus_harvester::{normalize_url, url_hash, UrlStatus};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fast `[crawler]` settings with `overrides` replacing or adding keys
fn crawler_table(overrides: &[(&str, &str)]) -> String {
    let mut settings = vec![
        ("batch-size", "10"),
        ("num-threads", "4"),
        ("max-duration-secs", "60"),
        ("max-attempts", "3"),
        ("url-timeout-secs", "10"),
        ("batch-timeout-secs", "30"),
        ("grace-timeout-secs", "5"),
        ("empty-poll-limit", "1"),
        ("empty-poll-pause-ms", "0"),
        ("batch-pause-ms", "0"),
    ];
    for &(key, value) in overrides {
        match settings.iter_mut().find(|(k, _)| *k == key) {
            Some(setting) => setting.1 = value,
            None => settings.push((key, value)),
        }
    }
    settings
        .iter()
        .map(|(key, value)| format!("{} = {}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Creates a test configuration for one source on the mock server
///
/// `source` holds extra TOML lines for the source entry.
fn create_test_config(
    base_url: &str,
    dir: &TempDir,
    crawler: &[(&str, &str)],
    source: &str,
) -> Config {
    let toml = format!(
        r#"
[crawler]
{crawler}

[politeness]
request-delay-ms = 0
jitter-ms = 0

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "test@example.com"

[storage]
database-path = "{db}"
output-dir = "{out}"

[extraction]
min-word-count = 5

[[source]]
name = "news"
base-url = "{base_url}"
{source}
"#,
        crawler = crawler_table(crawler),
        db = dir.path().join("state.db").display(),
        out = dir.path().join("corpus").display(),
    );
    parse_config(&toml).unwrap()
}

fn start_urls(base_url: &str, paths: &[&str]) -> String {
    let urls: Vec<String> = paths
        .iter()
        .map(|p| format!("\"{}{}\"", base_url, p))
        .collect();
    format!("start-urls = [{}]", urls.join(", "))
}

fn article(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!(
            "<html><head><title>Noticia</title></head><body>\
             <nav>Inicio Deportes Cultura</nav>\
             <article><p>{}</p></article></body></html>",
            text
        ),
        "text/html",
    )
}

async fn mount_page(server: &MockServer, page: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(response)
        .mount(server)
        .await;
}

fn record(storage: &dyn Storage, base_url: &str, page: &str) -> UrlRecord {
    let url = normalize_url(&format!("{}{}", base_url, page)).unwrap();
    storage
        .get_record(&url_hash(url.as_str()))
        .unwrap()
        .unwrap_or_else(|| panic!("no record for {}", page))
}

struct Harness {
    coordinator: Coordinator,
    storage: Arc<dyn Storage>,
    sink: Arc<RecordingSink>,
    _dir: TempDir,
}

impl Harness {
    fn new(config: Config, dir: TempDir) -> Self {
        let storage: Arc<dyn Storage> =
            Arc::new(open_storage(&dir.path().join("state.db")).unwrap());
        let coordinator = Coordinator::new(config, Arc::clone(&storage)).unwrap();
        Self {
            coordinator,
            storage,
            sink: Arc::new(RecordingSink::default()),
            _dir: dir,
        }
    }

    async fn run(&self, shutdown: watch::Receiver<bool>) -> SessionSummary {
        self.coordinator.recover().await.unwrap();
        self.coordinator.discover().await.unwrap();
        self.coordinator
            .run_session("test-hash", self.sink.clone(), shutdown)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_full_session_classifies_every_url() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .mount(&mock_server)
        .await;

    mount_page(
        &mock_server,
        "/a",
        article("El ayuntamiento aprobó ayer el nuevo presupuesto municipal para el año próximo"),
    )
    .await;
    mount_page(
        &mock_server,
        "/b",
        article("La selección nacional ganó el partido de clasificación con dos goles tardíos"),
    )
    .await;
    // Same text as /a with different spacing
    mount_page(
        &mock_server,
        "/c",
        article("El ayuntamiento   aprobó ayer el nuevo presupuesto\n municipal para el año próximo"),
    )
    .await;
    mount_page(&mock_server, "/missing", ResponseTemplate::new(404)).await;

    // Must never be requested
    Mock::given(method("GET"))
        .and(path("/private/report"))
        .respond_with(article("secreto secreto secreto secreto secreto secreto"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let source = start_urls(&base_url, &["/a", "/b", "/c", "/missing", "/private/report"]);
    let config = create_test_config(&base_url, &dir, &[], &source);
    let harness = Harness::new(config, dir);

    let (_tx, rx) = watch::channel(false);
    let summary = harness.run(rx).await;

    assert_eq!(summary.stop_reason, Some(StopReason::QueueDrained));
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.saved, 2);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.failed_permanent, 1);
    assert_eq!(summary.blocked, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.corpus.files, 2);

    let storage = harness.storage.as_ref();
    let a = record(storage, &base_url, "/a");
    let c = record(storage, &base_url, "/c");
    assert_eq!(a.status, UrlStatus::Completed);
    assert_eq!(c.status, UrlStatus::Completed);
    assert_eq!(a.content_hash, c.content_hash);
    assert_eq!(a.file_path, c.file_path);
    assert_eq!(a.attempts, 1);

    let missing = record(storage, &base_url, "/missing");
    assert_eq!(missing.status, UrlStatus::FailedPermanent);
    assert_eq!(missing.attempts, 1);
    assert!(missing.error_message.unwrap().contains("404"));

    let private = record(storage, &base_url, "/private/report");
    assert_eq!(private.status, UrlStatus::Blocked);

    let stats = storage.progress_stats().unwrap();
    assert_eq!(stats.overall.get(UrlStatus::Processing), 0);
    assert_eq!(stats.overall.get(UrlStatus::Completed), 3);

    let session = storage.latest_session().unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.config_hash, "test-hash");
    assert_eq!(session.totals.saved, 2);
    assert_eq!(session.totals.failed, 2);

    let events = harness.sink.events();
    assert!(matches!(events.first(), Some(ProgressEvent::SessionStarted { pending: 5, .. })));
    assert!(matches!(events.last(), Some(ProgressEvent::SessionFinished { saved: 2, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::BatchCompleted { batch: 1, .. })));
}

#[tokio::test]
async fn test_server_errors_are_retried_up_to_max_attempts() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&base_url, &dir, &[], &start_urls(&base_url, &["/flaky"]));
    let harness = Harness::new(config, dir);

    let (_tx, rx) = watch::channel(false);
    let summary = harness.run(rx).await;

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.stop_reason, Some(StopReason::QueueDrained));

    let flaky = record(harness.storage.as_ref(), &base_url, "/flaky");
    assert_eq!(flaky.status, UrlStatus::Failed);
    assert_eq!(flaky.attempts, 3);
}

#[tokio::test]
async fn test_thin_pages_fail_retryably() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(&mock_server, "/thin", article("Solo tres palabras")).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        &base_url,
        &dir,
        &[("max-attempts", "1")],
        &start_urls(&base_url, &["/thin"]),
    );
    let harness = Harness::new(config, dir);

    let (_tx, rx) = watch::channel(false);
    let summary = harness.run(rx).await;

    assert_eq!(summary.failed, 1);
    let thin = record(harness.storage.as_ref(), &base_url, "/thin");
    assert_eq!(thin.status, UrlStatus::Failed);
    assert_eq!(thin.attempts, 1);
    assert_eq!(summary.corpus.files, 0);
}

#[tokio::test]
async fn test_circuit_breaker_excludes_failing_source() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/gone-1"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone-2"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&mock_server)
        .await;
    for page in ["/later-1", "/later-2"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(article("uno dos tres cuatro cinco seis siete"))
            .expect(0)
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(
        &base_url,
        &dir,
        &[("batch-size", "1"), ("num-threads", "1")],
        &start_urls(&base_url, &["/gone-1", "/gone-2", "/later-1", "/later-2"]),
    );
    config.circuit_breaker.failure_threshold = 2;
    let harness = Harness::new(config, dir);

    let (_tx, rx) = watch::channel(false);
    let summary = harness.run(rx).await;

    assert_eq!(summary.failed_permanent, 2);
    assert_eq!(summary.skipped_unhealthy, 2);
    assert_eq!(summary.saved, 0);
    assert!(!harness.coordinator.breaker().is_source_healthy("news"));

    let later = record(harness.storage.as_ref(), &base_url, "/later-1");
    assert_eq!(later.status, UrlStatus::FailedPermanent);
    assert!(later.error_message.unwrap().contains("news"));

    // A fresh discovery pass gives the source another chance
    harness.coordinator.discover().await.unwrap();
    assert!(harness.coordinator.breaker().is_source_healthy("news"));
}

#[tokio::test]
async fn test_target_documents_ends_session() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    for (page, text) in [
        ("/one", "primera noticia con bastantes palabras para guardar"),
        ("/two", "segunda noticia con bastantes palabras para guardar"),
        ("/three", "tercera noticia con bastantes palabras para guardar"),
    ] {
        mount_page(&mock_server, page, article(text)).await;
    }

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        &base_url,
        &dir,
        &[("batch-size", "1"), ("num-threads", "1"), ("target-documents", "1")],
        &start_urls(&base_url, &["/one", "/two", "/three"]),
    );
    let harness = Harness::new(config, dir);

    let (_tx, rx) = watch::channel(false);
    let summary = harness.run(rx).await;

    assert_eq!(summary.stop_reason, Some(StopReason::TargetReached));
    assert_eq!(summary.saved, 1);

    let stats = harness.storage.progress_stats().unwrap();
    assert_eq!(stats.overall.get(UrlStatus::Pending), 2);
    assert_eq!(stats.by_source["news"].get(UrlStatus::Completed), 1);
}

#[tokio::test]
async fn test_shutdown_before_first_batch_interrupts_session() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(article("uno dos tres cuatro cinco seis"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&base_url, &dir, &[], &start_urls(&base_url, &["/a"]));
    let harness = Harness::new(config, dir);

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let summary = harness.run(rx).await;

    assert_eq!(summary.stop_reason, Some(StopReason::Shutdown));
    assert_eq!(summary.processed, 0);

    let session = harness.storage.latest_session().unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Interrupted);
    assert_eq!(
        record(harness.storage.as_ref(), &base_url, "/a").status,
        UrlStatus::Pending
    );
}

#[tokio::test]
async fn test_sitemap_discovery_is_idempotent() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/sitemap.xml",
        ResponseTemplate::new(200).set_body_raw(
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>{base_url}/sitemap-news.xml</loc></sitemap>
  <sitemap><loc>{base_url}/sitemap-broken.xml</loc></sitemap>
</sitemapindex>"#
            ),
            "application/xml",
        ),
    )
    .await;
    mount_page(
        &mock_server,
        "/sitemap-news.xml",
        ResponseTemplate::new(200).set_body_raw(
            format!(
                r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base_url}/2024/01/a</loc></url>
  <url><loc>{base_url}/2024/01/b#comments</loc></url>
  <url><loc>{base_url}/start</loc></url>
</urlset>"#
            ),
            "application/xml",
        ),
    )
    .await;
    mount_page(&mock_server, "/sitemap-broken.xml", ResponseTemplate::new(500)).await;

    let dir = TempDir::new().unwrap();
    let source = format!(
        "{}\nsitemap-url = \"{}/sitemap.xml\"",
        start_urls(&base_url, &["/start"]),
        base_url
    );
    let config = create_test_config(&base_url, &dir, &[], &source);
    let harness = Harness::new(config, dir);

    let added = harness.coordinator.discover().await.unwrap();
    assert_eq!(added["news"], 3);

    let again = harness.coordinator.discover().await.unwrap();
    assert_eq!(again["news"], 0);

    let stats = harness.storage.progress_stats().unwrap();
    assert_eq!(stats.overall.get(UrlStatus::Pending), 3);
    assert_eq!(
        record(harness.storage.as_ref(), &base_url, "/2024/01/b").status,
        UrlStatus::Pending
    );
}

#[tokio::test]
async fn test_stuck_records_are_recovered_on_startup() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/a",
        article("una noticia recuperada tras un cierre inesperado del proceso"),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("state.db");
    let url = normalize_url(&format!("{}/a", base_url)).unwrap().to_string();

    {
        let storage = open_storage(&db_path).unwrap();
        storage.add_urls(&[url], "news").unwrap();
        assert_eq!(storage.claim_batch(10, 3).unwrap().len(), 1);
        storage.create_session("crashed").unwrap();
    }

    let config = create_test_config(&base_url, &dir, &[], &start_urls(&base_url, &["/a"]));
    let harness = Harness::new(config, dir);

    let recovery = harness.coordinator.recover().await.unwrap();
    assert_eq!(recovery.reset_records, 1);
    assert_eq!(recovery.interrupted_sessions, 1);

    let (_tx, rx) = watch::channel(false);
    let summary = harness.run(rx).await;
    assert_eq!(summary.saved, 1);
    assert_eq!(
        record(harness.storage.as_ref(), &base_url, "/a").status,
        UrlStatus::Completed
    );
}

#[tokio::test]
async fn test_slow_page_hits_url_timeout() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/slow",
        article("una respuesta que llega demasiado tarde para el rastreador")
            .set_delay(Duration::from_secs(3)),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        &base_url,
        &dir,
        &[("url-timeout-secs", "1"), ("max-attempts", "1")],
        &start_urls(&base_url, &["/slow"]),
    );
    let harness = Harness::new(config, dir);

    let (_tx, rx) = watch::channel(false);
    let summary = harness.run(rx).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.saved, 0);

    let slow = record(harness.storage.as_ref(), &base_url, "/slow");
    assert_eq!(slow.status, UrlStatus::Failed);
    assert_eq!(slow.attempts, 1);
    assert!(slow
        .error_message
        .unwrap()
        .starts_with("Request timeout for"));
}

#[tokio::test]
async fn test_batch_deadline_marks_outstanding_failed() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/stalled",
        article("una respuesta que no llega antes del cierre del lote")
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        &base_url,
        &dir,
        &[
            ("batch-timeout-secs", "1"),
            ("url-timeout-secs", "10"),
            ("max-attempts", "1"),
        ],
        &start_urls(&base_url, &["/stalled"]),
    );
    let harness = Harness::new(config, dir);

    let (_tx, rx) = watch::channel(false);
    let summary = harness.run(rx).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.stop_reason, Some(StopReason::QueueDrained));

    let stalled = record(harness.storage.as_ref(), &base_url, "/stalled");
    assert_eq!(stalled.status, UrlStatus::Failed);
    assert_eq!(stalled.attempts, 1);
    assert_eq!(
        stalled.error_message.as_deref(),
        Some("Batch processing timeout")
    );

    let stats = harness.storage.progress_stats().unwrap();
    assert_eq!(stats.overall.get(UrlStatus::Processing), 0);
}

#[tokio::test]
async fn test_absurd_crawl_delay_does_not_stall_first_request() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 1e30\n"),
        )
        .mount(&mock_server)
        .await;
    mount_page(
        &mock_server,
        "/a",
        article("el servidor pide una pausa imposible entre cada una de las peticiones"),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        &base_url,
        &dir,
        &[("num-threads", "1")],
        &start_urls(&base_url, &["/a"]),
    );
    let harness = Harness::new(config, dir);

    let (_tx, rx) = watch::channel(false);
    let summary = harness.run(rx).await;

    assert_eq!(summary.saved, 1);
    assert_eq!(
        record(harness.storage.as_ref(), &base_url, "/a").status,
        UrlStatus::Completed
    );
}
