use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alpen_scraper::config::Config;
use alpen_scraper::error::{Result as ScraperResult, ScraperError};
use alpen_scraper::fetcher::PageSource;
use alpen_scraper::orchestrator::EventCrawler;
use alpen_scraper::storage::{InMemoryStorage, Storage};
use alpen_scraper::types::{EventCategory, EventOccurrence, PriceInfo};

const LISTING_URL: &str = "https://alpen.test/veranstaltungen";

/// Canned-page stand-in for the network, with an optional set of URLs that
/// fail exactly once before succeeding.
struct StubSource {
    pages: HashMap<String, String>,
    flaky: Vec<String>,
    dead_probes: Vec<String>,
    hits: std::sync::Mutex<HashMap<String, usize>>,
    fetch_count: AtomicUsize,
}

impl StubSource {
    fn new(pages: Vec<(&str, String)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(url, html)| (url.to_string(), html))
                .collect(),
            flaky: Vec::new(),
            dead_probes: Vec::new(),
            hits: std::sync::Mutex::new(HashMap::new()),
            fetch_count: AtomicUsize::new(0),
        }
    }

    fn with_flaky(mut self, url: &str) -> Self {
        self.flaky.push(url.to_string());
        self
    }

    fn with_dead_probe(mut self, url: &str) -> Self {
        self.dead_probes.push(url.to_string());
        self
    }
}

#[async_trait]
impl PageSource for StubSource {
    async fn fetch(&self, url: &str) -> ScraperResult<String> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let previous = {
            let mut hits = self.hits.lock().unwrap();
            let entry = hits.entry(url.to_string()).or_insert(0);
            *entry += 1;
            *entry - 1
        };
        if self.flaky.iter().any(|f| f == url) && previous == 0 {
            return Err(ScraperError::HttpStatus {
                status: 503,
                url: url.to_string(),
            });
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| ScraperError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
    }

    async fn probe(&self, url: &str) -> bool {
        !self.dead_probes.iter().any(|d| d == url)
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.source.listing_url = LISTING_URL.to_string();
    config.source.page_param = "?page=".to_string();
    config.source.placeholder_image_url = "https://alpen.test/static/placeholder.jpg".to_string();
    config.crawl.batch_stagger_ms = 0;
    config.crawl.page_pause_ms = 0;
    config
}

fn crawler(source: StubSource, storage: Arc<InMemoryStorage>) -> EventCrawler {
    EventCrawler::new(Arc::new(source), storage, test_config())
}

/// German-formatted date safely in the future of whenever the test runs.
fn future_date(days: i64) -> (String, chrono::DateTime<Utc>) {
    let date = Utc::now() + Duration::days(days);
    (date.format("%d.%m.%Y").to_string(), date)
}

fn market_pages() -> Vec<(&'static str, String)> {
    let (date_de, _) = future_date(60);
    let listing = format!(
        r#"<html><body>
        <div class="event-item">
            <a href="/veranstaltung/weihnachtsmarkt">Alpine Weihnachtsmarkt, {date_de}</a>
        </div>
        </body></html>"#
    );
    let detail = format!(
        r#"<html><head>
        <meta property="og:image" content="https://cdn.alpen.test/markt.jpg">
        <meta name="description" content="Stände, Glühwein und Handwerk im Ortskern.">
        </head><body>
        <h1>Alpine Weihnachtsmarkt</h1>
        <p>Am {date_de} ab 16 Uhr. Eintritt frei. Parkgebühr 5 €.</p>
        </body></html>"#
    );
    vec![
        (LISTING_URL, listing),
        ("https://alpen.test/veranstaltung/weihnachtsmarkt", detail),
    ]
}

#[tokio::test]
async fn christmas_market_page_yields_full_record() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let saved = crawler(StubSource::new(market_pages()), storage.clone())
        .run(Some(1))
        .await?;

    assert_eq!(saved.len(), 1);
    let event = &saved[0];
    assert_eq!(event.name, "Alpine Weihnachtsmarkt");
    assert_eq!(event.category, EventCategory::Market);
    assert!(event.price_info.is_free);
    assert_eq!(event.price_info.amount, Some(0.0));
    assert_eq!(event.image_url, "https://cdn.alpen.test/markt.jpg");
    let (_, expected) = future_date(60);
    assert_eq!(event.start_date.date_naive(), expected.date_naive());
    Ok(())
}

#[tokio::test]
async fn two_runs_are_idempotent() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());

    let first = crawler(StubSource::new(market_pages()), storage.clone())
        .run(Some(1))
        .await?;
    let count_after_first = storage.count().await?;

    let second = crawler(StubSource::new(market_pages()), storage.clone())
        .run(Some(1))
        .await?;

    assert_eq!(storage.count().await?, count_after_first);
    let first_ids: Vec<_> = first.iter().map(|e| e.external_id.clone()).collect();
    let second_ids: Vec<_> = second.iter().map(|e| e.external_id.clone()).collect();
    assert_eq!(first_ids, second_ids);
    Ok(())
}

#[tokio::test]
async fn multi_date_event_explodes_into_occurrences() -> Result<()> {
    let base = Utc::now() + Duration::days(30);
    let times: String = (0..3)
        .map(|offset| {
            let day = base + Duration::days(offset);
            format!(
                r#"<time datetime="{}">Tag {}</time>"#,
                day.format("%Y-%m-%dT10:00"),
                offset + 1
            )
        })
        .collect();
    let listing = r#"<html><body>
        <a href="/veranstaltung/bergfest">Bergfest</a>
        </body></html>"#
        .to_string();
    let detail = format!(
        r#"<html><body><h1>Bergfest</h1>{times}<p>Drei Tage Programm.</p></body></html>"#
    );

    let storage = Arc::new(InMemoryStorage::new());
    let source = StubSource::new(vec![
        (LISTING_URL, listing),
        ("https://alpen.test/veranstaltung/bergfest", detail),
    ]);
    let saved = crawler(source, storage.clone()).run(Some(1)).await?;

    assert_eq!(saved.len(), 3);
    let ids: std::collections::HashSet<_> = saved.iter().map(|e| e.external_id.clone()).collect();
    assert_eq!(ids.len(), 3);
    assert!(saved
        .iter()
        .all(|e| e.source_url == "https://alpen.test/veranstaltung/bergfest"));
    assert!(saved
        .iter()
        .all(|e| e.external_id.contains('_')));
    Ok(())
}

#[tokio::test]
async fn all_saved_records_respect_grace_window() -> Result<()> {
    // The detail page carries a stale leftover date next to the real one;
    // only the future occurrence may survive.
    let (future_de, _) = future_date(14);
    let listing = r#"<a href="/veranstaltung/konzert">Kirchenkonzert</a>"#.to_string();
    let detail = format!(
        r#"<html><body><h1>Kirchenkonzert</h1>
        <p>Nächster Termin: {future_de} um 19:30 Uhr</p>
        <p>Rückblick: 24.12.2019</p>
        </body></html>"#
    );

    let storage = Arc::new(InMemoryStorage::new());
    let source = StubSource::new(vec![
        (LISTING_URL, listing),
        ("https://alpen.test/veranstaltung/konzert", detail),
    ]);
    let saved = crawler(source, storage).run(Some(1)).await?;

    let grace_cutoff = Utc::now() - Duration::days(Config::default().crawl.grace_window_days);
    assert_eq!(saved.len(), 1);
    assert!(saved.iter().all(|e| e.start_date >= grace_cutoff));
    Ok(())
}

#[tokio::test]
async fn listing_date_is_fallback_when_detail_has_none() -> Result<()> {
    // "25.12." without a year must resolve to a December 25 and survive even
    // though the detail page offers no parseable date at all.
    let listing = r#"<div class="event-item">
        <a href="/veranstaltung/mette">Bergweihnacht, 25.12.</a>
        </div>"#
        .to_string();
    let detail = r#"<html><body><h1>Bergweihnacht</h1>
        <p>Besinnliche Stunde in der Kapelle.</p></body></html>"#
        .to_string();

    let storage = Arc::new(InMemoryStorage::new());
    let source = StubSource::new(vec![
        (LISTING_URL, listing),
        ("https://alpen.test/veranstaltung/mette", detail),
    ]);
    let saved = crawler(source, storage).run(Some(1)).await?;

    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].name, "Bergweihnacht");
    assert_eq!(saved[0].start_date.month(), 12);
    assert_eq!(saved[0].start_date.day(), 25);
    assert!(saved[0].start_date.year() >= Utc::now().year());
    Ok(())
}

#[tokio::test]
async fn page_one_failure_is_fatal() {
    let storage = Arc::new(InMemoryStorage::new());
    let source = StubSource::new(vec![]); // nothing resolvable at all
    let error = crawler(source, storage).run(Some(1)).await.unwrap_err();
    assert!(matches!(error, ScraperError::Connectivity(_)));
}

#[tokio::test]
async fn failed_link_is_retried_once_and_recovered() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let source = StubSource::new(market_pages())
        .with_flaky("https://alpen.test/veranstaltung/weihnachtsmarkt");
    let saved = crawler(source, storage).run(Some(1)).await?;
    assert_eq!(saved.len(), 1);
    Ok(())
}

#[tokio::test]
async fn reaper_runs_before_fetching_and_spares_featured() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let stale = Utc::now() - Duration::days(30);

    let make = |id: &str, featured: bool| EventOccurrence {
        external_id: id.to_string(),
        name: "Altes Fest".to_string(),
        description: None,
        location: None,
        address: None,
        latitude: None,
        longitude: None,
        start_date: stale,
        end_date: None,
        image_url: "https://alpen.test/bild.jpg".to_string(),
        source_url: "https://alpen.test/veranstaltung/alt".to_string(),
        category: EventCategory::General,
        price_info: PriceInfo::default(),
        contact_info: None,
        is_featured: featured,
        is_active: true,
    };
    storage.upsert_by_external_id(&make("old_plain", false)).await?;
    storage.upsert_by_external_id(&make("old_featured", true)).await?;

    crawler(StubSource::new(market_pages()), storage.clone())
        .run(Some(1))
        .await?;

    assert!(storage.get_by_external_id("old_plain").await?.is_none());
    assert!(storage.get_by_external_id("old_featured").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn empty_listing_page_stops_pagination_early() -> Result<()> {
    // Pagination claims three pages, but page two has no events; page three
    // must never be fetched.
    let (date_de, _) = future_date(10);
    let page1 = format!(
        r#"<html><body>
        <div class="pagination"><a href="?page=3">3</a></div>
        <div class="event-item"><a href="/veranstaltung/fest">Dorffest, {date_de}</a></div>
        </body></html>"#
    );
    let detail = format!(
        r#"<html><body><h1>Dorffest</h1><p>Am {date_de}.</p></body></html>"#
    );
    let page2 = "<html><body><p>Keine Veranstaltungen</p></body></html>".to_string();

    let storage = Arc::new(InMemoryStorage::new());
    let source = Arc::new(StubSource::new(vec![
        (LISTING_URL, page1),
        ("https://alpen.test/veranstaltung/fest", detail),
        ("https://alpen.test/veranstaltungen?page=2", page2),
    ]));
    let crawler = EventCrawler::new(source.clone(), storage, test_config());
    let saved = crawler.run(Some(5)).await?;
    assert_eq!(saved.len(), 1);

    // Exactly page 1, one detail page, and page 2; page 3 stays untouched.
    assert_eq!(source.fetch_count.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn dead_image_is_replaced_when_validation_is_on() -> Result<()> {
    let mut config = test_config();
    config.fetcher.validate_images = true;

    let storage = Arc::new(InMemoryStorage::new());
    let source = StubSource::new(market_pages())
        .with_dead_probe("https://cdn.alpen.test/markt.jpg");
    let crawler = EventCrawler::new(Arc::new(source), storage, config);
    let saved = crawler.run(Some(1)).await?;

    // The og:image 404s on HEAD and the page has no other candidate.
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].image_url, "https://alpen.test/static/placeholder.jpg");
    Ok(())
}

#[tokio::test]
async fn connectivity_check_does_not_extract() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let ok = crawler(StubSource::new(market_pages()), storage.clone())
        .test_connectivity()
        .await;
    assert!(ok);
    assert_eq!(storage.count().await?, 0);

    let gone = crawler(StubSource::new(vec![]), Arc::new(InMemoryStorage::new()))
        .test_connectivity()
        .await;
    assert!(!gone);
    Ok(())
}
