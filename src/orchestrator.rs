use crate::assembler::EventAssembler;
use crate::config::Config;
use crate::discovery::{detect_total_pages, discover_event_links, EventLink};
use crate::error::{Result, ScraperError};
use crate::extractors::ExtractorSet;
use crate::fetcher::PageSource;
use crate::storage::Storage;
use crate::types::EventOccurrence;
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Crawl state machine. Transitions are linear; the enum exists so logs and
/// diagnostics can always say where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Cleaning,
    Paginating,
    ProcessingPage(usize),
    Retrying,
    Saving,
}

/// Drives one crawl: reap stale records, walk the listing pages, process
/// links in small concurrent batches, retry failures once, persist.
pub struct EventCrawler {
    fetcher: Arc<dyn PageSource>,
    storage: Arc<dyn Storage>,
    extractors: ExtractorSet,
    assembler: EventAssembler,
    config: Config,
    cancelled: Arc<AtomicBool>,
}

impl EventCrawler {
    pub fn new(fetcher: Arc<dyn PageSource>, storage: Arc<dyn Storage>, config: Config) -> Self {
        let extractors = ExtractorSet::new(&config);
        let assembler = EventAssembler::new(&config.crawl, &config.source.placeholder_image_url);
        Self {
            fetcher,
            storage,
            extractors,
            assembler,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cooperative cancellation. Only consulted at batch
    /// boundaries; in-flight requests run to completion.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn transition(&self, state: CrawlState) {
        debug!("Crawl state -> {:?}", state);
    }

    /// Run a full crawl. Returns the records that were saved in this run.
    #[instrument(skip(self))]
    pub async fn run(&self, max_pages: Option<usize>) -> Result<Vec<EventOccurrence>> {
        let started = std::time::Instant::now();
        info!("🚀 Starting event crawl");

        // Cleaning: reap stale non-featured records before fetching anything.
        self.transition(CrawlState::Cleaning);
        let retention_cutoff = Utc::now() - ChronoDuration::days(self.config.crawl.retention_days);
        match self.storage.delete_older_than(retention_cutoff, true).await {
            Ok(deleted) => info!("🧹 Reaper deleted {} stale events", deleted),
            Err(e) => warn!("Reaper failed, continuing crawl: {}", e),
        }

        // Paginating: page one is mandatory; without it the run is dead.
        self.transition(CrawlState::Paginating);
        let listing_url = self.config.source.listing_url.clone();
        let first_page = self.fetcher.fetch(&listing_url).await.map_err(|e| {
            ScraperError::Connectivity(format!("listing root {listing_url}: {e}"))
        })?;

        let configured_max = max_pages.unwrap_or(self.config.crawl.default_max_pages);
        let pagination = detect_total_pages(&first_page, self.config.crawl.default_max_pages);
        let total_pages = pagination.total_pages.min(configured_max).max(1);
        info!(
            "📄 Pagination: detected {} page(s), crawling up to {}",
            pagination.total_pages, total_pages
        );

        // Page loop with per-link failure isolation.
        let mut assembled: HashMap<String, EventOccurrence> = HashMap::new();
        let mut failed_links: Vec<EventLink> = Vec::new();

        'pages: for page in 1..=total_pages {
            if self.cancelled.load(Ordering::Relaxed) {
                info!("Crawl cancelled before page {}", page);
                break;
            }
            self.transition(CrawlState::ProcessingPage(page));

            let page_html = if page == 1 {
                first_page.clone()
            } else {
                let page_url = self.page_url(page);
                match self.fetcher.fetch(&page_url).await {
                    Ok(html) => html,
                    Err(e) => {
                        // Only page one is load-bearing; later pages are skippable.
                        warn!("Skipping page {}: {}", page, e);
                        continue;
                    }
                }
            };

            let links = discover_event_links(&page_html, &listing_url);
            info!("Page {}: {} candidate link(s)", page, links.len());

            let mut page_event_count = 0usize;
            for batch in links.chunks(self.config.crawl.batch_size.max(1)) {
                if self.cancelled.load(Ordering::Relaxed) {
                    info!("Crawl cancelled mid-page {}", page);
                    break 'pages;
                }
                let outcomes = self.process_batch(batch).await;
                for (link, outcome) in batch.iter().zip(outcomes) {
                    match outcome {
                        Ok(occurrences) => {
                            page_event_count += occurrences.len();
                            for occurrence in occurrences {
                                assembled.insert(occurrence.external_id.clone(), occurrence);
                            }
                        }
                        Err(e) => {
                            warn!("Link {} failed, queued for retry: {}", link.url, e);
                            failed_links.push(link.clone());
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(self.config.crawl.page_pause_ms)).await;
            }

            // Empty pages end the loop early no matter what the pagination
            // markers claimed; miscounted paginators are common.
            if page_event_count == 0 {
                info!("Page {} yielded no events, stopping pagination", page);
                break;
            }
        }

        // Retrying: one extra chance per failed link, then drop.
        self.transition(CrawlState::Retrying);
        if !failed_links.is_empty() {
            info!("🔁 Retrying {} failed link(s)", failed_links.len());
            for batch in failed_links.chunks(self.config.crawl.batch_size.max(1)) {
                if self.cancelled.load(Ordering::Relaxed) {
                    break;
                }
                let outcomes = self.process_batch(batch).await;
                for (link, outcome) in batch.iter().zip(outcomes) {
                    match outcome {
                        Ok(occurrences) => {
                            for occurrence in occurrences {
                                assembled.insert(occurrence.external_id.clone(), occurrence);
                            }
                        }
                        Err(e) => {
                            warn!("Dropping link for this run: {} ({})", link.url, e);
                        }
                    }
                }
            }
        }

        // Saving: partial success is fine; the next run self-heals.
        self.transition(CrawlState::Saving);
        let mut saved = Vec::with_capacity(assembled.len());
        for occurrence in assembled.into_values() {
            match self.storage.upsert_by_external_id(&occurrence).await {
                Ok(_) => saved.push(occurrence),
                Err(e) => warn!("Failed to save {}: {}", occurrence.external_id, e),
            }
        }
        saved.sort_by(|a, b| a.start_date.cmp(&b.start_date));

        self.transition(CrawlState::Idle);
        info!(
            "✅ Crawl finished: {} occurrence(s) saved in {:.1}s",
            saved.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(saved)
    }

    /// Stale-record deletion as an independent entry point.
    pub async fn cleanup(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64> {
        self.storage.delete_older_than(cutoff, true).await
    }

    /// Health check for operators and CI; never touches extraction.
    pub async fn test_connectivity(&self) -> bool {
        self.fetcher
            .fetch(&self.config.source.listing_url)
            .await
            .is_ok()
    }

    /// Process one batch of links concurrently, each member with a staggered
    /// start so the batch does not fire as one burst.
    async fn process_batch(&self, batch: &[EventLink]) -> Vec<Result<Vec<EventOccurrence>>> {
        let futures = batch.iter().enumerate().map(|(index, link)| {
            let stagger = Duration::from_millis(self.config.crawl.batch_stagger_ms * index as u64);
            async move {
                tokio::time::sleep(stagger).await;
                self.process_link(link).await
            }
        });
        join_all(futures).await
    }

    /// Fetch and extract one detail page, merge with the listing-card
    /// fallback, and assemble occurrences.
    async fn process_link(&self, link: &EventLink) -> Result<Vec<EventOccurrence>> {
        let now = Utc::now().naive_utc();
        let listing_fields = self.extractors.extract_listing_card(link, now);

        let detail_html = self.fetcher.fetch(&link.url).await?;
        let mut detail_fields = self.extractors.extract_detail_page(&detail_html, &link.url, now);
        if self.config.fetcher.validate_images {
            detail_fields.image_url = Some(
                self.extractors
                    .image()
                    .select_validated(&detail_html, &link.url, self.fetcher.as_ref())
                    .await,
            );
        }

        self.assembler
            .assemble(&listing_fields, &detail_fields, &link.url, now)
    }

    fn page_url(&self, page: usize) -> String {
        format!(
            "{}{}{}",
            self.config.source.listing_url, self.config.source.page_param, page
        )
    }
}
