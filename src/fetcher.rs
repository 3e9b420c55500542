use crate::config::FetcherConfig;
use crate::error::{Result, ScraperError};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Seam between the orchestrator and the network.
/// Production wires in `PoliteFetcher`; tests substitute canned pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch a page body, honoring politeness and retry rules.
    async fn fetch(&self, url: &str) -> Result<String>;

    /// Lightweight existence probe (HEAD), used for image validation.
    /// Failures are reported as `false`, never as errors.
    async fn probe(&self, url: &str) -> bool;
}

/// Unified retry/backoff rules shared by every fetch call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_ceiling_ms: u64,
    pub rate_limit_backoff_secs: u64,
}

impl RetryPolicy {
    /// Exponential backoff for attempt N (1-based), capped at the ceiling.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
        Duration::from_millis(exp.min(self.backoff_ceiling_ms))
    }

    fn rate_limit_backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs * u64::from(attempt))
    }
}

struct CacheEntry {
    body: String,
    fetched_at: Instant,
}

/// Politeness-aware HTTP client. All outbound requests, listing and detail
/// pages alike, share one "time of last request" clock so the total request
/// rate stays bounded no matter how many links a batch processes.
pub struct PoliteFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    delay_min_ms: u64,
    delay_max_ms: u64,
    last_request: Mutex<Option<Instant>>,
    cache: Option<Mutex<HashMap<String, CacheEntry>>>,
    cache_ttl: Duration,
}

impl PoliteFetcher {
    pub fn new(config: &FetcherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("Mozilla/5.0 (compatible; event-calendar-sync)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            policy: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                backoff_base_ms: config.backoff_base_ms,
                backoff_ceiling_ms: config.backoff_ceiling_ms,
                rate_limit_backoff_secs: config.rate_limit_backoff_secs,
            },
            delay_min_ms: config.delay_min_ms,
            delay_max_ms: config.delay_max_ms.max(config.delay_min_ms),
            last_request: Mutex::new(None),
            cache: config.cache_enabled.then(|| Mutex::new(HashMap::new())),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
        }
    }

    /// Wait out the randomized politeness window since the previous request.
    /// Randomized rather than fixed so the interval does not fingerprint us.
    async fn polite_wait(&self) {
        let jitter_ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.delay_min_ms..=self.delay_max_ms)
        };
        let wanted = Duration::from_millis(jitter_ms);

        // Another task may stamp the clock while we sleep, so re-check the
        // window after every wake until it is actually satisfied.
        let mut last = self.last_request.lock().await;
        loop {
            let remaining = match *last {
                Some(previous) => wanted.saturating_sub(previous.elapsed()),
                None => Duration::ZERO,
            };
            if remaining.is_zero() {
                break;
            }
            drop(last);
            tokio::time::sleep(remaining).await;
            last = self.last_request.lock().await;
        }
        *last = Some(Instant::now());
    }

    async fn cache_get(&self, url: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock().await;
        match cache.get(url) {
            Some(entry) if entry.fetched_at.elapsed() < self.cache_ttl => {
                debug!("Cache hit for {}", url);
                Some(entry.body.clone())
            }
            Some(_) => {
                cache.remove(url);
                None
            }
            None => None,
        }
    }

    async fn cache_put(&self, url: &str, body: &str) {
        if let Some(cache) = self.cache.as_ref() {
            cache.lock().await.insert(
                url.to_string(),
                CacheEntry {
                    body: body.to_string(),
                    fetched_at: Instant::now(),
                },
            );
        }
    }

    async fn fetch_once(&self, url: &str, attempt: u32) -> Result<String> {
        self.polite_wait().await;
        let response = self.client.get(url).send().await?;
        if let Some(error) = Self::status_error(response.status(), url, attempt) {
            return Err(error);
        }
        Ok(response.text().await?)
    }

    /// 429 and non-2xx statuses become typed errors; rate limiting keeps the
    /// attempt number so the surfaced error says how many tries were burned.
    fn status_error(status: reqwest::StatusCode, url: &str, attempt: u32) -> Option<ScraperError> {
        if status.as_u16() == 429 {
            return Some(ScraperError::RateLimited {
                url: url.to_string(),
                attempts: attempt,
            });
        }
        if !status.is_success() {
            return Some(ScraperError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        None
    }

    fn is_retryable(error: &ScraperError) -> bool {
        match error {
            ScraperError::Http(_) => true,
            ScraperError::RateLimited { .. } => true,
            // Server-side trouble is worth another attempt; client errors are not.
            ScraperError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
impl PageSource for PoliteFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        if let Some(body) = self.cache_get(url).await {
            return Ok(body);
        }

        let mut last_error = None;
        for attempt in 1..=self.policy.max_attempts {
            match self.fetch_once(url, attempt).await {
                Ok(body) => {
                    self.cache_put(url, &body).await;
                    return Ok(body);
                }
                Err(error) if Self::is_retryable(&error) && attempt < self.policy.max_attempts => {
                    let pause = match &error {
                        ScraperError::RateLimited { .. } => {
                            self.policy.rate_limit_backoff_for(attempt)
                        }
                        _ => self.policy.backoff_for(attempt),
                    };
                    warn!(
                        "Fetch attempt {}/{} for {} failed ({}); backing off {:?}",
                        attempt, self.policy.max_attempts, url, error, pause
                    );
                    tokio::time::sleep(pause).await;
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        // The caller, not the fetcher, decides whether this is fatal.
        Err(last_error.unwrap_or_else(|| ScraperError::Connectivity(url.to_string())))
    }

    async fn probe(&self, url: &str) -> bool {
        self.polite_wait().await;
        match self.client.head(url).send().await {
            Ok(response) => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                response.status().is_success() && !content_type.starts_with("text/html")
            }
            Err(_) => false,
        }
    }
}
