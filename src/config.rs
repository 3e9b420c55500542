use crate::error::{Result, ScraperError};
use serde::Deserialize;
use std::fs;

/// Operational tuning values. Everything here is a knob, not a contract:
/// politeness bounds and retry counts follow whatever the source tolerates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub fetcher: FetcherConfig,
    pub crawl: CrawlConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Root listing URL of the event calendar.
    pub listing_url: String,
    /// Template appended to the listing URL for page N >= 2.
    pub page_param: String,
    /// Image used when no usable picture is found on a page.
    pub placeholder_image_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_ceiling_ms: u64,
    /// Per-attempt backoff on HTTP 429, in seconds.
    pub rate_limit_backoff_secs: u64,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    /// HEAD-probe image candidates before accepting one. Off by default:
    /// it costs one polite request per candidate.
    pub validate_images: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub default_max_pages: usize,
    pub batch_size: usize,
    pub batch_stagger_ms: u64,
    pub page_pause_ms: u64,
    /// Events older than this many days are noise, not history.
    pub grace_window_days: i64,
    /// Dates further out than this are treated as parser artifacts.
    pub max_future_days: i64,
    /// Reaper cutoff: non-featured events older than this get deleted.
    pub retention_days: i64,
    pub name_max_len: usize,
    pub description_max_len: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            listing_url: "https://www.alpenregion-tourismus.de/veranstaltungen".to_string(),
            page_param: "?page=".to_string(),
            placeholder_image_url: "https://www.alpenregion-tourismus.de/static/event-placeholder.jpg"
                .to_string(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            delay_min_ms: 1_000,
            delay_max_ms: 3_000,
            timeout_seconds: 30,
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_ceiling_ms: 30_000,
            rate_limit_backoff_secs: 30,
            cache_enabled: true,
            cache_ttl_secs: 15 * 60,
            validate_images: false,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            default_max_pages: 5,
            batch_size: 3,
            batch_stagger_ms: 500,
            page_pause_ms: 2_000,
            grace_window_days: 3,
            max_future_days: 366,
            retention_days: 1,
            name_max_len: 200,
            description_max_len: 2_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            fetcher: FetcherConfig::default(),
            crawl: CrawlConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{path}': {e}"))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like `load`, but falls back to defaults when no config file exists.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(_) => Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.fetcher.delay_min_ms <= config.fetcher.delay_max_ms);
        assert!(config.fetcher.max_attempts >= 1);
        assert!(config.crawl.batch_size >= 1);
        assert!(config.source.listing_url.starts_with("https://"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [crawl]
            default_max_pages = 10
            batch_size = 2
            "#,
        )
        .unwrap();
        assert_eq!(parsed.crawl.default_max_pages, 10);
        assert_eq!(parsed.crawl.batch_size, 2);
        assert_eq!(parsed.fetcher.max_attempts, FetcherConfig::default().max_attempts);
    }

    #[test]
    fn load_from_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [source]
            listing_url = "https://example.test/events"
            "#,
        )
        .unwrap();
        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.source.listing_url, "https://example.test/events");
        assert_eq!(config.crawl.batch_size, CrawlConfig::default().batch_size);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let error = Config::load_from("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(error, ScraperError::Config(_)));
    }
}
